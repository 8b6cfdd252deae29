// persistence.rs

// Key/value adapter for snapshotting and restoring coordinator state across
// restarts. Keys take the form "personnel_<id>"; values are JSON-encoded
// LocalizerState records. A real Redis-backed implementation is provided
// alongside an in-memory double used by tests and by deployments without a
// broker.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;

use crate::coordinator::LocalizerState;
use crate::error::PersistenceError;

pub fn state_key(tag_id: &str) -> String {
    format!("personnel_{tag_id}")
}

/// Opaque string key/value store. Implementations need not be transactional;
/// the reference service assumes last-writer-wins, no locking across
/// concurrent processes for the same tag.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
}

impl dyn StateStore {
    /// Loads and decodes a `LocalizerState` for `tag_id`, or `None` if the
    /// key is absent. Per the persistence contract, absence means the
    /// caller should skip this step rather than run with a decoded default.
    pub async fn load_state(&self, tag_id: &str) -> Result<Option<LocalizerState>, PersistenceError> {
        match self.get(&state_key(tag_id)).await? {
            None => Ok(None),
            Some(raw) => {
                let state: LocalizerState = serde_json::from_str(&raw)?;
                Ok(Some(state))
            }
        }
    }

    pub async fn save_state(&self, tag_id: &str, state: &LocalizerState) -> Result<(), PersistenceError> {
        let encoded = serde_json::to_string(state)?;
        self.set(&state_key(tag_id), &encoded).await
    }
}

/// Redis-backed `StateStore` using a multiplexed async connection.
pub struct RedisStateStore {
    connection: redis::aio::MultiplexedConnection,
}

impl RedisStateStore {
    pub async fn connect(address: &str, port: u16, password: Option<&str>) -> Result<Self, PersistenceError> {
        let url = match password {
            Some(password) => format!("redis://:{password}@{address}:{port}"),
            None => format!("redis://{address}:{port}"),
        };
        let client = redis::Client::open(url).map_err(|err| PersistenceError::Backend(err.to_string()))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| PersistenceError::Backend(err.to_string()))?;
        Ok(RedisStateStore { connection })
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        use redis::AsyncCommands;
        let mut conn = self.connection.clone();
        conn.get(key)
            .await
            .map_err(|err| PersistenceError::Backend(err.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        use redis::AsyncCommands;
        let mut conn = self.connection.clone();
        conn.set(key, value)
            .await
            .map_err(|err| PersistenceError::Backend(err.to_string()))
    }
}

/// In-memory `StateStore`, used by tests and by deployments that run
/// without a live Redis instance.
#[derive(Default)]
pub struct InMemoryStateStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        InMemoryStateStore {
            values: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        debug!("in-memory store: get {key}");
        Ok(self.values.lock().expect("state store mutex poisoned").get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        debug!("in-memory store: set {key}");
        self.values
            .lock()
            .expect("state store mutex poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::{AxisState, ModelType, Rakf1D, RakfConfig};

    fn sample_state() -> LocalizerState {
        let cfg = RakfConfig {
            model_coeff: 1.0,
            model_variance: 0.01,
            meas_variance: 1.0,
            initial_variance: 1.0,
            residual_threshold: 3.0,
            adaptive_threshold: 0.5,
            gamma: 1.0,
            window: 1,
            model_type: ModelType::PositionOnly,
        };
        let mut f = Rakf1D::new(0.0, cfg).unwrap();
        f.step(0.5, 1000, 0.0, 0.0).unwrap();
        LocalizerState {
            x: Some(f.state_to_dict()),
            y: None,
            z: None,
        }
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let store: Box<dyn StateStore> = Box::new(InMemoryStateStore::new());
        assert!(store.load_state("tag-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store: Box<dyn StateStore> = Box::new(InMemoryStateStore::new());
        let state = sample_state();
        store.save_state("tag-1", &state).await.unwrap();

        let loaded = store.load_state("tag-1").await.unwrap().unwrap();
        let original_x: AxisState = state.x.unwrap();
        let loaded_x: AxisState = loaded.x.unwrap();
        assert_eq!(original_x.x, loaded_x.x);
        assert_eq!(original_x.meas, loaded_x.meas);
    }

    #[test]
    fn key_format_matches_contract() {
        assert_eq!(state_key("abc123"), "personnel_abc123");
    }
}
