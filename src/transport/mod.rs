// transport/mod.rs

// Capability-set bus abstraction: `publish`/`subscribe` bound statically at
// construction, replacing the stringly-named dispatch the reference service
// used to route messages by exchange name.

mod amqp;

pub use amqp::LapinTransport;

use async_trait::async_trait;

use crate::coordinator::TelemetryRecord;
use crate::error::TransportError;

/// A message bus capable of publishing byte payloads and subscribing a
/// callback for decoded telemetry. `LapinTransport` is the production
/// implementation; an in-memory double backs tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, exchange: &str, payload: &[u8]) -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        binding: &str,
        on_message: Box<dyn Fn(TelemetryRecord) + Send + Sync>,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
pub mod test_double {
    use super::*;
    use std::sync::Mutex;

    /// Records every publish call; never actually delivers a subscription
    /// callback (tests drive the coordinator directly instead).
    #[derive(Default)]
    pub struct RecordingTransport {
        pub published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            RecordingTransport::default()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn publish(&self, exchange: &str, payload: &[u8]) -> Result<(), TransportError> {
            self.published
                .lock()
                .expect("recording transport mutex poisoned")
                .push((exchange.to_string(), payload.to_vec()));
            Ok(())
        }

        async fn subscribe(
            &self,
            _binding: &str,
            _on_message: Box<dyn Fn(TelemetryRecord) + Send + Sync>,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }
}
