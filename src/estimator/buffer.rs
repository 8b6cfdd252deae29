//! Fixed-capacity sliding window with "shift-left, write-tail" semantics.
//!
//! Mirrors the reference algorithm's `np.roll(buf, -1); buf[-1] = value`
//! idiom: pushing a new sample discards the oldest and the most recent
//! sample always sits at the last index.

/// A ring buffer of exactly `len()` elements, oldest-first.
#[derive(Debug, Clone, PartialEq)]
pub struct SlidingWindow {
    values: Vec<f64>,
}

impl SlidingWindow {
    /// Creates a window of `window` zero-filled slots. `window` must be >= 1.
    pub fn new(window: usize) -> Self {
        Self::filled(window, 0.0)
    }

    /// Creates a window of `window` one-filled slots, matching the
    /// reference's distinct `residual_weight_buffer = np.ones(N)` seed
    /// (measurement/position buffers seed at zero; the weight buffer does
    /// not).
    pub fn ones(window: usize) -> Self {
        Self::filled(window, 1.0)
    }

    fn filled(window: usize, value: f64) -> Self {
        debug_assert!(window >= 1, "window must be at least 1");
        SlidingWindow {
            values: vec![value; window.max(1)],
        }
    }

    /// Appends `value`, evicting the oldest sample.
    pub fn push(&mut self, value: f64) {
        self.values.rotate_left(1);
        if let Some(last) = self.values.last_mut() {
            *last = value;
        }
    }

    /// Contiguous oldest-first view of the buffer.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// The most recently pushed sample.
    pub fn latest(&self) -> f64 {
        *self.values.last().expect("window is never empty")
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replaces the contents wholesale. Fails if `values.len()` doesn't
    /// match the configured window length.
    pub fn restore(&mut self, values: Vec<f64>) -> Result<(), String> {
        if values.len() != self.values.len() {
            return Err(format!(
                "buffer length mismatch: expected {}, got {}",
                self.values.len(),
                values.len()
            ));
        }
        self.values = values;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_shifts_left_and_writes_tail() {
        let mut w = SlidingWindow::new(3);
        w.push(1.0);
        w.push(2.0);
        w.push(3.0);
        assert_eq!(w.as_slice(), &[1.0, 2.0, 3.0]);
        w.push(4.0);
        assert_eq!(w.as_slice(), &[2.0, 3.0, 4.0]);
        assert_eq!(w.latest(), 4.0);
    }

    #[test]
    fn length_is_fixed_regardless_of_pushes() {
        let mut w = SlidingWindow::new(1);
        for i in 0..10 {
            w.push(i as f64);
            assert_eq!(w.len(), 1);
        }
    }

    #[test]
    fn ones_seeds_every_slot_at_one() {
        let w = SlidingWindow::ones(3);
        assert_eq!(w.as_slice(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn restore_rejects_mismatched_length() {
        let mut w = SlidingWindow::new(3);
        assert!(w.restore(vec![1.0, 2.0]).is_err());
        assert!(w.restore(vec![1.0, 2.0, 3.0]).is_ok());
        assert_eq!(w.as_slice(), &[1.0, 2.0, 3.0]);
    }
}
