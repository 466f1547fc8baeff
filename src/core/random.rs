/// Source of randomness for the co-star focus nudge.
pub trait FocusRng: Send + Sync {
    /// A value in `[0.0, 1.0)`.
    fn next_f64(&self) -> f64;
}

#[derive(Debug, Default)]
pub struct ThreadFocusRng;

impl FocusRng for ThreadFocusRng {
    fn next_f64(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Always yields the same value. Pins the focus nudge in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedFocusRng(pub f64);

impl FocusRng for FixedFocusRng {
    fn next_f64(&self) -> f64 {
        self.0
    }
}
