//! Substitute values for calls the breaker refuses or loses.

use std::fmt;

/// A degraded result handed back instead of the protected call's output.
pub enum Fallback<T> {
    /// A ready value.
    Value(T),
    /// A provider invoked only when the fallback is actually needed.
    Provider(Box<dyn FnOnce() -> T + Send>),
}

impl<T> Fallback<T> {
    pub fn value(value: T) -> Self {
        Fallback::Value(value)
    }

    pub fn provider<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Fallback::Provider(Box::new(f))
    }

    /// Produce the substitute, running the provider if there is one.
    pub fn resolve(self) -> T {
        match self {
            Fallback::Value(v) => v,
            Fallback::Provider(f) => f(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Fallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Fallback::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_value_resolves_directly() {
        assert_eq!(Fallback::value("cached catalog").resolve(), "cached catalog");
    }

    #[test]
    fn test_provider_runs_only_on_resolve() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let fallback = Fallback::provider(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Vec::<u32>::new()
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(fallback.resolve().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
