//! Window Callbacks
//!
//! Caller-supplied hooks invoked on expiry and on capacity rejection.

use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

/// Hook invoked with a key and its value
///
/// Implemented for every `Fn(&K, &V) -> anyhow::Result<()>` closure.
pub trait WindowCallback<K, V>: Send + Sync {
    /// Handle the entry
    fn handle(&self, key: &K, value: &V) -> anyhow::Result<()>;
}

impl<K, V, F> WindowCallback<K, V> for F
where
    F: Fn(&K, &V) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, key: &K, value: &V) -> anyhow::Result<()> {
        self(key, value)
    }
}

/// Role of a callback, used for log context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// Entry evicted after its TTL elapsed
    Expire,
    /// New entry refused because the window is full
    Reject,
}

impl std::fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackKind::Expire => write!(f, "expire"),
            CallbackKind::Reject => write!(f, "reject"),
        }
    }
}

/// Invoke a callback, containing both errors and panics.
///
/// Returns false if the callback failed.
pub(crate) fn invoke<K: Debug, V>(
    window: &str,
    kind: CallbackKind,
    callback: &dyn WindowCallback<K, V>,
    key: &K,
    value: &V,
) -> bool {
    match catch_unwind(AssertUnwindSafe(|| callback.handle(key, value))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(window, callback = %kind, ?key, "Callback failed: {:#}", e);
            false
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(window, callback = %kind, ?key, "Callback panicked: {}", reason);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_closure_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback = move |_: &String, v: &u32| -> anyhow::Result<()> {
            counter.fetch_add(*v as usize, Ordering::SeqCst);
            Ok(())
        };

        assert!(invoke("w", CallbackKind::Expire, &callback, &"k".to_string(), &3u32));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_failing_callback_is_contained() {
        let callback = |_: &&str, _: &u32| -> anyhow::Result<()> { anyhow::bail!("db down") };
        assert!(!invoke("w", CallbackKind::Reject, &callback, &"k", &1u32));
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let callback = |_: &&str, _: &u32| -> anyhow::Result<()> { panic!("boom") };
        assert!(!invoke("w", CallbackKind::Expire, &callback, &"k", &1u32));
    }

    #[test]
    fn test_callback_kind_display() {
        assert_eq!(CallbackKind::Expire.to_string(), "expire");
        assert_eq!(CallbackKind::Reject.to_string(), "reject");
    }
}
