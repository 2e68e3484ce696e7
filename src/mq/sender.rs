//! Message Sender
//!
//! The delivery function a consumer applies to each dequeued message.

use async_trait::async_trait;

/// Delivers a message and reports a status code
///
/// The admission queue compares the returned status against the caller's
/// success code; any other status leaves the message's window slot occupied
/// until it expires. A transport-level failure is returned as `Err`.
#[async_trait]
pub trait MessageSender<V: Send + Sync>: Send + Sync {
    /// Send the message
    async fn send(&self, message: &V) -> anyhow::Result<i32>;
}

/// [`MessageSender`] backed by a synchronous closure
pub struct SenderFn<F> {
    f: F,
}

/// Wrap a closure as a [`MessageSender`]
pub fn sender_fn<F>(f: F) -> SenderFn<F> {
    SenderFn { f }
}

#[async_trait]
impl<V, F> MessageSender<V> for SenderFn<F>
where
    V: Send + Sync,
    F: Fn(&V) -> anyhow::Result<i32> + Send + Sync,
{
    async fn send(&self, message: &V) -> anyhow::Result<i32> {
        (self.f)(message)
    }
}
