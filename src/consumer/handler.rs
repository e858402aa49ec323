use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::message::Message;
use crate::utils::error::HandlerError;

pub type HandlerResult = Result<(), HandlerError>;

/// Callback invoked once per delivered message.
///
/// Returning `Ok` acknowledges the message. Returning an error (or panicking)
/// leaves it pending, so the same message comes back on a later poll.
/// Handlers must therefore tolerate duplicates.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> HandlerResult;
}

#[async_trait]
impl<T: MessageHandler + ?Sized> MessageHandler for Arc<T> {
    async fn handle(&self, message: Message) -> HandlerResult {
        (**self).handle(message).await
    }
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, message: Message) -> HandlerResult {
        (self.f)(message).await
    }
}

/// Build a handler from `|message| async move { ... }`.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler { f }
}
