//! Consumers: the handler capability, the per-subscription consumer loop and
//! the registry that owns the running loops.
//!
//! A subscription with a registered handler gets exactly one background task.
//! The task pulls a batch, dispatches it in order, acknowledges successes and
//! leaves failures pending for redelivery. It only stops when cancelled.

pub mod handler;
pub mod registry;
mod worker;

pub use handler::{FnHandler, HandlerResult, MessageHandler, handler_fn};
pub use registry::HandlerRegistry;
pub(crate) use worker::LoopConfig;

#[cfg(test)]
mod tests;
