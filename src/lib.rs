//! # pipebus
//!
//! `pipebus` is the in-process publish/subscribe broker behind the document
//! pipeline. It decouples document ingestion, analysis and notification:
//! producers publish events to topics, every subscription bound to a topic
//! gets its own copy, and consumers receive messages through handlers running
//! in one background loop per subscription.
//!
//! Delivery is at-least-once. A message stays in its subscription's queue
//! until acknowledged, so a failing handler sees it again on the next poll.
//! Nothing is durable: queues live as long as the broker does.
//!
//! ## Core Modules
//!
//! - `broker`: topics, subscription queues, publish/pull/acknowledge.
//! - `consumer`: the handler capability, consumer loops and their registry.
//! - `pipeline`: the document-pipeline topics and event producers.
//! - `config`: loading and merging configuration.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod pipeline;
pub mod utils;

pub use broker::{Broker, Message, Priority, ProcessingEvent};
pub use consumer::{HandlerResult, MessageHandler, handler_fn};
pub use utils::error::{BrokerError, HandlerError};
