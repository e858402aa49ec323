pub mod engine;
pub mod message;
pub mod subscription;
pub mod topic;

pub use engine::Broker;
pub use message::{Message, Priority, ProcessingEvent};
