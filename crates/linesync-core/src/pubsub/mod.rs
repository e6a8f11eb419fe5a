//! Topic registry and subscription management.

mod manager;
mod topic;

pub use manager::{SubscribeOutcome, SubscriptionManager, INITIAL_SNAPSHOT_ERROR};
pub use topic::{Topic, TopicRegistry};
