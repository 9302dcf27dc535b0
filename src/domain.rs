//! Core domain types shared by every stage of the pipeline.

pub mod identity;
pub mod types;

pub use identity::RootId;
pub use types::{DocumentKind, MatchId, PartitionKey, PlayerId, QueueType, Region, Season};
