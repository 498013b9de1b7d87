//! Detection pipeline: per-message candidates, metadata clusters, and
//! aggregation

pub mod aggregate;
pub mod candidate_builder;
pub mod cluster_builder;

pub use aggregate::{aggregate_chunk, best_per_merchant, strict_gate};
pub use candidate_builder::{build_candidate, BuildOutcome, DropReason, NearMiss};
pub use cluster_builder::ClusterBuilder;
