//! `itemflow-core`: domain building blocks shared by the orchestration layers.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, and validated submission values.

pub mod error;
pub mod id;
pub mod params;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use params::{EnrichmentParams, JobKind, JobParams, TargetIds};
