//! `itemflow-providers`
//!
//! **Responsibility:** boundary to the rate-limited external collaborators.
//!
//! This crate is intentionally **not** part of the orchestration core:
//! - It describes *capabilities* ("fetch content for an id", "enrich text with
//!   model M"); the orchestration core only sees the traits.
//! - [`clients`] holds the live HTTP implementations, [`mock`] the scriptable
//!   in-process ones.
//! - Every call returns a tagged [`CallOutcome`] so retry logic is written once,
//!   against the traits, by the caller.
//! - Capabilities are built through a [`ProviderFactory`]; a factory failure
//!   (e.g. a missing credential) is a job-level condition, not a per-call one.

pub mod capability;
pub mod clients;
pub mod error;
pub mod mock;
pub mod outcome;
pub mod prompt;

pub use capability::{
    Attribute, ContentSource, Enricher, ModelCatalog, ProviderFactory, SourceContent,
    model_is_available,
};
pub use clients::{HttpProviders, HttpProvidersConfig, MeliCredentials};
pub use error::ProviderError;
pub use mock::{MockContentSource, MockEnricher, MockProviders, StaticModelCatalog};
pub use outcome::CallOutcome;
pub use prompt::{build_prompt, is_rate_limit_message, parse_retry_after};
