//! Deal pipeline for business acquisitions.
//!
//! Service functions take a database handle plus the caller's user id and
//! only ever see that user's rows. [`schema`] exposes them over GraphQL under
//! the `crm` namespace.

pub mod communications;
pub mod deals;
pub mod documents;
mod error;
pub mod favorites;
pub mod fields;
pub mod pipeline;
pub mod schema;
pub mod seed;
pub mod tasks;

pub use error::{CrmError, CrmResult};
pub use schema::{AppSchema, CrmSchema, CrmSettings, CurrentUser, build_schema};
pub use seed::{SeedSummary, seed_demo};
