//! Database module: view models and SQL repositories.
//!
//! - `model`: claim outcomes and other query-shaped results.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Callers import from `boinc_submit::db`; the repository API is re-exported.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::SubmitClaim;
