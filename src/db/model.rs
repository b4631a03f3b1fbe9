//! Query-shaped results returned by repositories.

use crate::model::Batch;

/// Outcome of trying to take the submit claim on a batch.
///
/// Only `Claimed` grants the caller the right to stage files and run
/// `create_work`; the other variants describe why the conditional update
/// matched no row.
#[derive(Debug, Clone)]
pub enum SubmitClaim {
    Claimed(Batch),
    NotFound,
    NotOwner,
    AlreadySubmitted,
    InFlight,
}
