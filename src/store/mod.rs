//! Durable storage operations.
//!
//! Every public function is bounded by a 5-second deadline and returns the
//! §domain errors its callers use for control flow (`NotFound`, `Conflict`,
//! `Forbidden`, `DomainRule`); anything unexpected surfaces as `Storage`.

pub mod conversations;
pub mod events;
pub mod join_requests;
pub mod messages;
pub mod users;

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Default deadline for a single storage operation.
pub const OP_DEADLINE: Duration = Duration::from_secs(5);

/// Bound a storage operation by [`OP_DEADLINE`].
pub(crate) async fn bounded<T>(op: impl Future<Output = AppResult<T>>) -> AppResult<T> {
    match tokio::time::timeout(OP_DEADLINE, op).await {
        Ok(result) => result,
        Err(_) => Err(AppError::StorageTimeout),
    }
}
