//! Imperative shell: drives the engine against the backend, the store and the
//! work scheduler.

pub mod manager;
pub mod rate_limit;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use manager::{
    ContactDeps, ContactManager, ANON_DATA_KEY, CONTACT_INFO_KEY, IDENTITY_RATE_LIMIT_ID,
    UPDATE_RATE_LIMIT_ID, UPDATE_TASK_ID,
};
pub use rate_limit::IdentityRateLimiter;
pub use scheduler::{
    ManualWorkScheduler, TokioWorkScheduler, WorkFuture, WorkHandler, WorkRequest, WorkResult,
    WorkScheduler,
};
