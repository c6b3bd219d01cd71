//! Canonical pixel list and submission lifecycle for one client session.

mod controller;
pub mod driver;
mod state;

pub use controller::PixelSyncController;
pub use driver::{DriverError, SyncHandle};
pub use state::{
    FailureReason, HydrationReport, SubmissionState, SubmitError, SyncEvent, SyncView,
};
