//! Volume populator worker
//!
//! A short-lived process run once per disk by the populator controller. It
//! reads credentials from its environment, copies the source disk into the
//! target volume and exposes copy progress on `/metrics`. A non-zero exit
//! tells the controller the attempt failed.

pub mod args;
pub mod copy;
pub mod error;
pub mod metrics;
pub mod populate;

pub use args::{Args, Job, Mode, Source};
pub use error::WorkerError;
pub use metrics::WorkerMetrics;
pub use populate::run;
