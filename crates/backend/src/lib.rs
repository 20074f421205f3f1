//! Job-execution backend for the Graymill gateway.
//!
//! Exposes the [`JobBackend`] trait the gateway polls against, an HTTP
//! implementation for a remote job service, a local in-process executor,
//! and the image-binarization algorithm itself.

pub mod binarize;
pub mod client;
pub mod http;
pub mod job;
pub mod local;

pub use client::{BackendError, JobBackend};
pub use http::HttpJobBackend;
pub use job::{JobState, JobStatus};
pub use local::LocalJobBackend;
