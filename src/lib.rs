//! Download-session orchestration for an external media downloader.
//!
//! A [`session::SessionController`] spawns the downloader for metadata
//! fetches and downloads, tracks each run under an opaque session id,
//! turns its output into [`model::ProgressEvent`]s and reports exactly one
//! [`model::TerminationResult`] per download to an [`sink::EventSink`].

pub mod cancel;
pub mod config;
pub mod downloader;
pub mod error;
pub mod ids;
pub mod logging;
pub mod model;
pub mod progress;
pub mod registry;
pub mod session;
pub mod sink;

pub use error::{Error, Result};
