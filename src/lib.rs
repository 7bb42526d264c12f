//! Library crate for portscan-svc: single-flight nmap scans with a report repository.
pub mod args;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod server;
pub mod store;
pub mod types;

pub use error::{Error, Result};
