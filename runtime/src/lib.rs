//! Durable ingestion of robots.txt files and sitemap trees.
//!
//! Flows fetch documents over HTTP, parse and stage them, then persist
//! normalized records into SQLite in batched transactions. Each step is
//! journaled so an interrupted flow resumes where it stopped.

pub mod acquisition;
pub mod cartography;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod orchestration;
pub mod staging;
pub mod storage;

pub use error::{FailureStage, FlowError, IngestError};
