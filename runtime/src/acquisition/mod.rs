//! Document acquisition over HTTP.

pub mod fetcher;

pub use fetcher::{Accept, Fetcher, HttpFetcher};
