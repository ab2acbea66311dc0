pub mod checkpoint;
pub mod config;
pub mod crawl;
mod error;
pub mod events;
pub mod extract;
pub mod paths;
pub mod transport;

pub use error::{ArchiverError, Result};
