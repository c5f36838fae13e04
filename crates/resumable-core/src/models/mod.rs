//! Data models for resumable uploads

mod metadata;
mod upload;

pub use metadata::*;
pub use upload::*;
