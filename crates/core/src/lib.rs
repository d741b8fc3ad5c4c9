pub mod config;
pub mod error;
pub mod host;
pub mod model;
pub mod query;
pub mod time;
pub mod view;

pub use error::{MirrorError, Result};
