pub mod api;
pub mod config;
pub mod error;
pub mod exam;
pub mod proctor;

pub use config::Config;
pub use error::{ProctorError, Result};
pub use proctor::ProctorServer;
