pub mod config;
pub mod error;
pub mod paths;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::Paths;
