pub mod config;
pub mod context;

pub use config::{ConfigSource, Settings};
pub use context::ClientContext;
