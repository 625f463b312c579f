//! Livebuild Config - environment variable names, parsing helpers and typed settings.

pub mod constants;
pub mod env;
pub mod settings;

pub use settings::{
    ApiSettings, CommandLine, ConfigError, PreviewSettings, SessionSettings, Settings,
};
