//! Livebuild CLI - wires the backend client, build session and live preview together

pub mod app;
pub mod render;

pub use app::{load_brief, App};
