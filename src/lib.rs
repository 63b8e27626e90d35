pub mod changes;
pub mod config;
pub mod github;
pub mod preview;
pub mod telemetry;

// Re-export for main.rs
pub use crate::config::PreviewConfig;
pub use crate::preview::{PreviewRequest, ServiceId};
