//! Coordination engine that moves qualified visitors from a third-party
//! marketing form into the embedded booking app, and keeps the host page
//! and the app in step while the app is framed.

pub mod analytics;
pub mod bridge;
pub mod config;
pub mod controller;
pub mod eligibility;
pub mod error;
pub mod height;
pub mod host;
pub mod iframe;
pub mod persistence;
pub mod protocol;
pub mod scheduler;
pub mod sim;
pub mod state;
pub mod telemetry;
pub mod visibility;

pub use bridge::EmbeddedBridge;
pub use controller::{ControllerTask, HostPageController, InstallOutcome};
