//! ScreenRest Agent
//!
//! Desktop host for the break engine: TOML configuration, process-backed
//! block screen and notifications, the last-break file and the Unix socket
//! control protocol, plus daemon logging setup.

pub mod config;
pub mod host;
pub mod ipc;
pub mod logging;
pub mod store;

pub use config::AgentConfig;
