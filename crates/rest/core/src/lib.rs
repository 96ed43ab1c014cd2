//! ScreenRest Core
//!
//! Usage accumulation, threshold detection and break enforcement.
//! The engine runs as a single-writer actor; hosts feed it power, surface and
//! foreground signals and receive show/hide requests back.

mod clock;
mod config;
mod controller;
mod engine;
mod location;
mod monitor;
mod screen;
mod session;
mod surface;
mod usage;
mod watchdog;

pub use clock::*;
pub use config::*;
pub use controller::*;
pub use engine::*;
pub use location::*;
pub use monitor::*;
pub use screen::*;
pub use session::*;
pub use surface::*;
pub use usage::*;
pub use watchdog::*;
