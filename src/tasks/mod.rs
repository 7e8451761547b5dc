//! Background Tasks Module
//!
//! Contains background tasks that run during server operation.
//!
//! # Tasks
//! - Startup preload: seeds and warms the stores, then marks the instance ready

mod startup;

pub use startup::{spawn_preload_task, StartupOptions};
