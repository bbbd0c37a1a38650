//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Memory pressure: Shrinks registered caches back under a global byte budget

mod pressure;

pub use pressure::spawn_pressure_task;
