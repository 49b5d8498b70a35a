//! Request handlers.

pub mod health;
pub mod scheduler;
pub mod workflows;

pub use health::*;
