//! Session windowing
//!
//! Groups incoming events into per-user session windows, tracks their lifecycle,
//! and hands completed sessions to a single consumer over a bounded channel.

mod manager;
mod sweep;

pub use manager::{SessionKey, SessionWindowManager};
