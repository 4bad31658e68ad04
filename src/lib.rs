//! Frameseek - frame-accurate MP4 seeking and playback
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod probe;
pub mod verify;
