//! Frameseek-Common: shared stream types and worker boundary messages.
//!
//! This crate holds the data model that flows between the container parser,
//! the chunk store and the player:
//!
//! - **Stream types**: [`StreamConfig`] and [`AccessUnit`]
//! - **Messages**: [`WorkerMessage`] and [`WorkerCommand`] exchanged with the
//!   background parser worker
//! - **Errors**: [`ErrorDescriptor`], the transport-safe form of a parser or
//!   decoder failure
//!
//! # Examples
//!
//! ```
//! use bytes::Bytes;
//! use frameseek_common::AccessUnit;
//!
//! let unit = AccessUnit::new(0, true, 0, 1000, Bytes::from_static(b"\x00\x00\x00\x01"));
//! assert!(unit.is_keyframe);
//! assert_eq!(unit.len(), 4);
//! ```

pub mod error;
pub mod messages;
pub mod types;

pub use error::{ErrorDescriptor, ErrorKind};
pub use messages::{WorkerCommand, WorkerMessage};
pub use types::{AccessUnit, StreamConfig};
