//! Messages exchanged with the background parser worker.
//!
//! Both directions serialize as `{"type": ..., "data": ...}` so they can be
//! carried by any transport; in-process they travel over tokio channels.

use crate::{AccessUnit, ErrorDescriptor, StreamConfig};
use serde::{Deserialize, Serialize};

/// Outbound messages, worker to controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// Stream configuration, sent exactly once before any chunk.
    Config(StreamConfig),
    /// A batch of access units in decode order.
    Chunk(Vec<AccessUnit>),
    /// The full keyframe index, sent once parsing has completed.
    KeyframeIndex(Vec<u32>),
    /// Parsing finished; `total` units were emitted.
    Complete { total: u32 },
    /// A fatal parsing failure. Nothing follows it.
    Error(ErrorDescriptor),
    /// Acknowledges a [`WorkerCommand::Seek`].
    Seeked(u32),
}

impl WorkerMessage {
    /// Whether the message ends the parsing pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error(_))
    }
}

/// Inbound control messages, controller to worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum WorkerCommand {
    /// Open the source and start parsing.
    #[serde(rename_all = "camelCase")]
    Start { url: String },
    /// Seek hint from the controller.
    #[serde(rename_all = "camelCase")]
    Seek { frame_index: u32 },
}
