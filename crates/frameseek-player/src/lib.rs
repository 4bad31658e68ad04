//! Frameseek-Player: frame-accurate seeking and paced playback.
//!
//! This crate turns the access units produced by `frameseek-media` into
//! presented pictures:
//!
//! - **Store**: [`ChunkStore`] / [`SharedStore`], the append-only unit list
//!   with its keyframe index and ingest progress
//! - **Session**: [`DecoderSession`], a backend on a dedicated decode thread
//!   with an explicit state machine and per-request presentation intent
//! - **Seek**: [`SeekEngine`], keyframe replay with suppressed output
//! - **Clock**: [`PlaybackClock`], drift-free paced playback
//! - **Worker**: [`spawn_parser_worker`], background container parsing
//! - **Player**: [`spawn_player`] / [`PlayerHandle`], the command surface
//!
//! # Example
//!
//! ```no_run
//! use frameseek_player::{
//!     open_player, CaptureSink, PlayerOptions, ReferenceDecoder, WorkerOptions,
//! };
//!
//! # async fn run() -> frameseek_player::Result<()> {
//! let sink = CaptureSink::new();
//! let player = open_player(
//!     "clip.mp4",
//!     WorkerOptions::default(),
//!     PlayerOptions::default(),
//!     Box::new(ReferenceDecoder::new()),
//!     Box::new(sink.clone()),
//! )?;
//! player.wait_for_complete().await?;
//! player.seek(200).await?;
//! assert_eq!(player.current_frame(), Some(200));
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod decoder;
pub mod error;
pub mod picture;
pub mod player;
pub mod seek;
pub mod session;
pub mod store;
pub mod worker;

pub use clock::{PlaybackClock, PlaybackOutcome, StopReason};
pub use decoder::{DecoderBackend, DecoderConfig, ReferenceDecoder, VideoDecoder};
pub use error::{PlayerError, Result};
pub use picture::{CaptureSink, CapturedFrame, NullSink, Picture, PixelFormat, PixelSink, Rect};
pub use player::{
    open_player, spawn_player, CommandOutcome, CommandTicket, PlayerEvent, PlayerHandle,
    PlayerOptions,
};
pub use seek::{SeekEngine, SeekReport};
pub use session::{
    DecoderSession, OutputFn, PresentationIntent, SessionOptions, SessionState, SessionStats,
};
pub use store::{Availability, ChunkStore, IngestProgress, IngestStatus, SharedStore};
pub use worker::{
    spawn_parser_worker, ByteSource, FileSource, LocalResolver, MemorySource, SourceResolver,
    WorkerHandle, WorkerOptions,
};

#[cfg(feature = "openh264")]
pub use decoder::OpenH264Decoder;
