use frameseek_media::DemuxOptions;
use frameseek_player::{DecoderBackend, PlayerOptions, SessionOptions, WorkerOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub demux: DemuxConfig,

    #[serde(default)]
    pub player: PlayerConfig,
}

impl Config {
    /// Options for the background parser worker.
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            read_chunk_size: self.demux.read_chunk_size,
            demux: DemuxOptions {
                batch_size: self.demux.batch_size,
                max_atom_size: self.demux.max_atom_size,
            },
            ..WorkerOptions::default()
        }
    }

    /// Options for the player driver and its decoder session.
    pub fn player_options(&self) -> PlayerOptions {
        PlayerOptions {
            session: SessionOptions {
                flush_timeout: Duration::from_millis(self.player.flush_timeout_ms),
            },
            max_decode_queue: self.player.max_decode_queue,
            present_first_frame: self.player.present_first_frame,
            ..PlayerOptions::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DemuxConfig {
    /// Bytes requested from the source per read
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Access units per chunk message
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Largest box the demuxer will buffer (default: 64 MiB)
    #[serde(default = "default_max_atom_size")]
    pub max_atom_size: u64,
}

fn default_read_chunk_size() -> usize {
    64 * 1024
}

fn default_batch_size() -> usize {
    64
}

fn default_max_atom_size() -> u64 {
    64 * 1024 * 1024
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: default_read_chunk_size(),
            batch_size: default_batch_size(),
            max_atom_size: default_max_atom_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerConfig {
    /// Decoder implementation ("reference" or "openh264")
    #[serde(default)]
    pub backend: DecoderBackend,

    /// Upper bound on a decoder flush in milliseconds (default: 5000)
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Presented decodes in flight before playback drains the decoder
    #[serde(default = "default_max_decode_queue")]
    pub max_decode_queue: usize,

    /// Show frame 0 once it is parsed, before any command
    #[serde(default = "default_true")]
    pub present_first_frame: bool,
}

fn default_true() -> bool {
    true
}

fn default_flush_timeout_ms() -> u64 {
    5000
}

fn default_max_decode_queue() -> usize {
    16
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            backend: DecoderBackend::default(),
            flush_timeout_ms: default_flush_timeout_ms(),
            max_decode_queue: default_max_decode_queue(),
            present_first_frame: true,
        }
    }
}
