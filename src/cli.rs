use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "frameseek")]
#[command(author, version, about = "Frame-accurate MP4 seeking and playback")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the stream configuration and keyframe index of a file
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Seek to one frame and print its checksum
    Frame {
        /// MP4 file
        #[arg(required = true)]
        file: PathBuf,

        /// 0-based frame index
        #[arg(required = true)]
        index: u32,
    },

    /// Play a file at its native rate, printing each presented frame
    Play {
        /// MP4 file
        #[arg(required = true)]
        file: PathBuf,

        /// Frame to start from
        #[arg(long, default_value = "0")]
        from: u32,

        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u32>,
    },

    /// Check that seeking reproduces sequential decode exactly
    Verify {
        /// MP4 file
        #[arg(required = true)]
        file: PathBuf,

        /// Check every Nth frame
        #[arg(long, default_value = "10")]
        stride: u32,
    },

    /// Validate configuration file
    CheckConfig {
        /// Config file to validate (uses default search paths if not specified)
        config: Option<PathBuf>,
    },
}
