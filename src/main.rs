mod cli;

use frameseek::{config, probe, verify};
use frameseek_player::{
    open_player, CommandOutcome, Picture, PixelSink, PlayerEvent, Rect, StopReason,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "frameseek=trace,frameseek_media=trace,frameseek_player=trace".to_string()
        } else {
            "frameseek=info,frameseek_media=info,frameseek_player=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Probe { file, json } => probe_file(&file, cli.config.as_deref(), json),
        Commands::Frame { file, index } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(show_frame(&file, &config, index))
        }
        Commands::Play { file, from, frames } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(play_file(&file, &config, from, frames))
        }
        Commands::Verify { file, stride } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(verify_file(&file, &config, stride))
        }
        Commands::CheckConfig {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            check_config(path.as_deref())
        }
    }
}

fn probe_file(file: &Path, config_path: Option<&Path>, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }
    let config = config::load_config_or_default(config_path)?;
    let report = probe::probe_file(file, &config)?;

    if json {
        let json_str = serde_json::to_string_pretty(&report)?;
        println!("{}", json_str);
        return Ok(());
    }

    let stream = &report.stream;
    println!("File: {}", report.file.display());
    println!("Size: {} bytes", report.file_size);
    println!("Codec: {}", stream.codec);
    println!("Resolution: {}x{}", stream.width, stream.height);
    println!("Frames: {}", stream.total_frames);
    println!("Frame rate: {:.3} fps", stream.fps);
    let secs = stream.duration as u64;
    println!(
        "Duration: {:02}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        (stream.duration.fract() * 1000.0) as u64
    );
    println!("Timescale: {}", stream.timescale);
    println!("Codec config: {} bytes", stream.codec_config.len());

    println!("\nKeyframes: {}", report.keyframe_count());
    let shown: Vec<String> = report.keyframes.iter().take(32).map(u32::to_string).collect();
    print!("  {}", shown.join(", "));
    if report.keyframes.len() > shown.len() {
        print!(", ... ({} more)", report.keyframes.len() - shown.len());
    }
    println!();
    println!("Worst-case seek replay: {} frames", report.max_replay);

    Ok(())
}

async fn show_frame(file: &Path, config: &config::Config, index: u32) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }
    let sink = frameseek_player::CaptureSink::new();
    let player = open_player(
        &file.display().to_string(),
        config.worker_options(),
        config.player_options(),
        config.player.backend.create()?,
        Box::new(sink.clone()),
    )?;
    player.wait_for_complete().await?;

    let outcome = player.seek(index).await;
    let report = match outcome {
        Ok(CommandOutcome::Seeked(report)) => report,
        Ok(other) => anyhow::bail!("Unexpected outcome: {:?}", other),
        Err(e) => {
            player.join().await;
            return Err(e).with_context(|| format!("Failed to seek to frame {}", index));
        }
    };
    let frame = sink.last().context("Seek presented no picture")?;
    player.join().await;

    println!("Frame: {}", frame.sequence_index);
    println!("Timestamp: {}", frame.timestamp);
    println!("Keyframe: {} (replayed {})", report.keyframe, report.replayed);
    println!("Checksum: {}", frame.checksum);
    Ok(())
}

/// Prints one line per presented picture, up to an optional limit.
struct PrintSink {
    remaining: Option<u32>,
}

impl PixelSink for PrintSink {
    fn present(&mut self, picture: &Picture, _rect: Rect) {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return;
            }
            *remaining -= 1;
        }
        println!(
            "{}\t{}\t{}",
            picture.sequence_index,
            picture.timestamp,
            picture.checksum()
        );
    }

    fn resize(&mut self, width: u32, height: u32) {
        tracing::debug!(width, height, "Surface resized");
    }
}

async fn play_file(
    file: &Path,
    config: &config::Config,
    from: u32,
    frames: Option<u32>,
) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }
    if frames == Some(0) {
        return Ok(());
    }
    // only frames from `from` onwards are printed
    let options = frameseek_player::PlayerOptions {
        present_first_frame: false,
        ..config.player_options()
    };
    let player = open_player(
        &file.display().to_string(),
        config.worker_options(),
        options,
        config.player.backend.create()?,
        Box::new(PrintSink { remaining: frames }),
    )?;
    let mut events = player.subscribe();
    let mut play = player.play_from(from);

    let outcome = match frames {
        None => (&mut play).await,
        Some(limit) => {
            let mut presented = 0;
            loop {
                tokio::select! {
                    outcome = &mut play => break outcome,
                    event = events.recv() => match event {
                        Ok(PlayerEvent::Presented { .. }) => {
                            presented += 1;
                            if presented >= limit {
                                let _ = player.pause().await;
                                break (&mut play).await;
                            }
                        }
                        Ok(PlayerEvent::DecodeWarning { index, reason }) => {
                            tracing::warn!(index, "Decode warning: {}", reason);
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => presented += skipped as u32,
                        Err(RecvError::Closed) => break (&mut play).await,
                    }
                }
            }
        }
    };
    player.join().await;

    match outcome? {
        CommandOutcome::Played { reason, next } => match reason {
            StopReason::EndOfStream | StopReason::Cancelled => {
                tracing::info!(next, "Playback finished");
                Ok(())
            }
            StopReason::ParseFailed(e) => anyhow::bail!("Parsing failed: {}", e),
            StopReason::DecodeError { index, reason } => {
                anyhow::bail!("Decode failed at frame {}: {}", index, reason)
            }
        },
        other => anyhow::bail!("Unexpected outcome: {:?}", other),
    }
}

async fn verify_file(file: &Path, config: &config::Config, stride: u32) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }
    let report = verify::verify_file(file, config, stride).await?;

    for check in &report.checks {
        let status = if check.passed() { "ok" } else { "MISMATCH" };
        println!(
            "{:>8}  keyframe {:>8}  replayed {:>6}  {}",
            check.index, check.keyframe, check.replayed, status
        );
    }

    let failures = report.failures().count();
    println!();
    if failures > 0 {
        for check in report.failures() {
            println!(
                "Frame {}: expected {}, got {} / {}",
                check.index, check.expected, check.first, check.second
            );
        }
        anyhow::bail!(
            "{} of {} sampled frames did not match sequential decode",
            failures,
            report.checks.len()
        );
    }
    println!(
        "All {} sampled frames match sequential decode ({} frames total)",
        report.checks.len(),
        report.total_frames
    );
    Ok(())
}

fn check_config(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => config::find_default_config(),
    };

    let config = match &path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file found, using defaults");
            config::Config::default()
        }
    };

    println!("✓ Configuration is valid");
    println!("  Read chunk size: {} bytes", config.demux.read_chunk_size);
    println!("  Batch size: {}", config.demux.batch_size);
    println!("  Max atom size: {} bytes", config.demux.max_atom_size);
    println!("  Decoder backend: {}", config.player.backend);
    println!("  Flush timeout: {} ms", config.player.flush_timeout_ms);
    println!("  Max decode queue: {}", config.player.max_decode_queue);
    println!("  Present first frame: {}", config.player.present_first_frame);

    Ok(())
}
