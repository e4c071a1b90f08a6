//! `overburn` — burn an overlay into an MP4 clip from the command line.
//!
//! Three subcommands:
//!
//! - `run`: transcode a clip with a burned-in progress bar, then carry the
//!   source's audio track across untouched.
//! - `probe`: print what is inside a container.
//! - `synth`: write a small raw-video clip so the tool can be exercised
//!   without real camera footage.

use std::io::Write as _;
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::Receiver;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ob_common::{
    BufferInfo, MediaTime, MimeType, Rational, Resolution, SampleFlags, TrackFormat, TrackKind,
    TranscodeConfig,
};
use ob_demux::Mp4Demuxer;
use ob_mux::Mp4Muxer;
use ob_pipeline::{AudioTrackMerger, Phase, Progress, VideoProcessor};
use ob_surface::Canvas;

#[derive(Parser)]
#[command(name = "overburn", version, about, long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transcode a clip with a burned-in progress overlay
    Run(RunArgs),
    /// Show the tracks inside an MP4 file
    Probe(ProbeArgs),
    /// Write a synthetic raw-video clip for testing
    Synth(SynthArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Source MP4
    input: PathBuf,

    /// Destination MP4
    #[arg(short, long)]
    output: PathBuf,

    /// Output width in pixels (default keeps the source's upright size)
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// Output height in pixels
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Video bitrate in bits per second
    #[arg(long, default_value_t = 2_000_000)]
    bitrate: u32,

    /// Output frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Skip the audio pass even when the source has an audio track
    #[arg(long)]
    no_audio: bool,
}

#[derive(Args)]
struct ProbeArgs {
    /// File to inspect
    input: PathBuf,
}

#[derive(Args)]
struct SynthArgs {
    /// Destination MP4
    output: PathBuf,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Number of frames to generate
    #[arg(long, default_value_t = 90)]
    frames: u32,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Add a placeholder AAC track so the audio pass has something to carry
    #[arg(long)]
    with_audio: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run(args) => run_command(&args, cli.json),
        Command::Probe(args) => probe_command(&args, cli.json),
        Command::Synth(args) => synth_command(&args, cli.json),
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RunSummary {
    output: String,
    resolution: String,
    duration_secs: f64,
    frames_rendered: u64,
    frames_skipped: u64,
    video_samples: u64,
    audio_samples: Option<u64>,
}

fn run_command(args: &RunArgs, json: bool) -> Result<()> {
    let demuxer = Mp4Demuxer::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let has_audio = demuxer.track_formats().iter().any(|f| f.is_audio());
    let total_ms = demuxer.duration().as_millis();
    drop(demuxer);

    let config = TranscodeConfig {
        resolution: match (args.width, args.height) {
            (Some(w), Some(h)) => Some(Resolution::new(w, h)),
            _ => None,
        },
        bitrate: args.bitrate,
        frame_rate: Rational::new(args.fps.max(1), 1),
    };

    let merge_audio = has_audio && !args.no_audio;
    let video_target = if merge_audio {
        args.output.with_extension("video-pass.mp4")
    } else {
        args.output.clone()
    };

    let (tx, rx) = crossbeam_channel::bounded(64);
    let printer = thread::Builder::new()
        .name("progress".into())
        .spawn(move || print_progress(rx, json))
        .context("Failed to spawn progress printer")?;

    let mut processor = VideoProcessor::new(config, move |canvas, elapsed_ms| {
        draw_progress_overlay(canvas, elapsed_ms, total_ms);
    })
    .with_progress(tx);
    let outcome = processor.process(&args.input, &video_target);
    drop(processor);
    printer.join().ok();
    let report =
        outcome.with_context(|| format!("Transcode of {} failed", args.input.display()))?;

    let audio_samples = if merge_audio {
        info!(source = %args.input.display(), "Carrying the source audio track across");
        let merge = AudioTrackMerger::new()
            .merge(&video_target, &args.input, &args.output)
            .context("Audio pass failed")?;
        std::fs::remove_file(&video_target).ok();
        Some(merge.audio_samples)
    } else {
        None
    };

    let summary = RunSummary {
        output: args.output.display().to_string(),
        resolution: report.output_resolution.to_string(),
        duration_secs: report.duration.as_secs_f64(),
        frames_rendered: report.frames_rendered,
        frames_skipped: report.frames_skipped,
        video_samples: report.samples_written,
        audio_samples,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Wrote {}", summary.output);
        println!("  {} over {:.3}s", summary.resolution, summary.duration_secs);
        println!(
            "  {} frames rendered, {} skipped, {} video samples",
            summary.frames_rendered, summary.frames_skipped, summary.video_samples
        );
        if let Some(audio) = summary.audio_samples {
            println!("  {audio} audio samples carried across");
        }
    }
    Ok(())
}

fn print_progress(rx: Receiver<Progress>, quiet: bool) {
    for progress in rx {
        if quiet {
            continue;
        }
        match progress.phase {
            Phase::Transcoding => {
                eprint!(
                    "\r{} {:>5.1}%  ({} frames)",
                    progress.phase.label(),
                    progress.fraction() * 100.0,
                    progress.frames_rendered
                );
                std::io::stderr().flush().ok();
            }
            Phase::Complete => {
                eprintln!(
                    "\r{} 100.0%  ({} frames)",
                    Phase::Transcoding.label(),
                    progress.frames_rendered
                );
            }
            _ => {}
        }
    }
}

/// Burn a progress bar along the bottom edge and a beat square in the
/// top-left corner that alternates color once a second.
fn draw_progress_overlay(canvas: &mut Canvas, elapsed_ms: i64, total_ms: i64) {
    let width = canvas.width();
    let height = canvas.height();
    let bar = (height / 16).clamp(2, 48);
    let y = height.saturating_sub(bar * 2) as i32;

    canvas.fill_rect(0, y, width, bar, [16, 16, 16, 200]);
    let total = total_ms.max(1);
    let filled = (width as i64 * elapsed_ms.clamp(0, total) / total) as u32;
    canvas.fill_rect(0, y, filled, bar, [240, 240, 240, 255]);

    let beat = if (elapsed_ms / 1_000) % 2 == 0 {
        [230, 70, 50, 255]
    } else {
        [50, 120, 230, 255]
    };
    canvas.fill_rect(0, 0, bar * 2, bar * 2, beat);
}

// ---------------------------------------------------------------------------
// probe
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ProbeReport {
    file: String,
    size_bytes: u64,
    duration_secs: f64,
    tracks: Vec<TrackFormat>,
}

fn probe_command(args: &ProbeArgs, json: bool) -> Result<()> {
    let demuxer = Mp4Demuxer::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let size_bytes = std::fs::metadata(&args.input)
        .with_context(|| format!("Failed to stat {}", args.input.display()))?
        .len();
    let report = ProbeReport {
        file: args.input.display().to_string(),
        size_bytes,
        duration_secs: demuxer.duration().as_secs_f64(),
        tracks: demuxer.track_formats(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("File:     {}", report.file);
    println!("Size:     {} bytes", report.size_bytes);
    println!("Duration: {:.3}s", report.duration_secs);
    println!("Tracks:   {}", report.tracks.len());
    for (index, track) in report.tracks.iter().enumerate() {
        match &track.kind {
            TrackKind::Video { resolution, frame_rate, bitrate, rotation_degrees } => {
                let fps = frame_rate.map_or("?".into(), |r| r.to_string());
                print!("  #{index} video {} {resolution} @ {fps} fps", track.mime);
                if *rotation_degrees != 0 {
                    print!(", rotated {rotation_degrees}");
                }
                if let Some(bps) = bitrate {
                    print!(", {bps} bps");
                }
                println!();
            }
            TrackKind::Audio { sample_rate, channels } => {
                println!("  #{index} audio {} {sample_rate} Hz, {channels} ch", track.mime);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// synth
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SynthSummary {
    output: String,
    resolution: String,
    video_frames: u32,
    audio_samples: u64,
    duration_secs: f64,
}

fn synth_command(args: &SynthArgs, json: bool) -> Result<()> {
    if args.width % 2 != 0 || args.height % 2 != 0 || args.width == 0 || args.height == 0 {
        anyhow::bail!("Dimensions must be even and non-zero, got {}x{}", args.width, args.height);
    }
    let resolution = Resolution::new(args.width, args.height);
    let rate = Rational::new(args.fps.max(1), 1);
    let frame_us = rate.frame_duration().as_micros();

    let video_format = TrackFormat::video(MimeType::VIDEO_RAW, resolution)
        .with_frame_rate(rate)
        .with_bitrate(2_000_000);
    let mut muxer = Mp4Muxer::new(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let video_track = muxer.add_track(&video_format)?;
    let audio_track = if args.with_audio {
        let format =
            TrackFormat::audio(MimeType::AUDIO_AAC, 44_100, 2).with_csd(vec![vec![0x12, 0x10]]);
        Some(muxer.add_track(&format)?)
    } else {
        None
    };
    muxer.start()?;

    for index in 0..args.frames {
        let frame = synth_frame(resolution, index, args.frames);
        let pts = MediaTime::from_micros(index as i64 * frame_us);
        muxer.write_sample(video_track, &frame, BufferInfo::new(pts, SampleFlags::KEY_FRAME))?;
    }

    let mut audio_samples = 0u64;
    if let Some(track) = audio_track {
        // Enough placeholder packets to span the video timeline.
        let total_us = args.frames as i64 * frame_us;
        let count = total_us * 44_100 / (1024 * 1_000_000) + 1;
        for index in 0..count {
            let pts = MediaTime::from_micros(index * 1024 * 1_000_000 / 44_100);
            let payload = [(index % 251) as u8; 16];
            muxer.write_sample(track, &payload, BufferInfo::new(pts, SampleFlags::KEY_FRAME))?;
            audio_samples += 1;
        }
    }
    muxer.stop()?;

    let summary = SynthSummary {
        output: args.output.display().to_string(),
        resolution: resolution.to_string(),
        video_frames: args.frames,
        audio_samples,
        duration_secs: (args.frames as i64 * frame_us) as f64 / 1_000_000.0,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Wrote {}: {} frames of {} over {:.3}s",
            summary.output, summary.video_frames, summary.resolution, summary.duration_secs
        );
        if audio_samples > 0 {
            println!("  {audio_samples} placeholder audio samples");
        }
    }
    Ok(())
}

/// Hue-sweep background with a white column marking the frame's position
/// on the timeline.
fn synth_frame(resolution: Resolution, index: u32, total: u32) -> Vec<u8> {
    let total = total.max(1);
    let background = hue_rgba(index as f64 / total as f64);
    let column = resolution.width as u64 * index as u64 / total as u64;
    let mut data = vec![0u8; resolution.rgba_byte_size() as usize];
    for y in 0..resolution.height {
        let row = y as usize * resolution.width as usize * 4;
        for x in 0..resolution.width {
            let offset = row + x as usize * 4;
            let rgba = if x as u64 == column { [255, 255, 255, 255] } else { background };
            data[offset..offset + 4].copy_from_slice(&rgba);
        }
    }
    data
}

fn hue_rgba(phase: f64) -> [u8; 4] {
    let h = phase.rem_euclid(1.0) * 6.0;
    let x = (255.0 * (1.0 - ((h % 2.0) - 1.0).abs())) as u8;
    match h as u32 {
        0 => [255, x, 0, 255],
        1 => [x, 255, 0, 255],
        2 => [0, 255, x, 255],
        3 => [0, x, 255, 255],
        4 => [x, 0, 255, 255],
        _ => [255, 0, x, 255],
    }
}
