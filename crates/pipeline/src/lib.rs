//! `ob-pipeline` — the Overburn transcode and merge sessions.
//!
//! Two passes produce the final deliverable:
//!
//! 1. [`VideoProcessor`] decodes the source's video track, composites a
//!    caller-drawn overlay onto every frame, re-encodes, and muxes a
//!    video-only MP4.
//! 2. [`AudioTrackMerger`] copies that video track and the source's
//!    original audio track, untouched, into the final container.
//!
//! Both passes report what they did ([`TranscodeReport`], [`MergeReport`])
//! and the processor can stream [`Progress`] snapshots while it runs.

pub mod error;
pub mod merger;
pub mod processor;
pub mod progress;

pub use error::{PipelineError, PipelineResult};
pub use merger::{AudioTrackMerger, MergeReport};
pub use processor::{TranscodeReport, VideoProcessor};
pub use progress::{Phase, Progress};
