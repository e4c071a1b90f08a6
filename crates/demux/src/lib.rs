//! `ob-demux` — MP4 container demuxing for the Overburn pipeline.
//!
//! Parses ISO-BMFF box structures (moov, trak, stbl and friends), builds
//! flat per-track sample tables, and streams compressed samples in decode
//! order through [`Mp4Demuxer`].
//!
//! Track selection follows the extractor model: inspect
//! [`Mp4Demuxer::track_formats`], pick one track by MIME prefix with
//! [`Mp4Demuxer::select_track`], then pull samples with
//! [`Mp4Demuxer::read_sample`] until it returns `None`.

pub mod mp4;
pub mod probe;

pub use mp4::boxes::{matrix_to_rotation, BoxHeader};
pub use mp4::sample::{SampleEntry, SampleTable};
pub use mp4::Mp4Demuxer;
pub use ob_common::{DemuxError, DemuxResult};
