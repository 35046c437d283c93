//! Incremental ISO-BMFF (MP4) demuxing.
//!
//! [`BoxReader`] consumes a byte stream chunk by chunk and yields
//! [`DemuxEvent`]s: one `Ready` carrying the parsed track layout once
//! the `moov` box is complete, then batches of `Samples` as media
//! payload bytes become available. Media bytes are retained only until
//! the samples referencing them have been handed out, so a
//! moov-before-mdat file streams with bounded memory; a file with the
//! `moov` at the end degrades to buffering the media data.

pub mod boxes;
pub mod moov;
pub mod reader;
pub mod sample_table;

use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// A track whose sample description carries no decoder
    /// configuration this pipeline can hand to a codec capability.
    #[error("unsupported codec in track {track_id}: {reason}")]
    UnsupportedCodec { track_id: u32, reason: String },

    /// Input ended mid-box or with samples still unrecoverable.
    #[error("truncated stream: {0}")]
    TruncatedStream(String),

    /// Pushed bytes did not continue exactly where the previous push
    /// ended.
    #[error("non-contiguous input: expected offset {expected}, got {actual}")]
    NonContiguousInput { expected: u64, actual: u64 },
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub major_brand: Option<String>,
    /// Movie timescale from `mvhd`, ticks per second.
    pub timescale: u32,
    /// Movie duration in `mvhd` ticks.
    pub duration: u64,
    pub tracks: Vec<TrackInfo>,
}

impl ContainerInfo {
    pub fn first_video(&self) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Video)
    }

    pub fn first_audio(&self) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Audio)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track_id: u32,
    pub kind: TrackKind,
    /// Track timescale from `mdhd`, ticks per second.
    pub timescale: u32,
    /// Track duration in `mdhd` ticks.
    pub duration: u64,
    pub sample_count: usize,
    pub config: TrackConfig,
}

impl TrackInfo {
    pub fn is_usable(&self) -> bool {
        !matches!(self.config, TrackConfig::Unsupported { .. })
    }
}

#[derive(Debug, Clone)]
pub enum TrackConfig {
    Video(VideoParams),
    Audio(AudioParams),
    /// The track is real but this pipeline cannot decode it. The rest
    /// of the file is still processed.
    Unsupported { reason: String },
}

#[derive(Debug, Clone)]
pub struct VideoParams {
    /// RFC 6381 codec string derived from the decoder configuration
    /// box.
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Decoder configuration record with the box header stripped.
    pub description: Bytes,
}

#[derive(Debug, Clone)]
pub struct AudioParams {
    pub codec: String,
    pub sample_rate: u32,
    pub channel_count: u32,
    /// DecoderSpecificInfo from `esds`, when present.
    pub description: Option<Bytes>,
}

/// One sample as extracted from the container: timing still in track
/// timescale ticks.
#[derive(Debug, Clone)]
pub struct SampleUnit {
    pub track_id: u32,
    /// Composition timestamp in track ticks.
    pub cts: i64,
    /// Duration in track ticks.
    pub duration: u32,
    pub sync: bool,
    pub data: Bytes,
}

#[derive(Debug)]
pub enum DemuxEvent {
    /// The track layout is known. Fires exactly once per stream.
    Ready(ContainerInfo),
    /// A batch of consecutive samples for one track, in decode order.
    Samples {
        track_id: u32,
        samples: Vec<SampleUnit>,
    },
}

pub use reader::BoxReader;
