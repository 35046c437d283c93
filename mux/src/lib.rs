//! MP4 (ISO-BMFF) writing: low-level atom primitives, structural box
//! writers, and the [`Mp4Mux`] front door that assembles either a
//! whole file in memory or a fragmented stream of init + moof/mdat
//! segments.

pub mod atoms;
pub mod mp4;
pub mod muxer;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MuxError {
    #[error("invalid mux configuration: {0}")]
    InvalidConfig(String),

    #[error("codec `{0}` cannot be written to an MP4 sample entry")]
    UnsupportedCodec(String),

    /// A chunk arrived for a track the muxer was not declared with.
    #[error("{track} track was not declared")]
    TrackNotDeclared { track: &'static str },

    /// No decoder configuration from either the track parameters or
    /// the first chunk's metadata.
    #[error("{track} track has no decoder configuration")]
    MissingDecoderConfig { track: &'static str },

    /// Chunks must arrive in presentation order per track.
    #[error("{track} chunk timestamp {timestamp}us is before {previous}us")]
    NonMonotonicTimestamp {
        track: &'static str,
        timestamp: i64,
        previous: i64,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type MuxResult<T> = Result<T, MuxError>;

pub use muxer::{AudioTrackParams, Mp4Mux, VideoTrackParams};
