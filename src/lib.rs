//! Streaming MP4 transcode pipeline.
//!
//! Input flows through four cooperating stages on one task: the demux
//! coordinator feeds an incremental box reader, decoded frames pass
//! through an optional transform, encoded chunks land in a buffered or
//! fragmented muxer. Codec work happens behind [`CodecBackend`]
//! implementations injected into the [`Pipeline`]; a CLI-transcoder
//! escape hatch wraps an external ffmpeg binary for operations the
//! pipeline does not cover.
//!
//! [`CodecBackend`]: recast_codec::CodecBackend
//! [`Pipeline`]: pipeline::Pipeline

pub mod demux;
pub mod error;
pub mod ffmpeg;
pub mod pipeline;
pub mod probe;
pub mod transform;

pub use error::Error;
