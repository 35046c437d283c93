//! Codec capability boundary: media unit types, the backend trait that
//! external decoders/encoders implement, and the channel-backed stage
//! that the pipeline drives them through.

pub mod avc;
pub mod backend;
pub mod stage;
pub mod testing;
pub mod types;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    /// The capability refused the derived configuration.
    #[error("capability rejected configuration: {0}")]
    ConfigurationRejected(String),

    /// The capability reported an unrecoverable internal failure.
    #[error("codec capability failure: {0}")]
    Capability(String),

    /// Input was submitted before the capability was configured.
    #[error("codec capability not configured")]
    NotConfigured,

    /// An input unit the capability cannot make sense of.
    #[error("invalid codec input: {0}")]
    InvalidInput(String),

    /// Malformed out-of-band decoder configuration.
    #[error("malformed decoder configuration record")]
    MalformedConfigRecord,

    /// Downstream dropped the stage's output channel mid-run.
    #[error("codec output channel closed")]
    ChannelClosed,
}

pub use backend::{
    BoxedAudioDecoder, BoxedAudioEncoder, BoxedVideoDecoder, BoxedVideoEncoder, CodecBackend,
};
pub use stage::CodecStage;
pub use types::{
    AudioDecoderConfig, AudioEncoderConfig, ChunkKind, DecoderMetadata, EncodeRequest,
    EncodedChunk, RawAudioChunk, RawFrame, VideoDecoderConfig, VideoEncoderConfig,
};
