use thiserror::Error;

use recast_codec::CodecError;
use recast_demux::DemuxError;
use recast_mux::MuxError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Demux(#[from] DemuxError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Mux(#[from] MuxError),

    /// Another run holds the pipeline or the external transcoder.
    #[error("a conversion is already in progress")]
    Busy,

    #[error("external transcoder exited with {status}")]
    ExternalProcessFailure { status: std::process::ExitStatus },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("frame transform failed: {0}")]
    Transform(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
