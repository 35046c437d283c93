use crate::types::{
    AudioDecoderConfig, AudioEncoderConfig, EncodeRequest, EncodedChunk, RawAudioChunk, RawFrame,
    VideoDecoderConfig, VideoEncoderConfig,
};
use crate::CodecError;

/// An external codec capability bound to one track.
///
/// The shape is the classic push/pull codec surface: `submit` feeds one
/// input unit, `poll_output` drains whatever outputs are ready. There
/// is no 1:1 correspondence between the two — a decoder holding a
/// reorder buffer may produce nothing for several inputs and then
/// several frames at once, and the order outputs come back in is the
/// authoritative output order. `flush` commits all in-flight work, so
/// after `flush` returns, `poll_output` yields every remaining unit
/// before `None`.
///
/// A backend may drive threads of its own internally; all methods are
/// called from the single pipeline task.
pub trait CodecBackend: Send {
    type Config;
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Bind the backend to a track configuration. A backend that cannot
    /// satisfy the configuration fails with
    /// [`CodecError::ConfigurationRejected`].
    fn configure(&mut self, config: &Self::Config) -> Result<(), CodecError>;

    fn submit(&mut self, input: Self::Input) -> Result<(), CodecError>;

    fn poll_output(&mut self) -> Result<Option<Self::Output>, CodecError>;

    fn flush(&mut self) -> Result<(), CodecError>;

    /// Hard reset: discard configuration and any in-flight work. Used
    /// when a run is cancelled or aborts; the backend must be ready for
    /// a fresh `configure` afterwards.
    fn reset(&mut self);
}

impl<T: CodecBackend + ?Sized> CodecBackend for Box<T> {
    type Config = T::Config;
    type Input = T::Input;
    type Output = T::Output;

    fn configure(&mut self, config: &Self::Config) -> Result<(), CodecError> {
        (**self).configure(config)
    }

    fn submit(&mut self, input: Self::Input) -> Result<(), CodecError> {
        (**self).submit(input)
    }

    fn poll_output(&mut self) -> Result<Option<Self::Output>, CodecError> {
        (**self).poll_output()
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        (**self).flush()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

impl<T: CodecBackend + ?Sized> CodecBackend for &mut T {
    type Config = T::Config;
    type Input = T::Input;
    type Output = T::Output;

    fn configure(&mut self, config: &Self::Config) -> Result<(), CodecError> {
        (**self).configure(config)
    }

    fn submit(&mut self, input: Self::Input) -> Result<(), CodecError> {
        (**self).submit(input)
    }

    fn poll_output(&mut self) -> Result<Option<Self::Output>, CodecError> {
        (**self).poll_output()
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        (**self).flush()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

pub type BoxedVideoDecoder =
    Box<dyn CodecBackend<Config = VideoDecoderConfig, Input = EncodedChunk, Output = RawFrame>>;

pub type BoxedAudioDecoder = Box<
    dyn CodecBackend<Config = AudioDecoderConfig, Input = EncodedChunk, Output = RawAudioChunk>,
>;

pub type BoxedVideoEncoder =
    Box<dyn CodecBackend<Config = VideoEncoderConfig, Input = EncodeRequest, Output = EncodedChunk>>;

pub type BoxedAudioEncoder = Box<
    dyn CodecBackend<Config = AudioEncoderConfig, Input = RawAudioChunk, Output = EncodedChunk>,
>;
