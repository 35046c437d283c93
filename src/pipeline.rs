//! Pipeline orchestrator: one run wires demux, decode, transform,
//! encode, and mux together on a single task.
//!
//! The codec backends are injected at construction and live behind a
//! `tokio::sync::Mutex`; a run takes the lock with `try_lock`, so a
//! second concurrent run fails fast with [`Error::Busy`] instead of
//! queueing. Backends are reset before the lock is released, whether
//! the run finished, failed, or was cancelled mid-flight.

use bytes::Bytes;
use futures::future;
use log::{debug, info, warn};
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot, Mutex};

use recast_codec::{
    AudioEncoderConfig, BoxedAudioDecoder, BoxedAudioEncoder, BoxedVideoDecoder,
    BoxedVideoEncoder, CodecError, CodecStage, EncodeRequest, EncodedChunk, VideoDecoderConfig,
    VideoEncoderConfig,
};
use recast_codec::{AudioDecoderConfig, CodecBackend};
use recast_demux::{TrackConfig, VideoParams};
use recast_mux::{AudioTrackParams, Mp4Mux, VideoTrackParams};

use crate::demux::{demux_source, MediaEvent};
use crate::probe::sniff_mime;
use crate::transform::{ChromaKey, Crop, CropRect, Transform, Watermark};
use crate::Error;

/// Events and media buffered between stages. Every stage output is
/// drained by its own future, so capacity only shapes batching, never
/// correctness.
const CHANNEL_CAPACITY: usize = 16;

pub struct CodecSet {
    pub video_decoder: BoxedVideoDecoder,
    pub video_encoder: BoxedVideoEncoder,
    pub audio_decoder: BoxedAudioDecoder,
    pub audio_encoder: BoxedAudioEncoder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One complete progressive MP4.
    Buffered,
    /// Init segment plus moof/mdat fragments.
    Fragmented,
}

#[derive(Debug, Clone)]
pub enum TransformConfig {
    Crop(CropRect),
    Watermark,
    ChromaKey { key_color: [u8; 3] },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Codec the video encoder is asked for.
    pub video_codec: String,
    pub video_bitrate: Option<u64>,
    pub transform: Option<TransformConfig>,
    /// Codec the audio encoder is asked for; rate and channel count
    /// follow the decoded source audio.
    pub audio_codec: String,
    pub mode: OutputMode,
}

impl Default for PipelineConfig {
    fn default() -> PipelineConfig {
        PipelineConfig {
            video_codec: "vp09.00.10.08".to_owned(),
            video_bitrate: Some(1_000_000),
            transform: None,
            audio_codec: "mp4a.40.2".to_owned(),
            mode: OutputMode::Buffered,
        }
    }
}

#[derive(Debug)]
pub enum PipelineOutput {
    File { mime: &'static str, data: Bytes },
    Segments(Vec<Bytes>),
}

/// Commands from the encode paths to the mux future. Each path first
/// declares its track (or reports it absent), then streams chunks,
/// then marks its end.
#[derive(Debug)]
enum MuxCommand {
    DeclareVideo(VideoTrackParams),
    NoVideo,
    DeclareAudio(AudioTrackParams),
    NoAudio,
    Video(EncodedChunk),
    Audio(EncodedChunk),
    VideoEnd,
    AudioEnd,
}

pub struct Pipeline {
    codecs: Mutex<CodecSet>,
}

impl Pipeline {
    pub fn new(codecs: CodecSet) -> Pipeline {
        Pipeline {
            codecs: Mutex::new(codecs),
        }
    }

    /// Transcode one source to completion. Exactly one run at a time;
    /// a second caller gets [`Error::Busy`] immediately.
    pub async fn run<R>(&self, source: R, config: PipelineConfig) -> Result<PipelineOutput, Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut guard = self.codecs.try_lock().map_err(|_| Error::Busy)?;
        let codecs = ResetOnDrop(&mut guard);
        run_inner(codecs.0, source, config).await
    }
}

/// Hard-resets every backend when the run ends, including when the run
/// future is dropped mid-await.
struct ResetOnDrop<'a>(&'a mut CodecSet);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.video_decoder.reset();
        self.0.video_encoder.reset();
        self.0.audio_decoder.reset();
        self.0.audio_encoder.reset();
    }
}

async fn run_inner<R>(
    codecs: &mut CodecSet,
    source: R,
    config: PipelineConfig,
) -> Result<PipelineOutput, Error>
where
    R: AsyncRead + Unpin,
{
    let PipelineConfig {
        video_codec,
        video_bitrate,
        transform,
        audio_codec,
        mode,
    } = config;

    let CodecSet {
        video_decoder,
        video_encoder,
        audio_decoder,
        audio_encoder,
    } = codecs;

    let (media_tx, mut media_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (mux_tx, mux_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (video_info_tx, video_info_rx) = oneshot::channel();
    let (audio_info_tx, audio_info_rx) = oneshot::channel();

    let (video_decode, mut decoded_video) = CodecStage::new(&mut *video_decoder, CHANNEL_CAPACITY);
    let (audio_decode, mut decoded_audio) = CodecStage::new(&mut *audio_decoder, CHANNEL_CAPACITY);
    let (mut video_encode, mut encoded_video) =
        CodecStage::new(&mut *video_encoder, CHANNEL_CAPACITY);
    let (mut audio_encode, mut encoded_audio) =
        CodecStage::new(&mut *audio_encoder, CHANNEL_CAPACITY);

    // 1. demux: source bytes in, configured decode stages fed.
    let demux_decode = async {
        let ingest = demux_source(source, media_tx);

        let feed = async {
            let mut video_stage = Some(video_decode);
            let mut audio_stage = Some(audio_decode);
            let mut video_info_tx = Some(video_info_tx);
            let mut audio_info_tx = Some(audio_info_tx);

            while let Some(event) = media_rx.recv().await {
                match event {
                    MediaEvent::Ready(info) => {
                        let video = info
                            .first_video()
                            .filter(|t| t.is_usable())
                            .and_then(|t| match &t.config {
                                TrackConfig::Video(params) => Some(params.clone()),
                                _ => None,
                            });
                        let audio = info
                            .first_audio()
                            .filter(|t| t.is_usable())
                            .and_then(|t| match &t.config {
                                TrackConfig::Audio(params) => Some(params.clone()),
                                _ => None,
                            });

                        match &video {
                            Some(params) => {
                                let run_transform = build_transform(&transform, params)?;
                                if let Some(stage) = video_stage.as_mut() {
                                    stage.configure(&VideoDecoderConfig {
                                        codec: params.codec.clone(),
                                        coded_width: params.width,
                                        coded_height: params.height,
                                        description: Some(params.description.clone()),
                                    })?;
                                }
                                if let Some(tx) = video_info_tx.take() {
                                    let _ = tx.send((params.clone(), run_transform));
                                }
                            }
                            None => {
                                // closes the decoded-video channel
                                video_stage = None;
                                video_info_tx = None;
                            }
                        }

                        match &audio {
                            Some(params) => {
                                if let Some(stage) = audio_stage.as_mut() {
                                    stage.configure(&AudioDecoderConfig {
                                        codec: params.codec.clone(),
                                        sample_rate: params.sample_rate,
                                        channel_count: params.channel_count,
                                        description: params.description.clone(),
                                    })?;
                                }
                                if let Some(tx) = audio_info_tx.take() {
                                    let _ = tx.send(params.clone());
                                }
                            }
                            None => {
                                audio_stage = None;
                                audio_info_tx = None;
                            }
                        }

                        if video.is_none() && audio.is_none() {
                            return Err(Error::InvalidConfig(
                                "source has no usable tracks".to_owned(),
                            ));
                        }
                    }
                    MediaEvent::Video(chunk) => {
                        if let Some(stage) = video_stage.as_mut() {
                            stage.submit(chunk).await?;
                        }
                    }
                    MediaEvent::Audio(chunk) => {
                        if let Some(stage) = audio_stage.as_mut() {
                            stage.submit(chunk).await?;
                        }
                    }
                }
            }

            if let Some(stage) = video_stage.take() {
                stage.finish().await?;
            }
            if let Some(stage) = audio_stage.take() {
                stage.finish().await?;
            }
            Ok::<(), Error>(())
        };

        future::try_join(ingest, feed).await?;
        Ok::<(), Error>(())
    };

    // 2. video path: decoded frames through the transform into the
    // encoder, encoder configured from the first transformed frame.
    // Submit and drain are separate futures: a backend may hold its
    // whole output until flush, and the encoded channel has to keep
    // moving while finish() delivers it.
    let video_mux_tx = mux_tx.clone();
    let video_path = async move {
        let Ok((params, mut transform)) = video_info_rx.await else {
            send_mux(&video_mux_tx, MuxCommand::NoVideo).await?;
            return Ok::<(), Error>(());
        };
        debug!("video path up: source {}x{}", params.width, params.height);

        let encode = async {
            let mut configured = false;
            while let Some(frame) = decoded_video.recv().await {
                let frame = match transform.as_mut() {
                    Some(transform) => match transform.apply(frame) {
                        Ok(Some(frame)) => frame,
                        Ok(None) => continue,
                        Err(err) => {
                            warn!("transform failed, dropping frame: {}", err);
                            continue;
                        }
                    },
                    None => frame,
                };

                if !configured {
                    video_encode.configure(&VideoEncoderConfig {
                        codec: video_codec.clone(),
                        width: frame.width,
                        height: frame.height,
                        bitrate: video_bitrate,
                    })?;
                    send_mux(
                        &video_mux_tx,
                        MuxCommand::DeclareVideo(VideoTrackParams {
                            codec: video_codec.clone(),
                            width: frame.width,
                            height: frame.height,
                            description: None,
                        }),
                    )
                    .await?;
                    configured = true;
                }

                video_encode
                    .submit(EncodeRequest {
                        frame,
                        key_frame: true,
                    })
                    .await?;
            }

            if configured {
                video_encode.finish().await?;
            } else {
                // dropping the stage closes the encoded channel
                video_encode.abort();
                send_mux(&video_mux_tx, MuxCommand::NoVideo).await?;
            }
            Ok::<bool, Error>(configured)
        };

        let drain = async {
            while let Some(chunk) = encoded_video.recv().await {
                send_mux(&video_mux_tx, MuxCommand::Video(chunk)).await?;
            }
            Ok::<(), Error>(())
        };

        let (configured, ()) = future::try_join(encode, drain).await?;
        if configured {
            send_mux(&video_mux_tx, MuxCommand::VideoEnd).await?;
        }
        Ok(())
    };

    // 3. audio path: encoder configured straight from the decoded
    // source parameters.
    let audio_mux_tx = mux_tx.clone();
    drop(mux_tx);
    let audio_path = async move {
        let Ok(params) = audio_info_rx.await else {
            send_mux(&audio_mux_tx, MuxCommand::NoAudio).await?;
            return Ok::<(), Error>(());
        };
        debug!(
            "audio path up: {} Hz, {} channels",
            params.sample_rate, params.channel_count
        );

        audio_encode.configure(&AudioEncoderConfig {
            codec: audio_codec.clone(),
            sample_rate: params.sample_rate,
            channel_count: params.channel_count,
            bitrate: None,
        })?;
        send_mux(
            &audio_mux_tx,
            MuxCommand::DeclareAudio(AudioTrackParams {
                codec: audio_codec.clone(),
                sample_rate: params.sample_rate,
                channel_count: params.channel_count,
                description: None,
            }),
        )
        .await?;

        let encode = async {
            while let Some(chunk) = decoded_audio.recv().await {
                audio_encode.submit(chunk).await?;
            }
            audio_encode.finish().await?;
            Ok::<(), Error>(())
        };

        let drain = async {
            while let Some(chunk) = encoded_audio.recv().await {
                send_mux(&audio_mux_tx, MuxCommand::Audio(chunk)).await?;
            }
            Ok::<(), Error>(())
        };

        future::try_join(encode, drain).await?;
        send_mux(&audio_mux_tx, MuxCommand::AudioEnd).await?;
        Ok(())
    };

    // 4. mux: declarations first, then chunks until both tracks end.
    let mux = mux_future(mux_rx, mode);

    let (_, _, _, output) = tokio::try_join!(demux_decode, video_path, audio_path, mux)?;
    Ok(output)
}

fn build_transform(
    config: &Option<TransformConfig>,
    video: &VideoParams,
) -> Result<Option<Transform>, Error> {
    match config {
        None => Ok(None),
        Some(TransformConfig::Crop(rect)) => Ok(Some(Transform::Crop(Crop::new(
            *rect,
            video.width,
            video.height,
        )?))),
        Some(TransformConfig::Watermark) => Ok(Some(Transform::Watermark(Watermark::new()))),
        Some(TransformConfig::ChromaKey { key_color }) => {
            Ok(Some(Transform::ChromaKey(ChromaKey::new(*key_color))))
        }
    }
}

async fn send_mux(tx: &mpsc::Sender<MuxCommand>, command: MuxCommand) -> Result<(), Error> {
    tx.send(command)
        .await
        .map_err(|_| Error::Codec(CodecError::ChannelClosed))
}

async fn mux_future(
    mut rx: mpsc::Receiver<MuxCommand>,
    mode: OutputMode,
) -> Result<PipelineOutput, Error> {
    let mut video: Option<Option<VideoTrackParams>> = None;
    let mut audio: Option<Option<AudioTrackParams>> = None;
    let mut held: Vec<MuxCommand> = Vec::new();
    let mut mux: Option<Mp4Mux> = None;
    let mut segments: Vec<Bytes> = Vec::new();
    let mut pending_video_end = false;
    let mut pending_audio_end = false;

    while let Some(command) = rx.recv().await {
        match command {
            MuxCommand::DeclareVideo(params) => video = Some(Some(params)),
            MuxCommand::NoVideo => {
                video = Some(None);
                pending_video_end = true;
            }
            MuxCommand::DeclareAudio(params) => audio = Some(Some(params)),
            MuxCommand::NoAudio => {
                audio = Some(None);
                pending_audio_end = true;
            }
            MuxCommand::VideoEnd => pending_video_end = true,
            MuxCommand::AudioEnd => pending_audio_end = true,
            chunk => match mux.as_mut() {
                Some(mux) => feed_chunk(mux, chunk, &mut segments)?,
                None => held.push(chunk),
            },
        }

        if mux.is_none() {
            if let (Some(video), Some(audio)) = (&video, &audio) {
                if video.is_none() && audio.is_none() {
                    return Err(Error::InvalidConfig(
                        "source has no usable tracks".to_owned(),
                    ));
                }

                let built = match mode {
                    OutputMode::Buffered => Mp4Mux::buffered(video.clone(), audio.clone())?,
                    OutputMode::Fragmented => Mp4Mux::fragmented(video.clone(), audio.clone())?,
                };
                let built = mux.insert(built);
                for chunk in held.drain(..) {
                    feed_chunk(built, chunk, &mut segments)?;
                }
            }
        }

        if pending_video_end && pending_audio_end {
            break;
        }
    }

    let mux = mux.ok_or_else(|| {
        Error::InvalidConfig("pipeline ended before any track was declared".to_owned())
    })?;

    let tail = mux.finalize()?;
    info!("mux finalized: {} bytes", tail.len());

    match mode {
        OutputMode::Buffered => Ok(PipelineOutput::File {
            mime: sniff_mime(&tail),
            data: tail,
        }),
        OutputMode::Fragmented => {
            if !tail.is_empty() {
                segments.push(tail);
            }
            Ok(PipelineOutput::Segments(segments))
        }
    }
}

fn feed_chunk(mux: &mut Mp4Mux, command: MuxCommand, segments: &mut Vec<Bytes>) -> Result<(), Error> {
    let emitted = match command {
        MuxCommand::Video(chunk) => mux.add_video_chunk(&chunk)?,
        MuxCommand::Audio(chunk) => mux.add_audio_chunk(&chunk)?,
        _ => Vec::new(),
    };
    segments.extend(emitted);
    Ok(())
}
