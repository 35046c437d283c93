//! Shared fixtures: synthetic sources built with the reference
//! backends and the buffered muxer, so every integration test consumes
//! real container bytes.
//!
//! Frame producers are iterators so large fixtures never hold all
//! their raw frames in memory at once.

use bytes::Bytes;

use recast::pipeline::{CodecSet, Pipeline};
use recast_codec::testing::{
    PcmAudioDecoder, PcmAudioEncoder, RleVideoDecoder, RleVideoEncoder,
};
use recast_codec::{
    AudioEncoderConfig, CodecBackend, EncodeRequest, EncodedChunk, RawAudioChunk, RawFrame,
    VideoEncoderConfig,
};
use recast_mux::{AudioTrackParams, Mp4Mux, VideoTrackParams};

pub const FRAME_DURATION_MICROS: i64 = 33_333;

pub fn reference_pipeline() -> Pipeline {
    Pipeline::new(CodecSet {
        video_decoder: Box::new(RleVideoDecoder::new()),
        video_encoder: Box::new(RleVideoEncoder::new()),
        audio_decoder: Box::new(PcmAudioDecoder::new()),
        audio_encoder: Box::new(PcmAudioEncoder::new()),
    })
}

/// A frame filled with one color; timestamps advance at ~30fps.
pub fn solid_frame(index: usize, width: u32, height: u32, rgba: [u8; 4]) -> RawFrame {
    let mut data = Vec::with_capacity((width * height) as usize * 4);
    for _ in 0..width * height {
        data.extend_from_slice(&rgba);
    }
    RawFrame::rgba(
        index as i64 * FRAME_DURATION_MICROS,
        FRAME_DURATION_MICROS,
        width,
        height,
        Bytes::from(data),
    )
    .expect("fixture frame dimensions")
}

pub fn encode_frames(
    width: u32,
    height: u32,
    frames: impl IntoIterator<Item = RawFrame>,
) -> Vec<EncodedChunk> {
    let mut encoder = RleVideoEncoder::new();
    encoder
        .configure(&VideoEncoderConfig {
            codec: "vp09.00.10.08".to_owned(),
            width,
            height,
            bitrate: None,
        })
        .expect("configure fixture encoder");

    let mut chunks = Vec::new();
    for frame in frames {
        encoder
            .submit(EncodeRequest {
                frame,
                key_frame: true,
            })
            .expect("encode fixture frame");
        while let Some(chunk) = encoder.poll_output().expect("poll fixture encoder") {
            chunks.push(chunk);
        }
    }
    encoder.flush().expect("flush fixture encoder");
    while let Some(chunk) = encoder.poll_output().expect("drain fixture encoder") {
        chunks.push(chunk);
    }
    chunks
}

pub fn encode_audio(chunks: &[RawAudioChunk]) -> Vec<EncodedChunk> {
    let first = chunks.first().expect("at least one audio chunk");
    let mut encoder = PcmAudioEncoder::new();
    encoder
        .configure(&AudioEncoderConfig {
            codec: "mp4a.40.2".to_owned(),
            sample_rate: first.sample_rate,
            channel_count: first.channel_count,
            bitrate: None,
        })
        .expect("configure fixture audio encoder");

    let mut out = Vec::new();
    for chunk in chunks {
        encoder.submit(chunk.clone()).expect("encode fixture audio");
        while let Some(encoded) = encoder.poll_output().expect("poll fixture audio") {
            out.push(encoded);
        }
    }
    out
}

pub fn pcm_chunk(index: usize, sample_rate: u32, channel_count: u32) -> RawAudioChunk {
    let frames_per_chunk = 1024usize;
    let duration = 1_000_000 * frames_per_chunk as i64 / sample_rate as i64;
    let samples = vec![0u8; frames_per_chunk * channel_count as usize * 4];
    RawAudioChunk {
        timestamp_micros: index as i64 * duration,
        duration_micros: duration,
        sample_rate,
        channel_count,
        samples: Bytes::from(samples),
    }
}

/// A progressive MP4 with one RLE video track.
pub fn video_file(
    width: u32,
    height: u32,
    frames: impl IntoIterator<Item = RawFrame>,
) -> Bytes {
    let mut mux = Mp4Mux::buffered(
        Some(VideoTrackParams {
            codec: "vp09.00.10.08".to_owned(),
            width,
            height,
            description: None,
        }),
        None,
    )
    .expect("fixture mux");

    for chunk in encode_frames(width, height, frames) {
        mux.add_video_chunk(&chunk).expect("fixture video chunk");
    }
    mux.finalize().expect("fixture finalize")
}

/// A progressive MP4 with an RLE video track and a PCM audio track.
pub fn av_file(
    width: u32,
    height: u32,
    frames: impl IntoIterator<Item = RawFrame>,
    audio: &[RawAudioChunk],
) -> Bytes {
    let first_audio = audio.first().expect("at least one audio chunk");

    let mut mux = Mp4Mux::buffered(
        Some(VideoTrackParams {
            codec: "vp09.00.10.08".to_owned(),
            width,
            height,
            description: None,
        }),
        Some(AudioTrackParams {
            codec: "mp4a.40.2".to_owned(),
            sample_rate: first_audio.sample_rate,
            channel_count: first_audio.channel_count,
            description: None,
        }),
    )
    .expect("fixture mux");

    for chunk in encode_frames(width, height, frames) {
        mux.add_video_chunk(&chunk).expect("fixture video chunk");
    }
    for chunk in encode_audio(audio) {
        mux.add_audio_chunk(&chunk).expect("fixture audio chunk");
    }
    mux.finalize().expect("fixture finalize")
}
