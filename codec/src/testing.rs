//! Reference software backends.
//!
//! These implement [`CodecBackend`] without any real bitstream work:
//! video is stored as run-length-coded RGBA (every chunk is
//! self-contained), audio as raw f32 PCM. They exist so the pipeline,
//! muxer and tests can exercise the full capability boundary without
//! linking a hardware codec, and they advertise the same codec strings
//! a real capability would (`vp09.*`, `mp4a.40.2`) so the container
//! layer treats their output like any other track.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::backend::CodecBackend;
use crate::types::{
    AudioDecoderConfig, AudioEncoderConfig, ChunkKind, DecoderMetadata, EncodeRequest,
    EncodedChunk, RawAudioChunk, RawFrame, VideoDecoderConfig, VideoEncoderConfig,
};
use crate::CodecError;

/// Run-length encode an RGBA frame: `u32 width, u32 height`, then
/// `(u32 run, [r, g, b, a])` pairs, all big-endian.
fn rle_encode(frame: &RawFrame) -> Bytes {
    let mut out = BytesMut::with_capacity(64);
    out.put_u32(frame.width);
    out.put_u32(frame.height);

    let mut pixels = frame.data.chunks_exact(4);
    if let Some(first) = pixels.next() {
        let mut current: [u8; 4] = first.try_into().unwrap();
        let mut run: u32 = 1;
        for px in pixels {
            if px == current && run < u32::MAX {
                run += 1;
            } else {
                out.put_u32(run);
                out.put_slice(&current);
                current = px.try_into().unwrap();
                run = 1;
            }
        }
        out.put_u32(run);
        out.put_slice(&current);
    }

    out.freeze()
}

fn rle_decode(mut data: &[u8]) -> Result<(u32, u32, Bytes), CodecError> {
    if data.remaining() < 8 {
        return Err(CodecError::InvalidInput("rle chunk too short".to_owned()));
    }

    let width = data.get_u32();
    let height = data.get_u32();
    let expected = width as usize * height as usize * 4;

    let mut out = BytesMut::with_capacity(expected);
    while data.remaining() >= 8 {
        let run = data.get_u32() as usize;
        let mut px = [0u8; 4];
        data.copy_to_slice(&mut px);
        if out.len() + run * 4 > expected {
            return Err(CodecError::InvalidInput("rle run overflows frame".to_owned()));
        }
        for _ in 0..run {
            out.put_slice(&px);
        }
    }

    if out.len() != expected {
        return Err(CodecError::InvalidInput(format!(
            "rle chunk decoded {} bytes, expected {}",
            out.len(),
            expected
        )));
    }

    Ok((width, height, out.freeze()))
}

/// A `vpcC`-shaped description blob: profile 0, level 1.0, 8-bit 4:2:0.
pub fn vp9_description() -> Bytes {
    Bytes::from_static(&[
        1, 0, 0, 0, // full box version + flags
        0,    // profile
        10,   // level
        (8 << 4) | (1 << 1), // bit depth / chroma subsampling
        1, 1, 1, // primaries, transfer, matrix
        0, 0, // codec initialization data size
    ])
}

/// AudioSpecificConfig for AAC LC at the given rate and channel count.
pub fn audio_specific_config(sample_rate: u32, channel_count: u32) -> Bytes {
    const RATES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];
    let freq_index = RATES
        .iter()
        .position(|&r| r == sample_rate)
        .unwrap_or(4) as u16; // default 44100
    let object_type: u16 = 2; // AAC LC

    let bits = (object_type << 11) | (freq_index << 7) | ((channel_count as u16 & 0xf) << 3);
    Bytes::copy_from_slice(&bits.to_be_bytes())
}

#[derive(Default)]
pub struct RleVideoEncoder {
    config: Option<VideoEncoderConfig>,
    queue: VecDeque<EncodedChunk>,
    emitted_metadata: bool,
}

impl RleVideoEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodecBackend for RleVideoEncoder {
    type Config = VideoEncoderConfig;
    type Input = EncodeRequest;
    type Output = EncodedChunk;

    fn configure(&mut self, config: &VideoEncoderConfig) -> Result<(), CodecError> {
        if config.width == 0 || config.height == 0 {
            return Err(CodecError::ConfigurationRejected(format!(
                "bad dimensions {}x{}",
                config.width, config.height
            )));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn submit(&mut self, request: EncodeRequest) -> Result<(), CodecError> {
        let config = self.config.as_ref().ok_or(CodecError::NotConfigured)?;
        let frame = request.frame;
        if frame.width != config.width || frame.height != config.height {
            return Err(CodecError::InvalidInput(format!(
                "frame {}x{} does not match configured {}x{}",
                frame.width, frame.height, config.width, config.height
            )));
        }

        let data = rle_encode(&frame);
        let metadata = if self.emitted_metadata {
            None
        } else {
            self.emitted_metadata = true;
            Some(DecoderMetadata {
                description: Some(vp9_description()),
            })
        };

        self.queue.push_back(EncodedChunk {
            // Every RLE chunk is self-contained; the hint still decides
            // what the container calls a sync sample.
            kind: if request.key_frame {
                ChunkKind::Key
            } else {
                ChunkKind::Delta
            },
            timestamp_micros: frame.timestamp_micros,
            duration_micros: frame.duration_micros,
            data,
            metadata,
        });
        Ok(())
    }

    fn poll_output(&mut self) -> Result<Option<EncodedChunk>, CodecError> {
        Ok(self.queue.pop_front())
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn reset(&mut self) {
        self.config = None;
        self.queue.clear();
        self.emitted_metadata = false;
    }
}

#[derive(Default)]
pub struct RleVideoDecoder {
    config: Option<VideoDecoderConfig>,
    queue: VecDeque<RawFrame>,
}

impl RleVideoDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodecBackend for RleVideoDecoder {
    type Config = VideoDecoderConfig;
    type Input = EncodedChunk;
    type Output = RawFrame;

    fn configure(&mut self, config: &VideoDecoderConfig) -> Result<(), CodecError> {
        if config.coded_width == 0 || config.coded_height == 0 {
            return Err(CodecError::ConfigurationRejected(format!(
                "bad coded dimensions {}x{}",
                config.coded_width, config.coded_height
            )));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn submit(&mut self, chunk: EncodedChunk) -> Result<(), CodecError> {
        if self.config.is_none() {
            return Err(CodecError::NotConfigured);
        }

        let (width, height, data) = rle_decode(&chunk.data)?;
        self.queue.push_back(RawFrame {
            timestamp_micros: chunk.timestamp_micros,
            duration_micros: chunk.duration_micros,
            width,
            height,
            data,
        });
        Ok(())
    }

    fn poll_output(&mut self) -> Result<Option<RawFrame>, CodecError> {
        Ok(self.queue.pop_front())
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn reset(&mut self) {
        self.config = None;
        self.queue.clear();
    }
}

#[derive(Default)]
pub struct PcmAudioEncoder {
    config: Option<AudioEncoderConfig>,
    queue: VecDeque<EncodedChunk>,
    emitted_metadata: bool,
}

impl PcmAudioEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodecBackend for PcmAudioEncoder {
    type Config = AudioEncoderConfig;
    type Input = RawAudioChunk;
    type Output = EncodedChunk;

    fn configure(&mut self, config: &AudioEncoderConfig) -> Result<(), CodecError> {
        if config.sample_rate == 0 || config.channel_count == 0 {
            return Err(CodecError::ConfigurationRejected(
                "zero sample rate or channel count".to_owned(),
            ));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn submit(&mut self, audio: RawAudioChunk) -> Result<(), CodecError> {
        let config = self.config.as_ref().ok_or(CodecError::NotConfigured)?;

        let metadata = if self.emitted_metadata {
            None
        } else {
            self.emitted_metadata = true;
            Some(DecoderMetadata {
                description: Some(audio_specific_config(
                    config.sample_rate,
                    config.channel_count,
                )),
            })
        };

        self.queue.push_back(EncodedChunk {
            kind: ChunkKind::Key,
            timestamp_micros: audio.timestamp_micros,
            duration_micros: audio.duration_micros,
            data: audio.samples,
            metadata,
        });
        Ok(())
    }

    fn poll_output(&mut self) -> Result<Option<EncodedChunk>, CodecError> {
        Ok(self.queue.pop_front())
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn reset(&mut self) {
        self.config = None;
        self.queue.clear();
        self.emitted_metadata = false;
    }
}

#[derive(Default)]
pub struct PcmAudioDecoder {
    config: Option<AudioDecoderConfig>,
    queue: VecDeque<RawAudioChunk>,
}

impl PcmAudioDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodecBackend for PcmAudioDecoder {
    type Config = AudioDecoderConfig;
    type Input = EncodedChunk;
    type Output = RawAudioChunk;

    fn configure(&mut self, config: &AudioDecoderConfig) -> Result<(), CodecError> {
        if config.sample_rate == 0 || config.channel_count == 0 {
            return Err(CodecError::ConfigurationRejected(
                "zero sample rate or channel count".to_owned(),
            ));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn submit(&mut self, chunk: EncodedChunk) -> Result<(), CodecError> {
        let config = self.config.as_ref().ok_or(CodecError::NotConfigured)?;

        self.queue.push_back(RawAudioChunk {
            timestamp_micros: chunk.timestamp_micros,
            duration_micros: chunk.duration_micros,
            sample_rate: config.sample_rate,
            channel_count: config.channel_count,
            samples: chunk.data,
        });
        Ok(())
    }

    fn poll_output(&mut self) -> Result<Option<RawAudioChunk>, CodecError> {
        Ok(self.queue.pop_front())
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn reset(&mut self) {
        self.config = None;
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(timestamp: i64, width: u32, height: u32, rgba: [u8; 4]) -> RawFrame {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect::<Vec<u8>>();
        RawFrame::rgba(timestamp, 33_333, width, height, Bytes::from(data)).unwrap()
    }

    #[test]
    fn rle_round_trip() {
        let frame = solid_frame(0, 16, 8, [10, 20, 30, 255]);
        let encoded = rle_encode(&frame);
        let (w, h, data) = rle_decode(&encoded).unwrap();
        assert_eq!((w, h), (16, 8));
        assert_eq!(data, frame.data);
    }

    #[test]
    fn encoder_emits_metadata_once() {
        let mut enc = RleVideoEncoder::new();
        enc.configure(&VideoEncoderConfig {
            codec: "vp09.00.10.08".to_owned(),
            width: 4,
            height: 4,
            bitrate: Some(1_000_000),
        })
        .unwrap();

        for ts in [0, 33_333] {
            enc.submit(EncodeRequest {
                frame: solid_frame(ts, 4, 4, [1, 2, 3, 4]),
                key_frame: ts == 0,
            })
            .unwrap();
        }

        let first = enc.poll_output().unwrap().unwrap();
        let second = enc.poll_output().unwrap().unwrap();
        assert!(first.metadata.is_some());
        assert!(second.metadata.is_none());
        assert_eq!(first.kind, ChunkKind::Key);
        assert_eq!(second.kind, ChunkKind::Delta);
    }

    #[test]
    fn submit_before_configure_fails() {
        let mut enc = RleVideoEncoder::new();
        let err = enc
            .submit(EncodeRequest {
                frame: solid_frame(0, 4, 4, [0, 0, 0, 0]),
                key_frame: true,
            })
            .unwrap_err();
        assert!(matches!(err, CodecError::NotConfigured));
    }

    #[test]
    fn asc_packs_rate_and_channels() {
        // AAC LC (2), 48kHz (index 3), stereo (2):
        // 00010 0011 0010 000 = 0x11 0x90
        assert_eq!(&audio_specific_config(48_000, 2)[..], &[0x11, 0x90]);
    }

    #[test]
    fn decoder_rejects_truncated_chunk() {
        let mut dec = RleVideoDecoder::new();
        dec.configure(&VideoDecoderConfig {
            codec: "vp09.00.10.08".to_owned(),
            coded_width: 4,
            coded_height: 4,
            description: Some(vp9_description()),
        })
        .unwrap();

        let err = dec
            .submit(EncodedChunk {
                kind: ChunkKind::Key,
                timestamp_micros: 0,
                duration_micros: 0,
                data: Bytes::from_static(&[0, 0]),
                metadata: None,
            })
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidInput(_)));
    }
}
