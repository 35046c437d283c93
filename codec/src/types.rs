use bytes::Bytes;

/// A decoded video frame: RGBA8, row-major, no row padding.
///
/// Frames are owned by exactly one stage at a time; handing a frame to
/// the next stage moves it, and dropping it releases the backing
/// buffer. Stages must drop their input as soon as output has been
/// derived from it rather than holding it across an await point.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub timestamp_micros: i64,
    pub duration_micros: i64,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl RawFrame {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Wrap an RGBA buffer, checking that it matches the dimensions.
    pub fn rgba(
        timestamp_micros: i64,
        duration_micros: i64,
        width: u32,
        height: u32,
        data: Bytes,
    ) -> Option<RawFrame> {
        if data.len() != width as usize * height as usize * Self::BYTES_PER_PIXEL {
            return None;
        }

        Some(RawFrame {
            timestamp_micros,
            duration_micros,
            width,
            height,
            data,
        })
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.width as usize * Self::BYTES_PER_PIXEL;
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }
}

/// A decoded run of audio: f32 samples, interleaved by channel.
#[derive(Debug, Clone)]
pub struct RawAudioChunk {
    pub timestamp_micros: i64,
    pub duration_micros: i64,
    pub sample_rate: u32,
    pub channel_count: u32,
    pub samples: Bytes,
}

impl RawAudioChunk {
    /// Number of sample frames (one sample across all channels).
    pub fn frame_count(&self) -> usize {
        self.samples.len() / 4 / self.channel_count.max(1) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Key,
    Delta,
}

/// Out-of-band decoder configuration attached to an encoder's first
/// output (the shape muxers expect to seed the sample description).
#[derive(Debug, Clone)]
pub struct DecoderMetadata {
    pub description: Option<Bytes>,
}

/// One compressed unit of a single track.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub kind: ChunkKind,
    pub timestamp_micros: i64,
    pub duration_micros: i64,
    pub data: Bytes,
    pub metadata: Option<DecoderMetadata>,
}

impl EncodedChunk {
    pub fn is_key(&self) -> bool {
        self.kind == ChunkKind::Key
    }
}

#[derive(Debug, Clone)]
pub struct VideoDecoderConfig {
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    pub description: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct AudioDecoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channel_count: u32,
    pub description: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct VideoEncoderConfig {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AudioEncoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channel_count: u32,
    pub bitrate: Option<u64>,
}

/// A frame submitted for encoding along with its keyframe hint.
#[derive(Debug)]
pub struct EncodeRequest {
    pub frame: RawFrame,
    pub key_frame: bool,
}
