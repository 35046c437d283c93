//! The `Mp4Mux` front door.
//!
//! Two modes share one chunk-feeding API. Buffered mode collects every
//! chunk and assembles a whole progressive file at `finalize`.
//! Fragmented mode holds chunks only until every declared track has
//! produced its decoder configuration, then emits an init segment and
//! one moof+mdat fragment per chunk for the caller to append to a live
//! playback buffer.

use std::io::Cursor;

use bytes::Bytes;
use log::debug;

use recast_codec::EncodedChunk;

use crate::atoms::{write_sized_header, MEDIA_TIMESCALE, MOVIE_TIMESCALE};
use crate::mp4::{
    self, FragmentSample, SampleDescription, SampleInfo, TrackDesc, VideoEntryKind,
};
use crate::{MuxError, MuxResult};

pub const VIDEO_TRACK_ID: u32 = 1;
pub const AUDIO_TRACK_ID: u32 = 2;

#[derive(Debug, Clone)]
pub struct VideoTrackParams {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Decoder configuration record. May be omitted here and supplied
    /// by the first chunk's metadata instead.
    pub description: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct AudioTrackParams {
    pub codec: String,
    pub sample_rate: u32,
    pub channel_count: u32,
    pub description: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Buffered,
    Fragmented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackSlot {
    Video,
    Audio,
}

impl TrackSlot {
    fn name(&self) -> &'static str {
        match self {
            TrackSlot::Video => "video",
            TrackSlot::Audio => "audio",
        }
    }
}

#[derive(Debug)]
struct PendingSample {
    data: Bytes,
    duration: u32,
    sync: bool,
}

#[derive(Debug)]
struct TrackState {
    description: Option<Bytes>,
    previous_timestamp: Option<i64>,
    /// Sum of sample durations, in media ticks (microseconds).
    total_duration: u64,
    /// Buffered-mode sample accumulator.
    samples: Vec<PendingSample>,
    /// Fragmented-mode tfdt base for the next fragment.
    base_decode_time: u64,
    chunk_seen: bool,
}

impl TrackState {
    fn new(description: Option<Bytes>) -> TrackState {
        TrackState {
            description,
            previous_timestamp: None,
            total_duration: 0,
            samples: Vec::new(),
            base_decode_time: 0,
            chunk_seen: false,
        }
    }
}

#[derive(Debug)]
struct VideoTrack {
    entry: VideoEntryKind,
    width: u32,
    height: u32,
    state: TrackState,
}

#[derive(Debug)]
struct AudioTrack {
    sample_rate: u32,
    channel_count: u32,
    state: TrackState,
}

/// Writes chunks from up to one video and one audio track into an MP4.
///
/// Chunks must arrive in presentation order within a track; arrival
/// order across tracks is unconstrained.
#[derive(Debug)]
pub struct Mp4Mux {
    mode: Mode,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    sequence_number: u32,
    init_sent: bool,
    /// Fragmented chunks held back until the init segment can go out.
    held: Vec<(TrackSlot, PendingSample)>,
}

impl Mp4Mux {
    /// A mux that assembles one progressive file, returned by
    /// [`finalize`](Mp4Mux::finalize).
    pub fn buffered(
        video: Option<VideoTrackParams>,
        audio: Option<AudioTrackParams>,
    ) -> MuxResult<Mp4Mux> {
        Mp4Mux::new(Mode::Buffered, video, audio)
    }

    /// A mux that emits an init segment plus one fragment per chunk.
    pub fn fragmented(
        video: Option<VideoTrackParams>,
        audio: Option<AudioTrackParams>,
    ) -> MuxResult<Mp4Mux> {
        Mp4Mux::new(Mode::Fragmented, video, audio)
    }

    fn new(
        mode: Mode,
        video: Option<VideoTrackParams>,
        audio: Option<AudioTrackParams>,
    ) -> MuxResult<Mp4Mux> {
        if video.is_none() && audio.is_none() {
            return Err(MuxError::InvalidConfig(
                "at least one track must be declared".to_owned(),
            ));
        }

        let video = video
            .map(|params| {
                if params.width == 0 || params.height == 0 {
                    return Err(MuxError::InvalidConfig(format!(
                        "video dimensions {}x{} are invalid",
                        params.width, params.height
                    )));
                }
                Ok(VideoTrack {
                    entry: VideoEntryKind::from_codec(&params.codec)?,
                    width: params.width,
                    height: params.height,
                    state: TrackState::new(params.description),
                })
            })
            .transpose()?;

        let audio = audio
            .map(|params| {
                if !params.codec.starts_with("mp4a") {
                    return Err(MuxError::UnsupportedCodec(params.codec));
                }
                if params.sample_rate == 0 || params.channel_count == 0 {
                    return Err(MuxError::InvalidConfig(
                        "audio rate and channel count must be nonzero".to_owned(),
                    ));
                }
                Ok(AudioTrack {
                    sample_rate: params.sample_rate,
                    channel_count: params.channel_count,
                    state: TrackState::new(params.description),
                })
            })
            .transpose()?;

        Ok(Mp4Mux {
            mode,
            video,
            audio,
            sequence_number: 1,
            init_sent: false,
            held: Vec::new(),
        })
    }

    /// Feed one compressed video chunk. In fragmented mode the returned
    /// segments (possibly none while the init segment waits on decoder
    /// configurations) are ready to append to a playback buffer;
    /// buffered mode always returns nothing here.
    pub fn add_video_chunk(&mut self, chunk: &EncodedChunk) -> MuxResult<Vec<Bytes>> {
        self.add_chunk(TrackSlot::Video, chunk)
    }

    /// Feed one compressed audio chunk.
    pub fn add_audio_chunk(&mut self, chunk: &EncodedChunk) -> MuxResult<Vec<Bytes>> {
        self.add_chunk(TrackSlot::Audio, chunk)
    }

    fn add_chunk(&mut self, slot: TrackSlot, chunk: &EncodedChunk) -> MuxResult<Vec<Bytes>> {
        let track_name = slot.name();
        let state = self.state_mut(slot)?;

        if let Some(previous) = state.previous_timestamp {
            if chunk.timestamp_micros < previous {
                return Err(MuxError::NonMonotonicTimestamp {
                    track: track_name,
                    timestamp: chunk.timestamp_micros,
                    previous,
                });
            }
        }
        state.previous_timestamp = Some(chunk.timestamp_micros);

        if state.description.is_none() {
            if let Some(metadata) = &chunk.metadata {
                if let Some(description) = &metadata.description {
                    debug!("{} decoder config from chunk metadata, {} bytes",
                        track_name, description.len());
                    state.description = Some(description.clone());
                }
            }
        }

        let sample = PendingSample {
            data: chunk.data.clone(),
            duration: chunk.duration_micros.max(0) as u32,
            sync: chunk.is_key(),
        };
        state.total_duration += sample.duration as u64;
        state.chunk_seen = true;

        match self.mode {
            Mode::Buffered => {
                self.state_mut(slot)?.samples.push(sample);
                Ok(Vec::new())
            }
            Mode::Fragmented => self.emit_fragments(slot, sample),
        }
    }

    fn state_mut(&mut self, slot: TrackSlot) -> MuxResult<&mut TrackState> {
        let state = match slot {
            TrackSlot::Video => self.video.as_mut().map(|t| &mut t.state),
            TrackSlot::Audio => self.audio.as_mut().map(|t| &mut t.state),
        };
        state.ok_or(MuxError::TrackNotDeclared { track: slot.name() })
    }

    fn emit_fragments(&mut self, slot: TrackSlot, sample: PendingSample) -> MuxResult<Vec<Bytes>> {
        let mut segments = Vec::new();

        if !self.init_sent {
            self.held.push((slot, sample));
            if !self.all_tracks_seen() {
                return Ok(segments);
            }
            segments.push(self.make_init_segment()?);
            self.init_sent = true;
            for (slot, sample) in std::mem::take(&mut self.held) {
                segments.push(self.make_fragment(slot, sample)?);
            }
            return Ok(segments);
        }

        segments.push(self.make_fragment(slot, sample)?);
        Ok(segments)
    }

    fn all_tracks_seen(&self) -> bool {
        self.video.as_ref().map(|t| t.state.chunk_seen).unwrap_or(true)
            && self.audio.as_ref().map(|t| t.state.chunk_seen).unwrap_or(true)
    }

    fn make_init_segment(&self) -> MuxResult<Bytes> {
        let mut cursor = Cursor::new(Vec::new());
        mp4::write_ftyp(&mut cursor)?;

        let mut tracks = Vec::new();
        if let Some(video) = &self.video {
            tracks.push(video_track_desc(video, &[])?);
        }
        if let Some(audio) = &self.audio {
            tracks.push(audio_track_desc(audio, &[]));
        }
        mp4::write_moov(&mut cursor, 0, &tracks, true)?;

        Ok(Bytes::from(cursor.into_inner()))
    }

    fn make_fragment(&mut self, slot: TrackSlot, sample: PendingSample) -> MuxResult<Bytes> {
        let track_id = match slot {
            TrackSlot::Video => VIDEO_TRACK_ID,
            TrackSlot::Audio => AUDIO_TRACK_ID,
        };

        let sequence_number = self.sequence_number;
        self.sequence_number += 1;

        let state = self.state_mut(slot)?;
        let base_decode_time = state.base_decode_time;
        state.base_decode_time += sample.duration as u64;

        let moof = mp4::write_moof(
            sequence_number,
            track_id,
            base_decode_time,
            &[FragmentSample {
                size: sample.data.len() as u32,
                duration: sample.duration,
                composition_offset: 0,
                sync: sample.sync,
            }],
        )?;

        let mut segment = Vec::with_capacity(moof.len() + 8 + sample.data.len());
        segment.extend_from_slice(&moof);
        write_sized_header(&mut segment, b"mdat", sample.data.len() as u64)?;
        segment.extend_from_slice(&sample.data);
        Ok(Bytes::from(segment))
    }

    /// Finish the stream. Buffered mode returns the whole file;
    /// fragmented mode returns any segments still held back (normally
    /// empty once the init segment has gone out).
    pub fn finalize(mut self) -> MuxResult<Bytes> {
        match self.mode {
            Mode::Buffered => self.build_buffered(),
            Mode::Fragmented => {
                if self.init_sent {
                    return Ok(Bytes::new());
                }
                // never reached readiness; force the init out now
                let mut out = Vec::new();
                out.extend_from_slice(&self.make_init_segment()?);
                for (slot, sample) in std::mem::take(&mut self.held) {
                    out.extend_from_slice(&self.make_fragment(slot, sample)?);
                }
                Ok(Bytes::from(out))
            }
        }
    }

    fn build_buffered(self) -> MuxResult<Bytes> {
        let mut cursor = Cursor::new(Vec::new());
        mp4::write_ftyp(&mut cursor)?;

        let video_bytes: u64 = self
            .video
            .iter()
            .flat_map(|t| &t.state.samples)
            .map(|s| s.data.len() as u64)
            .sum();
        let audio_bytes: u64 = self
            .audio
            .iter()
            .flat_map(|t| &t.state.samples)
            .map(|s| s.data.len() as u64)
            .sum();

        write_sized_header(&mut cursor, b"mdat", video_bytes + audio_bytes)?;

        let mut offset = cursor.get_ref().len() as u64;
        let mut video_samples = Vec::new();
        if let Some(video) = &self.video {
            for sample in &video.state.samples {
                video_samples.push(SampleInfo {
                    offset,
                    size: sample.data.len() as u32,
                    duration: sample.duration,
                    composition_offset: 0,
                    sync: sample.sync,
                });
                offset += sample.data.len() as u64;
            }
        }
        let mut audio_samples = Vec::new();
        if let Some(audio) = &self.audio {
            for sample in &audio.state.samples {
                audio_samples.push(SampleInfo {
                    offset,
                    size: sample.data.len() as u32,
                    duration: sample.duration,
                    composition_offset: 0,
                    sync: sample.sync,
                });
                offset += sample.data.len() as u64;
            }
        }

        for track in self.video.iter().flat_map(|t| &t.state.samples) {
            std::io::Write::write_all(&mut cursor, &track.data)?;
        }
        for track in self.audio.iter().flat_map(|t| &t.state.samples) {
            std::io::Write::write_all(&mut cursor, &track.data)?;
        }

        let mut tracks = Vec::new();
        if let Some(video) = &self.video {
            tracks.push(video_track_desc(video, &video_samples)?);
        }
        if let Some(audio) = &self.audio {
            tracks.push(audio_track_desc(audio, &audio_samples));
        }

        let movie_duration = tracks
            .iter()
            .map(|t| t.duration * MOVIE_TIMESCALE as u64 / MEDIA_TIMESCALE as u64)
            .max()
            .unwrap_or(0);
        mp4::write_moov(&mut cursor, movie_duration, &tracks, false)?;

        Ok(Bytes::from(cursor.into_inner()))
    }
}

fn video_track_desc<'a>(
    video: &'a VideoTrack,
    samples: &'a [SampleInfo],
) -> MuxResult<TrackDesc<'a>> {
    let config = video
        .state
        .description
        .as_deref()
        .ok_or(MuxError::MissingDecoderConfig { track: "video" })?;

    Ok(TrackDesc {
        track_id: VIDEO_TRACK_ID,
        timescale: MEDIA_TIMESCALE,
        duration: video.state.total_duration,
        description: SampleDescription::Video {
            entry: video.entry,
            width: video.width,
            height: video.height,
            config,
        },
        samples,
    })
}

fn audio_track_desc<'a>(audio: &'a AudioTrack, samples: &'a [SampleInfo]) -> TrackDesc<'a> {
    TrackDesc {
        track_id: AUDIO_TRACK_ID,
        timescale: MEDIA_TIMESCALE,
        duration: audio.state.total_duration,
        description: SampleDescription::Audio {
            sample_rate: audio.sample_rate,
            channel_count: audio.channel_count,
            config: audio.state.description.as_deref(),
        },
        samples,
    }
}
