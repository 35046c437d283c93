//! Demux coordinator: pulls bytes from any async source, drives the
//! incremental box reader, and turns extracted samples into
//! [`EncodedChunk`]s for the selected tracks.

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use recast_codec::{ChunkKind, EncodedChunk};
use recast_demux::{BoxReader, ContainerInfo, DemuxEvent, SampleUnit, TrackInfo};
use recast_util::time::{MediaDuration, MediaTime};

/// Source reads are chunked at 64 KiB; the coordinator assigns the
/// cumulative offsets the box reader requires.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Demuxed output, one event stream per run.
#[derive(Debug)]
pub enum MediaEvent {
    /// Container metadata, sent exactly once before any chunk.
    Ready(ContainerInfo),
    Video(EncodedChunk),
    Audio(EncodedChunk),
}

/// Converts demuxed samples of one track into encoded chunks.
///
/// Timestamps become microseconds via exact rational arithmetic. The
/// first video sample's timestamp is forced to 0 no matter what its
/// cts says; later samples keep their derived values, discontinuity
/// included. This mirrors the upstream player behavior the pipeline
/// reproduces.
#[derive(Debug)]
pub struct SampleConverter {
    timescale: i64,
    zero_first: bool,
    first_sent: bool,
}

impl SampleConverter {
    pub fn video(track: &TrackInfo) -> SampleConverter {
        SampleConverter {
            timescale: track.timescale.max(1) as i64,
            zero_first: true,
            first_sent: false,
        }
    }

    pub fn audio(track: &TrackInfo) -> SampleConverter {
        SampleConverter {
            timescale: track.timescale.max(1) as i64,
            zero_first: false,
            first_sent: false,
        }
    }

    pub fn convert(&mut self, sample: SampleUnit) -> EncodedChunk {
        let timestamp = if self.zero_first && !self.first_sent {
            0
        } else {
            MediaTime::from_ticks(sample.cts, self.timescale).as_micros()
        };
        self.first_sent = true;

        EncodedChunk {
            kind: if sample.sync {
                ChunkKind::Key
            } else {
                ChunkKind::Delta
            },
            timestamp_micros: timestamp,
            duration_micros: MediaDuration::from_ticks(sample.duration as i64, self.timescale)
                .as_micros(),
            data: sample.data,
            metadata: None,
        }
    }
}

/// Read `source` to the end and emit [`MediaEvent`]s into `events`.
///
/// Track selection follows the source player: the first usable video
/// track and the first usable audio track; everything else is ignored.
/// A closed receiver ends the read early without error (the consumer
/// has what it needs or has failed on its own terms).
pub async fn demux_source<R>(
    mut source: R,
    events: mpsc::Sender<MediaEvent>,
) -> Result<(), crate::Error>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BoxReader::new();
    let mut offset = 0u64;
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    let mut video: Option<(u32, SampleConverter)> = None;
    let mut audio: Option<(u32, SampleConverter)> = None;

    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        let demux_events = reader.push(offset, Bytes::copy_from_slice(&buf[..n]))?;
        offset += n as u64;

        for event in demux_events {
            if !dispatch(event, &events, &mut video, &mut audio).await {
                return Ok(());
            }
        }
    }

    for event in reader.flush()? {
        if !dispatch(event, &events, &mut video, &mut audio).await {
            return Ok(());
        }
    }

    debug!("source exhausted at offset {}", offset);
    Ok(())
}

/// Returns false once the consumer has gone away.
async fn dispatch(
    event: DemuxEvent,
    events: &mpsc::Sender<MediaEvent>,
    video: &mut Option<(u32, SampleConverter)>,
    audio: &mut Option<(u32, SampleConverter)>,
) -> bool {
    match event {
        DemuxEvent::Ready(info) => {
            for track in info.tracks.iter().filter(|t| !t.is_usable()) {
                warn!("skipping track {}: unsupported", track.track_id);
            }

            if let Some(track) = info.first_video().filter(|t| t.is_usable()) {
                info!("video track {} selected", track.track_id);
                *video = Some((track.track_id, SampleConverter::video(track)));
            }
            if let Some(track) = info.first_audio().filter(|t| t.is_usable()) {
                info!("audio track {} selected", track.track_id);
                *audio = Some((track.track_id, SampleConverter::audio(track)));
            }

            events.send(MediaEvent::Ready(info)).await.is_ok()
        }
        DemuxEvent::Samples { track_id, samples } => {
            for sample in samples {
                // exactly one arm may consume the sample
                let event = match (video.as_mut(), audio.as_mut()) {
                    (Some((id, converter)), _) if *id == track_id => {
                        Some(MediaEvent::Video(converter.convert(sample)))
                    }
                    (_, Some((id, converter))) if *id == track_id => {
                        Some(MediaEvent::Audio(converter.convert(sample)))
                    }
                    _ => None,
                };

                if let Some(event) = event {
                    if events.send(event).await.is_err() {
                        return false;
                    }
                }
            }
            true
        }
    }
}
