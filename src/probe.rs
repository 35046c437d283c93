//! Container metadata probe: runs the box reader over a file and
//! reports what the pipeline would see, in a serializable shape.

use std::path::Path;

use bytes::Bytes;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use recast_demux::{BoxReader, ContainerInfo, DemuxEvent, TrackConfig, TrackKind};

use crate::demux::READ_CHUNK_SIZE;
use crate::Error;

#[derive(Debug, Serialize)]
pub struct MediaDescription {
    pub major_brand: Option<String>,
    /// Whole-movie duration in milliseconds.
    pub duration_ms: u64,
    pub tracks: Vec<TrackDescription>,
}

#[derive(Debug, Serialize)]
pub struct TrackDescription {
    pub id: u32,
    pub kind: &'static str,
    pub codec: Option<String>,
    pub duration_ms: u64,
    pub sample_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<u32>,
    pub supported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsupported_reason: Option<String>,
}

/// Read just enough of `path` to describe its tracks.
pub async fn probe_file(path: &Path) -> Result<MediaDescription, Error> {
    let mut file = File::open(path).await?;
    let mut reader = BoxReader::new();
    let mut offset = 0u64;
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        for event in reader.push(offset, Bytes::copy_from_slice(&buf[..n]))? {
            if let DemuxEvent::Ready(info) = event {
                return Ok(describe(info));
            }
        }
        offset += n as u64;
    }

    for event in reader.flush()? {
        if let DemuxEvent::Ready(info) = event {
            return Ok(describe(info));
        }
    }

    Err(Error::Demux(recast_demux::DemuxError::TruncatedStream(
        "no movie metadata found".to_owned(),
    )))
}

fn describe(info: ContainerInfo) -> MediaDescription {
    let movie_scale = info.timescale.max(1) as u64;

    let tracks = info
        .tracks
        .iter()
        .map(|track| {
            let track_scale = track.timescale.max(1) as u64;
            let mut desc = TrackDescription {
                id: track.track_id,
                kind: match track.kind {
                    TrackKind::Video => "video",
                    TrackKind::Audio => "audio",
                },
                codec: None,
                duration_ms: track.duration * 1000 / track_scale,
                sample_count: track.sample_count,
                width: None,
                height: None,
                sample_rate: None,
                channel_count: None,
                supported: track.is_usable(),
                unsupported_reason: None,
            };

            match &track.config {
                TrackConfig::Video(params) => {
                    desc.codec = Some(params.codec.clone());
                    desc.width = Some(params.width);
                    desc.height = Some(params.height);
                }
                TrackConfig::Audio(params) => {
                    desc.codec = Some(params.codec.clone());
                    desc.sample_rate = Some(params.sample_rate);
                    desc.channel_count = Some(params.channel_count);
                }
                TrackConfig::Unsupported { reason } => {
                    desc.unsupported_reason = Some(reason.clone());
                }
            }
            desc
        })
        .collect();

    MediaDescription {
        major_brand: info.major_brand,
        duration_ms: info.duration * 1000 / movie_scale,
        tracks,
    }
}

/// Best-effort container type from magic bytes; MP4 is the fallback
/// because it is the only thing the pipeline emits.
pub fn sniff_mime(data: &[u8]) -> &'static str {
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return "video/mp4";
    }
    if data.len() >= 4 && data[..4] == [0x1a, 0x45, 0xdf, 0xa3] {
        return "video/webm";
    }
    if data.len() >= 3 && &data[..3] == b"GIF" {
        return "image/gif";
    }
    "video/mp4"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_mp4_and_webm() {
        let mut mp4 = vec![0, 0, 0, 24];
        mp4.extend_from_slice(b"ftypisom");
        mp4.extend_from_slice(&[0; 8]);
        assert_eq!(sniff_mime(&mp4), "video/mp4");

        assert_eq!(sniff_mime(&[0x1a, 0x45, 0xdf, 0xa3, 0x01]), "video/webm");
        assert_eq!(sniff_mime(b"GIF89a"), "image/gif");
        assert_eq!(sniff_mime(&[1, 2, 3]), "video/mp4");
    }
}
