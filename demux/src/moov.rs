//! moov parsing: movie header, track headers, sample descriptions.

use bytes::{Buf, Bytes};
use log::warn;

use recast_codec::avc::AvcConfigRecord;

use crate::boxes::{children, find_child, full_box, FourCc};
use crate::sample_table::{SampleEntry, SampleTable};
use crate::{AudioParams, DemuxError, TrackConfig, TrackInfo, TrackKind, VideoParams};

#[derive(Debug)]
pub struct MovieInfo {
    pub timescale: u32,
    pub duration: u64,
    pub tracks: Vec<ParsedTrack>,
}

#[derive(Debug)]
pub struct ParsedTrack {
    pub info: TrackInfo,
    pub entries: Vec<SampleEntry>,
}

fn malformed(msg: impl Into<String>) -> DemuxError {
    DemuxError::MalformedContainer(msg.into())
}

fn need(buf: &[u8], bytes: usize, what: &str) -> Result<(), DemuxError> {
    if buf.len() < bytes {
        Err(malformed(format!("{} box too short", what)))
    } else {
        Ok(())
    }
}

pub fn parse(body: &[u8]) -> Result<MovieInfo, DemuxError> {
    let mut timescale = 1000;
    let mut duration = 0;
    let mut tracks = Vec::new();

    for child in children(body) {
        let (fourcc, child_body) = child?;
        match fourcc {
            FourCc::MVHD => {
                let (ts, dur) = parse_mvhd(child_body)?;
                timescale = ts;
                duration = dur;
            }
            FourCc::TRAK => {
                if let Some(track) = parse_trak(child_body)? {
                    tracks.push(track);
                }
            }
            _ => {}
        }
    }

    Ok(MovieInfo {
        timescale,
        duration,
        tracks,
    })
}

fn parse_mvhd(body: &[u8]) -> Result<(u32, u64), DemuxError> {
    let (version, _, mut buf) = full_box(body)?;
    if version == 1 {
        need(buf, 28, "mvhd")?;
        buf.advance(16); // creation + modification time
        let timescale = buf.get_u32();
        let duration = buf.get_u64();
        Ok((timescale, duration))
    } else {
        need(buf, 16, "mvhd")?;
        buf.advance(8);
        let timescale = buf.get_u32();
        let duration = buf.get_u32() as u64;
        Ok((timescale, duration))
    }
}

fn parse_trak(body: &[u8]) -> Result<Option<ParsedTrack>, DemuxError> {
    let tkhd = find_child(body, FourCc::TKHD)?.ok_or_else(|| malformed("trak missing tkhd"))?;
    let track_id = parse_tkhd(tkhd)?;

    let mdia = find_child(body, FourCc::MDIA)?.ok_or_else(|| malformed("trak missing mdia"))?;
    let mdhd = find_child(mdia, FourCc::MDHD)?.ok_or_else(|| malformed("mdia missing mdhd"))?;
    let (timescale, duration) = parse_mdhd(mdhd)?;

    let hdlr = find_child(mdia, FourCc::HDLR)?.ok_or_else(|| malformed("mdia missing hdlr"))?;
    let kind = match parse_hdlr(hdlr)? {
        Some(kind) => kind,
        // Timed metadata, subtitles and friends are out of scope.
        None => return Ok(None),
    };

    let minf = find_child(mdia, FourCc::MINF)?.ok_or_else(|| malformed("mdia missing minf"))?;
    let stbl = find_child(minf, FourCc::STBL)?.ok_or_else(|| malformed("minf missing stbl"))?;

    let entries = SampleTable::parse(stbl)?.flatten()?;
    let config = parse_stsd(stbl, kind)?;

    if let TrackConfig::Unsupported { reason } = &config {
        warn!("track {}: unsupported codec: {}", track_id, reason);
    }

    Ok(Some(ParsedTrack {
        info: TrackInfo {
            track_id,
            kind,
            timescale,
            duration,
            sample_count: entries.len(),
            config,
        },
        entries,
    }))
}

fn parse_tkhd(body: &[u8]) -> Result<u32, DemuxError> {
    let (version, _, mut buf) = full_box(body)?;
    let skip = if version == 1 { 16 } else { 8 };
    need(buf, skip + 4, "tkhd")?;
    buf.advance(skip);
    Ok(buf.get_u32())
}

fn parse_mdhd(body: &[u8]) -> Result<(u32, u64), DemuxError> {
    let (version, _, mut buf) = full_box(body)?;
    if version == 1 {
        need(buf, 28, "mdhd")?;
        buf.advance(16);
        let timescale = buf.get_u32();
        let duration = buf.get_u64();
        Ok((timescale, duration))
    } else {
        need(buf, 16, "mdhd")?;
        buf.advance(8);
        let timescale = buf.get_u32();
        let duration = buf.get_u32() as u64;
        Ok((timescale, duration))
    }
}

fn parse_hdlr(body: &[u8]) -> Result<Option<TrackKind>, DemuxError> {
    let (_, _, buf) = full_box(body)?;
    need(buf, 8, "hdlr")?;
    Ok(match &buf[4..8] {
        b"vide" => Some(TrackKind::Video),
        b"soun" => Some(TrackKind::Audio),
        _ => None,
    })
}

fn parse_stsd(stbl: &[u8], kind: TrackKind) -> Result<TrackConfig, DemuxError> {
    let stsd = find_child(stbl, FourCc::STSD)?.ok_or_else(|| malformed("stbl missing stsd"))?;
    let (_, _, buf) = full_box(stsd)?;
    need(buf, 4, "stsd")?;

    let mut entries = children(&buf[4..]);
    let (entry_fourcc, entry_body) = entries
        .next()
        .transpose()?
        .ok_or_else(|| malformed("stsd has no sample entries"))?;

    match kind {
        TrackKind::Video => parse_video_entry(entry_fourcc, entry_body),
        TrackKind::Audio => parse_audio_entry(entry_fourcc, entry_body),
    }
}

/// Fixed-size prefix of a VisualSampleEntry before its child boxes:
/// reserved + data reference index (8), pre_defined/reserved (16),
/// width/height (4), resolution/reserved/frame count (14), compressor
/// name (32), depth + pre_defined (4).
const VISUAL_ENTRY_LEN: usize = 78;

/// Fixed-size prefix of an AudioSampleEntry before its child boxes.
const AUDIO_ENTRY_LEN: usize = 28;

fn parse_video_entry(entry_fourcc: FourCc, body: &[u8]) -> Result<TrackConfig, DemuxError> {
    need(body, VISUAL_ENTRY_LEN, "video sample entry")?;
    let width = u16::from_be_bytes([body[24], body[25]]) as u32;
    let height = u16::from_be_bytes([body[26], body[27]]) as u32;

    // The first recognized decoder configuration box wins; its body
    // (header stripped) is the description handed to the capability.
    for child in children(&body[VISUAL_ENTRY_LEN..]) {
        let (fourcc, child_body) = child?;
        let codec = match fourcc {
            FourCc::AVCC => match AvcConfigRecord::parse(child_body) {
                Ok(record) => record.codec_string(),
                Err(_) => {
                    return Ok(TrackConfig::Unsupported {
                        reason: "malformed avcC configuration record".to_owned(),
                    })
                }
            },
            FourCc::HVCC => "hvc1".to_owned(),
            FourCc::AV1C => "av01".to_owned(),
            FourCc::VPCC => vp9_codec_string(child_body)?,
            _ => continue,
        };

        return Ok(TrackConfig::Video(VideoParams {
            codec,
            width,
            height,
            description: Bytes::copy_from_slice(child_body),
        }));
    }

    Ok(TrackConfig::Unsupported {
        reason: format!(
            "no decoder configuration box in `{}` sample entry",
            entry_fourcc
        ),
    })
}

fn vp9_codec_string(vpcc_body: &[u8]) -> Result<String, DemuxError> {
    let (_, _, buf) = full_box(vpcc_body)?;
    need(buf, 3, "vpcC")?;
    let profile = buf[0];
    let level = buf[1];
    let bit_depth = buf[2] >> 4;
    Ok(format!("vp09.{:02}.{:02}.{:02}", profile, level, bit_depth))
}

fn parse_audio_entry(entry_fourcc: FourCc, body: &[u8]) -> Result<TrackConfig, DemuxError> {
    if entry_fourcc != FourCc::MP4A {
        return Ok(TrackConfig::Unsupported {
            reason: format!("audio sample entry `{}`", entry_fourcc),
        });
    }

    need(body, AUDIO_ENTRY_LEN, "audio sample entry")?;
    let channel_count = u16::from_be_bytes([body[16], body[17]]) as u32;
    // 16.16 fixed point
    let sample_rate = u32::from_be_bytes([body[24], body[25], body[26], body[27]]) >> 16;

    let (codec, description) = match find_child(&body[AUDIO_ENTRY_LEN..], FourCc::ESDS)? {
        Some(esds) => parse_esds(esds)?,
        None => {
            warn!("mp4a sample entry without esds, assuming AAC LC");
            ("mp4a.40.2".to_owned(), None)
        }
    };

    Ok(TrackConfig::Audio(AudioParams {
        codec,
        sample_rate,
        channel_count,
        description,
    }))
}

const ES_DESCRIPTOR: u8 = 0x03;
const DECODER_CONFIG_DESCRIPTOR: u8 = 0x04;
const DECODER_SPECIFIC_INFO: u8 = 0x05;

/// Pull one MPEG-4 descriptor (tag + expandable length) off the buffer.
fn descriptor<'a>(buf: &mut &'a [u8]) -> Result<(u8, &'a [u8]), DemuxError> {
    if buf.is_empty() {
        return Err(malformed("truncated esds descriptor"));
    }
    let tag = buf.get_u8();

    let mut len = 0usize;
    for _ in 0..4 {
        if buf.is_empty() {
            return Err(malformed("truncated esds descriptor length"));
        }
        let byte = buf.get_u8();
        len = (len << 7) | (byte & 0x7f) as usize;
        if byte & 0x80 == 0 {
            break;
        }
    }

    if buf.len() < len {
        return Err(malformed("esds descriptor overruns its box"));
    }
    let (body, rest) = buf.split_at(len);
    *buf = rest;
    Ok((tag, body))
}

pub(crate) fn parse_esds(body: &[u8]) -> Result<(String, Option<Bytes>), DemuxError> {
    let (_, _, mut buf) = full_box(body)?;

    let (tag, mut es) = descriptor(&mut buf)?;
    if tag != ES_DESCRIPTOR {
        return Err(malformed(format!("esds starts with descriptor {:#x}", tag)));
    }

    need(es, 3, "ES descriptor")?;
    es.advance(2); // ES_ID
    let flags = es.get_u8();
    if flags & 0x80 != 0 {
        need(es, 2, "ES descriptor")?;
        es.advance(2); // dependsOn_ES_ID
    }
    if flags & 0x40 != 0 {
        need(es, 1, "ES descriptor")?;
        let url_len = es.get_u8() as usize;
        need(es, url_len, "ES descriptor")?;
        es.advance(url_len);
    }
    if flags & 0x20 != 0 {
        need(es, 2, "ES descriptor")?;
        es.advance(2); // OCR_ES_ID
    }

    while !es.is_empty() {
        let (tag, mut config) = descriptor(&mut es)?;
        if tag != DECODER_CONFIG_DESCRIPTOR {
            continue;
        }

        need(config, 13, "decoder config descriptor")?;
        let object_type = config.get_u8();
        config.advance(12); // stream type, buffer size, bitrates

        let mut specific_info = None;
        while !config.is_empty() {
            let (tag, info) = descriptor(&mut config)?;
            if tag == DECODER_SPECIFIC_INFO {
                specific_info = Some(Bytes::copy_from_slice(info));
                break;
            }
        }

        let codec = if object_type == 0x40 {
            // Audio object type from the first 5 bits of the
            // AudioSpecificConfig; LC when absent.
            let aot = specific_info
                .as_ref()
                .and_then(|info| info.first().copied())
                .map(|b| b >> 3)
                .unwrap_or(2);
            format!("mp4a.40.{}", aot)
        } else {
            format!("mp4a.{:02X}", object_type)
        };

        return Ok((codec, specific_info));
    }

    Err(malformed("esds carries no decoder config descriptor"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expandable(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![tag, body.len() as u8];
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn parses_aac_esds() {
        // AudioSpecificConfig: AAC LC, 48kHz, stereo
        let asc = [0x11, 0x90];
        let dsi = expandable(DECODER_SPECIFIC_INFO, &asc);

        let mut dcd_body = vec![0x40, 0x15, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        dcd_body.extend_from_slice(&dsi);
        let dcd = expandable(DECODER_CONFIG_DESCRIPTOR, &dcd_body);

        let mut es_body = vec![0, 1, 0]; // ES_ID, no flags
        es_body.extend_from_slice(&dcd);
        let es = expandable(ES_DESCRIPTOR, &es_body);

        let mut body = vec![0, 0, 0, 0]; // version + flags
        body.extend_from_slice(&es);

        let (codec, info) = parse_esds(&body).unwrap();
        assert_eq!(codec, "mp4a.40.2");
        assert_eq!(&info.unwrap()[..], &asc);
    }

    #[test]
    fn non_aac_object_type_keeps_hex_form() {
        let dcd = expandable(
            DECODER_CONFIG_DESCRIPTOR,
            &[0x6B, 0x15, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        );
        let mut es_body = vec![0, 1, 0];
        es_body.extend_from_slice(&dcd);
        let es = expandable(ES_DESCRIPTOR, &es_body);

        let mut body = vec![0, 0, 0, 0];
        body.extend_from_slice(&es);

        let (codec, info) = parse_esds(&body).unwrap();
        assert_eq!(codec, "mp4a.6B");
        assert!(info.is_none());
    }

    #[test]
    fn vp9_codec_string_from_vpcc() {
        let body = [1, 0, 0, 0, 0, 10, (8 << 4) | (1 << 1), 1, 1, 1, 0, 0];
        assert_eq!(vp9_codec_string(&body).unwrap(), "vp09.00.10.08");
    }
}
