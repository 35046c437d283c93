//! Structural box writers (ISO 14496-12).
//!
//! These functions write the boxes that frame the media data: ftyp,
//! the moov hierarchy with its sample tables, the mvex/trex boxes a
//! fragmented stream needs, and the per-fragment moof. Everything goes
//! through a `Write + Seek` target so box sizes can be backpatched.

use std::io::{Cursor, Seek, SeekFrom, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::atoms::{
    begin_box, begin_full_box, encode_language, end_box, write_descriptor_length, write_fixed_16_16,
    write_fixed_8_8, write_unity_matrix, write_zeros, MOVIE_TIMESCALE,
};
use crate::{MuxError, MuxResult};

/// Sample entry / configuration box pairing for a video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEntryKind {
    Avc,
    Hevc,
    Av1,
    Vp9,
}

impl VideoEntryKind {
    /// Pick the sample entry from an RFC 6381 codec string.
    pub fn from_codec(codec: &str) -> MuxResult<VideoEntryKind> {
        let prefix = codec.split('.').next().unwrap_or(codec);
        match prefix {
            "avc1" | "avc3" => Ok(VideoEntryKind::Avc),
            "hvc1" | "hev1" => Ok(VideoEntryKind::Hevc),
            "av01" => Ok(VideoEntryKind::Av1),
            "vp09" => Ok(VideoEntryKind::Vp9),
            _ => Err(MuxError::UnsupportedCodec(codec.to_owned())),
        }
    }

    pub fn entry_fourcc(&self) -> &'static [u8; 4] {
        match self {
            VideoEntryKind::Avc => b"avc1",
            VideoEntryKind::Hevc => b"hvc1",
            VideoEntryKind::Av1 => b"av01",
            VideoEntryKind::Vp9 => b"vp09",
        }
    }

    pub fn config_fourcc(&self) -> &'static [u8; 4] {
        match self {
            VideoEntryKind::Avc => b"avcC",
            VideoEntryKind::Hevc => b"hvcC",
            VideoEntryKind::Av1 => b"av1C",
            VideoEntryKind::Vp9 => b"vpcC",
        }
    }
}

/// What goes into a track's stsd box.
#[derive(Debug, Clone)]
pub enum SampleDescription<'a> {
    Video {
        entry: VideoEntryKind,
        width: u32,
        height: u32,
        /// Decoder configuration record, box header stripped.
        config: &'a [u8],
    },
    Audio {
        sample_rate: u32,
        channel_count: u32,
        /// AudioSpecificConfig for the esds, when known.
        config: Option<&'a [u8]>,
    },
}

impl SampleDescription<'_> {
    pub fn handler(&self) -> &'static [u8; 4] {
        match self {
            SampleDescription::Video { .. } => b"vide",
            SampleDescription::Audio { .. } => b"soun",
        }
    }
}

/// One sample's worth of table entries.
#[derive(Debug, Clone, Copy)]
pub struct SampleInfo {
    /// Absolute file offset of the sample payload.
    pub offset: u64,
    pub size: u32,
    /// Duration in media timescale ticks.
    pub duration: u32,
    /// cts - dts in media timescale ticks.
    pub composition_offset: i32,
    pub sync: bool,
}

/// Everything needed to write one trak box.
#[derive(Debug, Clone)]
pub struct TrackDesc<'a> {
    pub track_id: u32,
    pub timescale: u32,
    /// Media duration in track ticks. Fragmented tracks pass 0 and get
    /// the all-ones tkhd duration convention instead.
    pub duration: u64,
    pub description: SampleDescription<'a>,
    pub samples: &'a [SampleInfo],
}

pub fn write_ftyp<W: Write + Seek>(writer: &mut W) -> MuxResult<()> {
    let size_pos = begin_box(writer, b"ftyp")?;
    writer.write_all(b"isom")?; // major brand
    writer.write_u32::<BigEndian>(0x200)?; // minor version
    writer.write_all(b"isom")?;
    writer.write_all(b"iso6")?;
    writer.write_all(b"mp41")?;
    end_box(writer, size_pos)
}

/// moov with one trak per entry; `fragmented` adds the mvex box.
pub fn write_moov<W: Write + Seek>(
    writer: &mut W,
    movie_duration: u64,
    tracks: &[TrackDesc],
    fragmented: bool,
) -> MuxResult<()> {
    let size_pos = begin_box(writer, b"moov")?;
    write_mvhd(writer, movie_duration)?;
    for track in tracks {
        write_trak(writer, track, fragmented)?;
    }
    if fragmented {
        write_mvex(writer, tracks)?;
    }
    end_box(writer, size_pos)
}

fn write_mvhd<W: Write + Seek>(writer: &mut W, duration: u64) -> MuxResult<()> {
    let size_pos = begin_full_box(writer, b"mvhd", 0, 0)?;
    writer.write_u32::<BigEndian>(0)?; // creation_time
    writer.write_u32::<BigEndian>(0)?; // modification_time
    writer.write_u32::<BigEndian>(MOVIE_TIMESCALE)?;
    writer.write_u32::<BigEndian>(duration32(duration))?;
    write_fixed_16_16(writer, 1.0)?; // rate
    write_fixed_8_8(writer, 1.0)?; // volume
    write_zeros(writer, 10)?; // reserved
    write_unity_matrix(writer)?;
    write_zeros(writer, 24)?; // pre_defined
    writer.write_u32::<BigEndian>(0xffff_ffff)?; // next_track_ID
    end_box(writer, size_pos)
}

fn write_trak<W: Write + Seek>(
    writer: &mut W,
    track: &TrackDesc,
    fragmented: bool,
) -> MuxResult<()> {
    let size_pos = begin_box(writer, b"trak")?;
    write_tkhd(writer, track, fragmented)?;
    write_mdia(writer, track)?;
    end_box(writer, size_pos)
}

fn write_tkhd<W: Write + Seek>(
    writer: &mut W,
    track: &TrackDesc,
    fragmented: bool,
) -> MuxResult<()> {
    // flags: track_enabled | track_in_movie
    let size_pos = begin_full_box(writer, b"tkhd", 0, 0x000003)?;
    writer.write_u32::<BigEndian>(0)?; // creation_time
    writer.write_u32::<BigEndian>(0)?; // modification_time
    writer.write_u32::<BigEndian>(track.track_id)?;
    write_zeros(writer, 4)?; // reserved

    // ISO/IEC 14496-14 5.3: a track of unknown duration is all 1s.
    let movie_duration = if fragmented {
        u32::MAX as u64
    } else {
        ticks_to_movie(track.duration, track.timescale)
    };
    writer.write_u32::<BigEndian>(duration32(movie_duration))?;

    write_zeros(writer, 8)?; // reserved
    writer.write_i16::<BigEndian>(0)?; // layer
    writer.write_i16::<BigEndian>(0)?; // alternate_group

    let (volume, width, height) = match &track.description {
        SampleDescription::Video { width, height, .. } => (0.0, *width, *height),
        SampleDescription::Audio { .. } => (1.0, 0, 0),
    };
    write_fixed_8_8(writer, volume)?;
    write_zeros(writer, 2)?; // reserved
    write_unity_matrix(writer)?;
    write_fixed_16_16(writer, width as f64)?;
    write_fixed_16_16(writer, height as f64)?;
    end_box(writer, size_pos)
}

/// Version-0 header durations are 32-bit; anything longer clamps
/// instead of wrapping.
fn duration32(duration: u64) -> u32 {
    duration.min(u32::MAX as u64) as u32
}

fn ticks_to_movie(ticks: u64, timescale: u32) -> u64 {
    if timescale == 0 {
        return 0;
    }
    ticks * MOVIE_TIMESCALE as u64 / timescale as u64
}

fn write_mdia<W: Write + Seek>(writer: &mut W, track: &TrackDesc) -> MuxResult<()> {
    let size_pos = begin_box(writer, b"mdia")?;
    write_mdhd(writer, track.timescale, track.duration)?;
    write_hdlr(writer, track.description.handler())?;
    write_minf(writer, track)?;
    end_box(writer, size_pos)
}

fn write_mdhd<W: Write + Seek>(writer: &mut W, timescale: u32, duration: u64) -> MuxResult<()> {
    let size_pos = begin_full_box(writer, b"mdhd", 1, 0)?;
    writer.write_u64::<BigEndian>(0)?; // creation_time
    writer.write_u64::<BigEndian>(0)?; // modification_time
    writer.write_u32::<BigEndian>(timescale)?;
    writer.write_u64::<BigEndian>(duration)?;
    writer.write_u16::<BigEndian>(encode_language("und"))?;
    writer.write_u16::<BigEndian>(0)?; // pre_defined
    end_box(writer, size_pos)
}

fn write_hdlr<W: Write + Seek>(writer: &mut W, handler: &[u8; 4]) -> MuxResult<()> {
    let name: &[u8] = match handler {
        b"vide" => b"VideoHandler\0",
        b"soun" => b"SoundHandler\0",
        _ => b"DataHandler\0",
    };
    let size_pos = begin_full_box(writer, b"hdlr", 0, 0)?;
    write_zeros(writer, 4)?; // pre_defined
    writer.write_all(handler)?;
    write_zeros(writer, 12)?; // reserved
    writer.write_all(name)?;
    end_box(writer, size_pos)
}

fn write_minf<W: Write + Seek>(writer: &mut W, track: &TrackDesc) -> MuxResult<()> {
    let size_pos = begin_box(writer, b"minf")?;
    match &track.description {
        SampleDescription::Video { .. } => {
            // vmhd always carries flags=1, graphics mode copy
            let pos = begin_full_box(writer, b"vmhd", 0, 1)?;
            write_zeros(writer, 8)?;
            end_box(writer, pos)?;
        }
        SampleDescription::Audio { .. } => {
            let pos = begin_full_box(writer, b"smhd", 0, 0)?;
            write_zeros(writer, 4)?; // balance + reserved
            end_box(writer, pos)?;
        }
    }
    write_dinf(writer)?;
    write_stbl(writer, track)?;
    end_box(writer, size_pos)
}

fn write_dinf<W: Write + Seek>(writer: &mut W) -> MuxResult<()> {
    let size_pos = begin_box(writer, b"dinf")?;
    let dref_pos = begin_full_box(writer, b"dref", 0, 0)?;
    writer.write_u32::<BigEndian>(1)?; // entry_count
    // self-contained url entry
    let url_pos = begin_full_box(writer, b"url ", 0, 1)?;
    end_box(writer, url_pos)?;
    end_box(writer, dref_pos)?;
    end_box(writer, size_pos)
}

fn write_stbl<W: Write + Seek>(writer: &mut W, track: &TrackDesc) -> MuxResult<()> {
    let size_pos = begin_box(writer, b"stbl")?;
    write_stsd(writer, &track.description)?;
    write_stts(writer, track.samples)?;
    write_ctts(writer, track.samples)?;
    write_stss(writer, track.samples)?;
    write_stsc(writer, track.samples)?;
    write_stsz(writer, track.samples)?;
    write_chunk_offsets(writer, track.samples)?;
    end_box(writer, size_pos)
}

fn write_stsd<W: Write + Seek>(writer: &mut W, desc: &SampleDescription) -> MuxResult<()> {
    let size_pos = begin_full_box(writer, b"stsd", 0, 0)?;
    writer.write_u32::<BigEndian>(1)?; // entry_count
    match desc {
        SampleDescription::Video {
            entry,
            width,
            height,
            config,
        } => write_video_entry(writer, *entry, *width, *height, config)?,
        SampleDescription::Audio {
            sample_rate,
            channel_count,
            config,
        } => write_audio_entry(writer, *sample_rate, *channel_count, *config)?,
    }
    end_box(writer, size_pos)
}

fn write_video_entry<W: Write + Seek>(
    writer: &mut W,
    entry: VideoEntryKind,
    width: u32,
    height: u32,
    config: &[u8],
) -> MuxResult<()> {
    let size_pos = begin_box(writer, entry.entry_fourcc())?;

    // VisualSampleEntry
    write_zeros(writer, 6)?; // reserved
    writer.write_u16::<BigEndian>(1)?; // data_reference_index
    write_zeros(writer, 16)?; // pre_defined + reserved
    writer.write_u16::<BigEndian>(width as u16)?;
    writer.write_u16::<BigEndian>(height as u16)?;
    writer.write_u32::<BigEndian>(0x0048_0000)?; // horizresolution: 72 dpi
    writer.write_u32::<BigEndian>(0x0048_0000)?; // vertresolution
    write_zeros(writer, 4)?; // reserved
    writer.write_u16::<BigEndian>(1)?; // frame_count
    write_zeros(writer, 32)?; // compressorname
    writer.write_u16::<BigEndian>(0x0018)?; // depth
    writer.write_i16::<BigEndian>(-1)?; // pre_defined

    // decoder configuration, body passed through verbatim
    let config_pos = begin_box(writer, entry.config_fourcc())?;
    writer.write_all(config)?;
    end_box(writer, config_pos)?;

    end_box(writer, size_pos)
}

fn write_audio_entry<W: Write + Seek>(
    writer: &mut W,
    sample_rate: u32,
    channel_count: u32,
    config: Option<&[u8]>,
) -> MuxResult<()> {
    let size_pos = begin_box(writer, b"mp4a")?;

    // AudioSampleEntry
    write_zeros(writer, 6)?; // reserved
    writer.write_u16::<BigEndian>(1)?; // data_reference_index
    write_zeros(writer, 8)?; // reserved
    writer.write_u16::<BigEndian>(channel_count as u16)?;
    writer.write_u16::<BigEndian>(16)?; // samplesize
    write_zeros(writer, 4)?; // pre_defined + reserved
    writer.write_u32::<BigEndian>(sample_rate << 16)?; // 16.16

    write_esds(writer, config)?;
    end_box(writer, size_pos)
}

fn write_esds<W: Write + Seek>(writer: &mut W, config: Option<&[u8]>) -> MuxResult<()> {
    let size_pos = begin_full_box(writer, b"esds", 0, 0)?;

    let specific_info_len = config
        .map(|c| 1 + descriptor_length_len(c.len()) + c.len())
        .unwrap_or(0);
    let decoder_config_len = 13 + specific_info_len;
    let sl_len = 1 + descriptor_length_len(1) + 1;
    let es_len = 3
        + 1
        + descriptor_length_len(decoder_config_len)
        + decoder_config_len
        + sl_len;

    // ES_Descriptor
    writer.write_u8(0x03)?;
    write_descriptor_length(writer, es_len)?;
    writer.write_u16::<BigEndian>(1)?; // ES_ID
    writer.write_u8(0)?; // no flags, priority 0

    // DecoderConfigDescriptor
    writer.write_u8(0x04)?;
    write_descriptor_length(writer, decoder_config_len)?;
    writer.write_u8(0x40)?; // objectTypeIndication: ISO/IEC 14496-3
    writer.write_u8(0x15)?; // streamType: audio
    write_zeros(writer, 3)?; // bufferSizeDB
    writer.write_u32::<BigEndian>(128_000)?; // maxBitrate
    writer.write_u32::<BigEndian>(128_000)?; // avgBitrate

    if let Some(config) = config {
        // DecoderSpecificInfo
        writer.write_u8(0x05)?;
        write_descriptor_length(writer, config.len())?;
        writer.write_all(config)?;
    }

    // SLConfigDescriptor
    writer.write_u8(0x06)?;
    write_descriptor_length(writer, 1)?;
    writer.write_u8(0x02)?; // predefined: MP4

    end_box(writer, size_pos)
}

fn descriptor_length_len(len: usize) -> usize {
    match len {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        _ => 4,
    }
}

fn write_stts<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    // run-length compress consecutive equal durations
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for sample in samples {
        match runs.last_mut() {
            Some((count, delta)) if *delta == sample.duration => *count += 1,
            _ => runs.push((1, sample.duration)),
        }
    }

    let size_pos = begin_full_box(writer, b"stts", 0, 0)?;
    writer.write_u32::<BigEndian>(runs.len() as u32)?;
    for (count, delta) in runs {
        writer.write_u32::<BigEndian>(count)?;
        writer.write_u32::<BigEndian>(delta)?;
    }
    end_box(writer, size_pos)
}

fn write_ctts<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    if samples.iter().all(|s| s.composition_offset == 0) {
        return Ok(());
    }

    let mut runs: Vec<(u32, i32)> = Vec::new();
    for sample in samples {
        match runs.last_mut() {
            Some((count, offset)) if *offset == sample.composition_offset => *count += 1,
            _ => runs.push((1, sample.composition_offset)),
        }
    }

    // version 1: signed offsets
    let size_pos = begin_full_box(writer, b"ctts", 1, 0)?;
    writer.write_u32::<BigEndian>(runs.len() as u32)?;
    for (count, offset) in runs {
        writer.write_u32::<BigEndian>(count)?;
        writer.write_i32::<BigEndian>(offset)?;
    }
    end_box(writer, size_pos)
}

fn write_stss<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    // absent box means every sample is sync
    if samples.iter().all(|s| s.sync) {
        return Ok(());
    }

    let sync: Vec<u32> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.sync)
        .map(|(i, _)| i as u32 + 1)
        .collect();

    let size_pos = begin_full_box(writer, b"stss", 0, 0)?;
    writer.write_u32::<BigEndian>(sync.len() as u32)?;
    for sample_number in sync {
        writer.write_u32::<BigEndian>(sample_number)?;
    }
    end_box(writer, size_pos)
}

fn write_stsc<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    // one chunk holding every sample of the track
    let size_pos = begin_full_box(writer, b"stsc", 0, 0)?;
    if samples.is_empty() {
        writer.write_u32::<BigEndian>(0)?;
    } else {
        writer.write_u32::<BigEndian>(1)?; // entry_count
        writer.write_u32::<BigEndian>(1)?; // first_chunk
        writer.write_u32::<BigEndian>(samples.len() as u32)?;
        writer.write_u32::<BigEndian>(1)?; // sample_description_index
    }
    end_box(writer, size_pos)
}

fn write_stsz<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let size_pos = begin_full_box(writer, b"stsz", 0, 0)?;
    writer.write_u32::<BigEndian>(0)?; // per-sample sizes
    writer.write_u32::<BigEndian>(samples.len() as u32)?;
    for sample in samples {
        writer.write_u32::<BigEndian>(sample.size)?;
    }
    end_box(writer, size_pos)
}

fn write_chunk_offsets<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let chunk_offset = samples.first().map(|s| s.offset).unwrap_or(0);

    if chunk_offset > u32::MAX as u64 {
        let size_pos = begin_full_box(writer, b"co64", 0, 0)?;
        writer.write_u32::<BigEndian>(if samples.is_empty() { 0 } else { 1 })?;
        if !samples.is_empty() {
            writer.write_u64::<BigEndian>(chunk_offset)?;
        }
        end_box(writer, size_pos)
    } else {
        let size_pos = begin_full_box(writer, b"stco", 0, 0)?;
        writer.write_u32::<BigEndian>(if samples.is_empty() { 0 } else { 1 })?;
        if !samples.is_empty() {
            writer.write_u32::<BigEndian>(chunk_offset as u32)?;
        }
        end_box(writer, size_pos)
    }
}

fn write_mvex<W: Write + Seek>(writer: &mut W, tracks: &[TrackDesc]) -> MuxResult<()> {
    let size_pos = begin_box(writer, b"mvex")?;
    for track in tracks {
        let trex_pos = begin_full_box(writer, b"trex", 0, 0)?;
        writer.write_u32::<BigEndian>(track.track_id)?;
        writer.write_u32::<BigEndian>(1)?; // default_sample_description_index
        writer.write_u32::<BigEndian>(0)?; // default_sample_duration
        writer.write_u32::<BigEndian>(0)?; // default_sample_size
        writer.write_u32::<BigEndian>(0)?; // default_sample_flags
        end_box(writer, trex_pos)?;
    }
    end_box(writer, size_pos)
}

/// One sample in a fragment's trun.
#[derive(Debug, Clone, Copy)]
pub struct FragmentSample {
    pub size: u32,
    pub duration: u32,
    pub composition_offset: i32,
    pub sync: bool,
}

// ISO/IEC 14496-12 8.8.3.1 sample flags:
// sync samples depend on nothing; everything else depends on an
// earlier sample and is marked non-sync.
const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;
const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;

/// Write a complete moof for one track. The trun's data_offset is
/// backpatched to point just past the mdat header that follows.
pub fn write_moof(
    sequence_number: u32,
    track_id: u32,
    base_decode_time: u64,
    samples: &[FragmentSample],
) -> MuxResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let writer = &mut cursor;

    let moof_pos = begin_box(writer, b"moof")?;

    let mfhd_pos = begin_full_box(writer, b"mfhd", 0, 0)?;
    writer.write_u32::<BigEndian>(sequence_number)?;
    end_box(writer, mfhd_pos)?;

    let traf_pos = begin_box(writer, b"traf")?;

    // tfhd: default-base-is-moof, no optional fields
    let tfhd_pos = begin_full_box(writer, b"tfhd", 0, 0x020000)?;
    writer.write_u32::<BigEndian>(track_id)?;
    end_box(writer, tfhd_pos)?;

    let tfdt_pos = begin_full_box(writer, b"tfdt", 1, 0)?;
    writer.write_u64::<BigEndian>(base_decode_time)?;
    end_box(writer, tfdt_pos)?;

    // trun version 1 (signed composition offsets); flags:
    // data-offset | duration | size | flags | composition offset
    let trun_pos = begin_full_box(writer, b"trun", 1, 0x000f01)?;
    writer.write_u32::<BigEndian>(samples.len() as u32)?;
    let data_offset_pos = writer.stream_position()?;
    writer.write_i32::<BigEndian>(0)?; // patched below
    for sample in samples {
        writer.write_u32::<BigEndian>(sample.duration)?;
        writer.write_u32::<BigEndian>(sample.size)?;
        writer.write_u32::<BigEndian>(if sample.sync {
            SAMPLE_FLAGS_SYNC
        } else {
            SAMPLE_FLAGS_NON_SYNC
        })?;
        writer.write_i32::<BigEndian>(sample.composition_offset)?;
    }
    end_box(writer, trun_pos)?;

    end_box(writer, traf_pos)?;
    end_box(writer, moof_pos)?;

    // payload starts right after the mdat header that follows the moof
    let moof_size = cursor.get_ref().len() as i32;
    cursor.seek(SeekFrom::Start(data_offset_pos))?;
    cursor.write_i32::<BigEndian>(moof_size + 8)?;

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(buf: &[u8], at: usize) -> u32 {
        u32::from_be_bytes(buf[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn ftyp_is_well_formed() {
        let mut cursor = Cursor::new(Vec::new());
        write_ftyp(&mut cursor).unwrap();
        let buf = cursor.into_inner();
        assert_eq!(buf.len(), 28);
        assert_eq!(read_u32(&buf, 0), 28);
        assert_eq!(&buf[4..8], b"ftyp");
        assert_eq!(&buf[8..12], b"isom");
    }

    #[test]
    fn video_codec_mapping() {
        assert_eq!(
            VideoEntryKind::from_codec("avc1.42E01F").unwrap(),
            VideoEntryKind::Avc
        );
        assert_eq!(
            VideoEntryKind::from_codec("vp09.00.10.08").unwrap(),
            VideoEntryKind::Vp9
        );
        assert!(matches!(
            VideoEntryKind::from_codec("theora"),
            Err(MuxError::UnsupportedCodec(_))
        ));
    }

    #[test]
    fn moof_data_offset_points_past_mdat_header() {
        let samples = [FragmentSample {
            size: 1000,
            duration: 33_333,
            composition_offset: 0,
            sync: true,
        }];
        let moof = write_moof(1, 1, 0, &samples).unwrap();

        assert_eq!(read_u32(&moof, 0) as usize, moof.len());
        assert_eq!(&moof[4..8], b"moof");

        // trun: last box inside traf; find it by scanning for the tag
        let trun_at = moof
            .windows(4)
            .position(|w| w == b"trun")
            .unwrap()
            - 4;
        // header(8) + version/flags(4) + sample_count(4)
        let data_offset = read_u32(&moof, trun_at + 16) as i32;
        assert_eq!(data_offset, moof.len() as i32 + 8);
    }

    #[test]
    fn stts_compresses_runs() {
        let samples: Vec<SampleInfo> = (0..5)
            .map(|i| SampleInfo {
                offset: 0,
                size: 10,
                duration: if i < 3 { 100 } else { 200 },
                composition_offset: 0,
                sync: true,
            })
            .collect();

        let mut cursor = Cursor::new(Vec::new());
        write_stts(&mut cursor, &samples).unwrap();
        let buf = cursor.into_inner();

        assert_eq!(read_u32(&buf, 12), 2); // entry_count
        assert_eq!(read_u32(&buf, 16), 3);
        assert_eq!(read_u32(&buf, 20), 100);
        assert_eq!(read_u32(&buf, 24), 2);
        assert_eq!(read_u32(&buf, 28), 200);
    }

    #[test]
    fn all_sync_omits_stss() {
        let samples = [SampleInfo {
            offset: 0,
            size: 10,
            duration: 100,
            composition_offset: 0,
            sync: true,
        }];
        let mut cursor = Cursor::new(Vec::new());
        write_stss(&mut cursor, &samples).unwrap();
        assert!(cursor.into_inner().is_empty());
    }

    #[test]
    fn long_durations_clamp_instead_of_wrapping() {
        // past ~49.7 days at the millisecond movie timescale
        let movie_duration = u32::MAX as u64 + 5_000;
        let track = TrackDesc {
            track_id: 1,
            timescale: 1_000_000,
            duration: (u32::MAX as u64 + 1) * 1_000,
            description: SampleDescription::Audio {
                sample_rate: 48_000,
                channel_count: 2,
                config: None,
            },
            samples: &[],
        };

        let mut cursor = Cursor::new(Vec::new());
        write_moov(&mut cursor, movie_duration, &[track], false).unwrap();
        let buf = cursor.into_inner();

        let mvhd_at = buf.windows(4).position(|w| w == b"mvhd").unwrap() - 4;
        // full box header(12) + creation/modification/timescale(12)
        assert_eq!(read_u32(&buf, mvhd_at + 24), u32::MAX);

        let tkhd_at = buf.windows(4).position(|w| w == b"tkhd").unwrap() - 4;
        // full box header(12) + times/track_id/reserved(16)
        assert_eq!(read_u32(&buf, tkhd_at + 28), u32::MAX);
    }
}
