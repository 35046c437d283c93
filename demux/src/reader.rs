//! Incremental box reader.
//!
//! [`BoxReader`] is a push-driven state machine. Callers feed it the
//! stream in order, each push tagged with its absolute file offset, and
//! collect events from the returned vector. Internally it keeps a
//! contiguous window of the stream (the segment store); top-level boxes
//! are scanned out of the window, `ftyp` and `moov` are parsed whole,
//! and media bytes are sliced out sample by sample as the sample table
//! directs, after which the window's consumed prefix is discarded.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use log::debug;

use crate::boxes::{self, BoxSize, FourCc};
use crate::moov;
use crate::sample_table::SampleEntry;
use crate::{ContainerInfo, DemuxError, DemuxEvent, SampleUnit};

/// Samples per `DemuxEvent::Samples` batch.
const SAMPLE_BATCH_SIZE: usize = 100;

/// Contiguous window of stream bytes starting at `base`.
struct SegmentStore {
    base: u64,
    len: u64,
    chunks: VecDeque<Bytes>,
}

impl Default for SegmentStore {
    fn default() -> SegmentStore {
        SegmentStore {
            base: 0,
            len: 0,
            chunks: VecDeque::new(),
        }
    }
}

impl SegmentStore {
    fn end(&self) -> u64 {
        self.base + self.len
    }

    fn append(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.len += data.len() as u64;
            self.chunks.push_back(data);
        }
    }

    /// Copy-free when the range lies within one chunk.
    fn slice(&self, offset: u64, len: usize) -> Option<Bytes> {
        // checked: a chunk offset near u64::MAX must not wrap into range
        let range_end = offset.checked_add(len as u64)?;
        if offset < self.base || range_end > self.end() {
            return None;
        }
        if len == 0 {
            return Some(Bytes::new());
        }

        let mut skip = (offset - self.base) as usize;
        let mut iter = self.chunks.iter();

        // find the chunk containing the range start
        let mut chunk = iter.next()?;
        while skip >= chunk.len() {
            skip -= chunk.len();
            chunk = iter.next()?;
        }

        if chunk.len() - skip >= len {
            return Some(chunk.slice(skip..skip + len));
        }

        let mut out = BytesMut::with_capacity(len);
        out.extend_from_slice(&chunk[skip..]);
        while out.len() < len {
            let chunk = iter.next()?;
            let take = (len - out.len()).min(chunk.len());
            out.extend_from_slice(&chunk[..take]);
        }
        Some(out.freeze())
    }

    /// Drop whole chunks that lie entirely below `offset`.
    fn discard_through(&mut self, offset: u64) {
        while let Some(front) = self.chunks.front() {
            let front_len = front.len() as u64;
            if self.base + front_len <= offset {
                self.base += front_len;
                self.len -= front_len;
                self.chunks.pop_front();
            } else {
                break;
            }
        }
    }
}

struct TrackState {
    track_id: u32,
    usable: bool,
    entries: Vec<SampleEntry>,
    /// `suffix_min_offset[i]` = smallest file offset among entries
    /// `i..`; the discard floor, robust to non-monotonic chunk layouts.
    suffix_min_offset: Vec<u64>,
    next: usize,
}

impl TrackState {
    fn new(track_id: u32, usable: bool, entries: Vec<SampleEntry>) -> TrackState {
        let mut suffix_min_offset = vec![0u64; entries.len()];
        let mut min = u64::MAX;
        for i in (0..entries.len()).rev() {
            min = min.min(entries[i].offset);
            suffix_min_offset[i] = min;
        }
        TrackState {
            track_id,
            usable,
            entries,
            suffix_min_offset,
            next: 0,
        }
    }

    fn done(&self) -> bool {
        self.next == self.entries.len()
    }
}

#[derive(Default)]
pub struct BoxReader {
    store: SegmentStore,
    expected_offset: u64,
    scan_ahead: u64,
    tail_media: bool,
    major_brand: Option<String>,
    info: Option<ContainerInfo>,
    tracks: Vec<TrackState>,
    /// First media payload byte seen before moov; held until the sample
    /// table says what of it is needed.
    media_hold: Option<u64>,
    finished: bool,
}

impl BoxReader {
    pub fn new() -> BoxReader {
        BoxReader::default()
    }

    /// True once `Ready` has been emitted.
    pub fn is_ready(&self) -> bool {
        self.info.is_some()
    }

    /// Feed the next run of stream bytes. `offset` must continue
    /// exactly where the previous push ended (the first push is
    /// offset 0).
    pub fn push(&mut self, offset: u64, data: Bytes) -> Result<Vec<DemuxEvent>, DemuxError> {
        if self.finished {
            return Err(DemuxError::MalformedContainer(
                "push after end of stream".to_owned(),
            ));
        }
        if offset != self.expected_offset {
            return Err(DemuxError::NonContiguousInput {
                expected: self.expected_offset,
                actual: offset,
            });
        }
        self.expected_offset += data.len() as u64;
        self.store.append(data);

        let mut events = Vec::new();
        self.scan_boxes(&mut events)?;
        self.extract_samples(&mut events)?;
        self.discard_consumed();
        Ok(events)
    }

    /// Signal end of input. Remaining extractable samples come back as
    /// events; anything unresolved is an error.
    pub fn flush(&mut self) -> Result<Vec<DemuxEvent>, DemuxError> {
        self.finished = true;

        let mut events = Vec::new();
        self.scan_boxes(&mut events)?;

        if self.info.is_none() {
            return Err(DemuxError::MalformedContainer(
                "stream ended without a moov box".to_owned(),
            ));
        }

        self.extract_samples(&mut events)?;

        let store_end = self.store.end();
        if !self.tail_media {
            if store_end > self.scan_ahead {
                return Err(DemuxError::TruncatedStream(format!(
                    "{} trailing bytes of an incomplete box",
                    store_end - self.scan_ahead
                )));
            }
            if self.scan_ahead > store_end {
                return Err(DemuxError::TruncatedStream(
                    "stream ended inside a skipped box".to_owned(),
                ));
            }
        }

        for track in &self.tracks {
            if track.usable && !track.done() {
                return Err(DemuxError::TruncatedStream(format!(
                    "track {}: {} samples not recoverable",
                    track.track_id,
                    track.entries.len() - track.next
                )));
            }
        }

        Ok(events)
    }

    fn scan_boxes(&mut self, events: &mut Vec<DemuxEvent>) -> Result<(), DemuxError> {
        loop {
            if self.tail_media {
                return Ok(());
            }
            let store = &self.store;
            let next_box = self.scan_ahead;
            if next_box >= store.end() {
                return Ok(());
            }

            let avail = ((store.end() - next_box) as usize).min(16);
            let peek = store
                .slice(next_box, avail)
                .ok_or_else(|| DemuxError::MalformedContainer("scan window discarded".to_owned()))?;
            let header = match boxes::parse_header(&peek)? {
                Some(header) => header,
                None => return Ok(()),
            };

            let total = match header.size {
                BoxSize::ToEof => {
                    if header.fourcc == FourCc::MDAT {
                        if self.media_hold.is_none() {
                            self.media_hold = Some(next_box + header.header_len);
                        }
                        self.tail_media = true;
                        return Ok(());
                    }
                    return Err(DemuxError::MalformedContainer(format!(
                        "box `{}` extends to end of stream",
                        header.fourcc
                    )));
                }
                BoxSize::Sized(total) => total,
            };
            let body_offset = next_box + header.header_len;
            let body_len = total - header.header_len;

            match header.fourcc {
                FourCc::FTYP | FourCc::MOOV => {
                    // metadata boxes are parsed whole
                    if store.end() < next_box + total {
                        return Ok(());
                    }
                    let body = store.slice(body_offset, body_len as usize).ok_or_else(|| {
                        DemuxError::MalformedContainer(format!(
                            "`{}` box bytes discarded before parse",
                            header.fourcc
                        ))
                    })?;

                    if header.fourcc == FourCc::FTYP {
                        self.major_brand = boxes::major_brand(&body);
                    } else if self.info.is_none() {
                        self.on_moov(&body, events)?;
                    } else {
                        debug!("ignoring duplicate moov box");
                    }
                }
                FourCc::MDAT => {
                    if self.media_hold.is_none() {
                        self.media_hold = Some(body_offset);
                    }
                }
                other => {
                    debug!("skipping top-level box `{}` ({} bytes)", other, total);
                }
            }

            self.scan_ahead = next_box + total;
        }
    }

    fn on_moov(&mut self, body: &[u8], events: &mut Vec<DemuxEvent>) -> Result<(), DemuxError> {
        let movie = moov::parse(body)?;
        if movie.tracks.is_empty() {
            return Err(DemuxError::MalformedContainer(
                "moov contains no video or audio track".to_owned(),
            ));
        }

        let mut tracks = Vec::with_capacity(movie.tracks.len());
        let mut infos = Vec::with_capacity(movie.tracks.len());
        for parsed in movie.tracks {
            let usable = parsed.info.is_usable();
            tracks.push(TrackState::new(parsed.info.track_id, usable, parsed.entries));
            infos.push(parsed.info);
        }

        let info = ContainerInfo {
            major_brand: self.major_brand.clone(),
            timescale: movie.timescale,
            duration: movie.duration,
            tracks: infos,
        };

        debug!(
            "container ready: {} tracks, movie timescale {}",
            info.tracks.len(),
            info.timescale
        );

        self.tracks = tracks;
        self.info = Some(info.clone());
        events.push(DemuxEvent::Ready(info));
        Ok(())
    }

    fn extract_samples(&mut self, events: &mut Vec<DemuxEvent>) -> Result<(), DemuxError> {
        if self.info.is_none() {
            return Ok(());
        }
        let store = &self.store;

        for track in &mut self.tracks {
            if !track.usable {
                continue;
            }

            loop {
                let mut batch = Vec::new();
                while batch.len() < SAMPLE_BATCH_SIZE {
                    let entry = match track.entries.get(track.next) {
                        Some(entry) => *entry,
                        None => break,
                    };
                    match store.slice(entry.offset, entry.size as usize) {
                        Some(data) => {
                            batch.push(SampleUnit {
                                track_id: track.track_id,
                                cts: entry.cts,
                                duration: entry.duration,
                                sync: entry.sync,
                                data,
                            });
                            track.next += 1;
                        }
                        None => {
                            if entry.offset < store.base {
                                return Err(DemuxError::MalformedContainer(format!(
                                    "track {} sample at offset {} already discarded",
                                    track.track_id, entry.offset
                                )));
                            }
                            // not buffered yet
                            break;
                        }
                    }
                }
                if batch.is_empty() {
                    break;
                }
                events.push(DemuxEvent::Samples {
                    track_id: track.track_id,
                    samples: batch,
                });
            }
        }

        Ok(())
    }

    fn discard_consumed(&mut self) {
        let end = self.store.end();
        let mut floor = if self.tail_media { end } else { self.scan_ahead };

        if self.info.is_none() {
            // media bytes may be needed once the sample table arrives
            if let Some(hold) = self.media_hold {
                floor = floor.min(hold);
            }
        } else {
            for track in &self.tracks {
                if track.usable && !track.done() {
                    floor = floor.min(track.suffix_min_offset[track.next]);
                }
            }
        }

        self.store.discard_through(floor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TrackConfig, TrackKind};

    fn atom(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(&(8 + body.len() as u32).to_be_bytes());
        out.extend_from_slice(fourcc);
        out.extend_from_slice(body);
        out
    }

    fn full_atom(fourcc: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![version, 0, 0, 0];
        payload.extend_from_slice(body);
        atom(fourcc, &payload)
    }

    fn u32s(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    fn avc1_entry(width: u16, height: u16, config: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; 78];
        body[24..26].copy_from_slice(&width.to_be_bytes());
        body[26..28].copy_from_slice(&height.to_be_bytes());
        body.extend_from_slice(&atom(b"avcC", config));
        atom(b"avc1", &body)
    }

    fn video_trak(track_id: u32, sample_sizes: &[u32], chunk_offset: u32, entry: &[u8]) -> Vec<u8> {
        let mut tkhd = vec![0u8; 8];
        tkhd.extend_from_slice(&track_id.to_be_bytes());
        let tkhd = full_atom(b"tkhd", 0, &tkhd);

        // timescale 1000, duration = count * 40 (25fps)
        let mut mdhd_body = vec![0u8; 8];
        mdhd_body.extend_from_slice(&u32s(&[1000, sample_sizes.len() as u32 * 40]));
        let mdhd = full_atom(b"mdhd", 0, &mdhd_body);

        let mut hdlr_body = vec![0u8; 4];
        hdlr_body.extend_from_slice(b"vide");
        hdlr_body.extend_from_slice(&[0u8; 12]);
        let hdlr = full_atom(b"hdlr", 0, &hdlr_body);

        let mut stsd_body = u32s(&[1]);
        stsd_body.extend_from_slice(entry);
        let stsd = full_atom(b"stsd", 0, &stsd_body);

        let stts = full_atom(b"stts", 0, &u32s(&[1, sample_sizes.len() as u32, 40]));
        let mut stsz_body = u32s(&[0, sample_sizes.len() as u32]);
        stsz_body.extend_from_slice(&u32s(sample_sizes));
        let stsz = full_atom(b"stsz", 0, &stsz_body);
        let stsc = full_atom(b"stsc", 0, &u32s(&[1, 1, sample_sizes.len() as u32, 1]));
        let stco = full_atom(b"stco", 0, &u32s(&[1, chunk_offset]));
        let stss = full_atom(b"stss", 0, &u32s(&[1, 1]));

        let stbl = atom(
            b"stbl",
            &[stsd, stts, stsz, stsc, stco, stss].concat(),
        );
        let minf = atom(b"minf", &stbl);
        let mdia = atom(b"mdia", &[mdhd, hdlr, minf].concat());
        atom(b"trak", &[tkhd, mdia].concat())
    }

    const AVCC_BODY: [u8; 7] = [0x01, 0x42, 0xE0, 0x1F, 0xFF, 0xE1, 0x00];

    /// One-video-track file with the given sample payloads.
    fn make_file(sample_payloads: &[&[u8]], moov_last: bool) -> Vec<u8> {
        let mut ftyp_body = Vec::new();
        ftyp_body.extend_from_slice(b"isom");
        ftyp_body.extend_from_slice(&u32s(&[0]));
        ftyp_body.extend_from_slice(b"isom");
        let ftyp = atom(b"ftyp", &ftyp_body);

        let sizes: Vec<u32> = sample_payloads.iter().map(|p| p.len() as u32).collect();
        let payload: Vec<u8> = sample_payloads.concat();

        let mvhd_body = {
            let mut b = vec![0u8; 8];
            b.extend_from_slice(&u32s(&[1000, sizes.len() as u32 * 40]));
            b
        };
        let mvhd = full_atom(b"mvhd", 0, &mvhd_body);

        // moov length does not depend on the stco value, so build once
        // with a placeholder to learn the layout.
        let entry = avc1_entry(64, 48, &AVCC_BODY);
        let probe_moov = atom(
            b"moov",
            &[mvhd.clone(), video_trak(1, &sizes, 0, &entry)].concat(),
        );

        let payload_offset = if moov_last {
            ftyp.len() + 8
        } else {
            ftyp.len() + probe_moov.len() + 8
        } as u32;

        let moov = atom(
            b"moov",
            &[mvhd, video_trak(1, &sizes, payload_offset, &entry)].concat(),
        );
        let mdat = atom(b"mdat", &payload);

        let mut file = ftyp;
        if moov_last {
            file.extend_from_slice(&mdat);
            file.extend_from_slice(&moov);
        } else {
            file.extend_from_slice(&moov);
            file.extend_from_slice(&mdat);
        }
        file
    }

    fn collect_samples(events: &[DemuxEvent]) -> Vec<&SampleUnit> {
        events
            .iter()
            .filter_map(|e| match e {
                DemuxEvent::Samples { samples, .. } => Some(samples.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn single_push_parses_and_extracts() {
        let file = make_file(&[b"aaaaa", b"bbb", b"cc"], false);
        let mut reader = BoxReader::new();

        let mut events = reader.push(0, Bytes::from(file)).unwrap();
        events.extend(reader.flush().unwrap());

        let info = match &events[0] {
            DemuxEvent::Ready(info) => info,
            other => panic!("expected Ready, got {:?}", other),
        };
        assert_eq!(info.major_brand.as_deref(), Some("isom"));
        assert_eq!(info.tracks.len(), 1);
        let track = &info.tracks[0];
        assert_eq!(track.kind, TrackKind::Video);
        match &track.config {
            TrackConfig::Video(params) => {
                assert_eq!(params.codec, "avc1.42E01F");
                assert_eq!((params.width, params.height), (64, 48));
                assert_eq!(&params.description[..], &AVCC_BODY);
            }
            other => panic!("expected video config, got {:?}", other),
        }

        let samples = collect_samples(&events);
        assert_eq!(samples.len(), 3);
        assert_eq!(&samples[0].data[..], b"aaaaa");
        assert_eq!(&samples[2].data[..], b"cc");
        assert!(samples[0].sync);
        assert!(!samples[1].sync);
        assert_eq!(samples[1].cts, 40);
    }

    #[test]
    fn dribbled_pushes_fire_ready_once() {
        let file = make_file(&[b"aaaaa", b"bbb", b"cc"], false);
        let mut reader = BoxReader::new();

        let mut events = Vec::new();
        let mut offset = 0u64;
        for piece in file.chunks(7) {
            events.extend(
                reader
                    .push(offset, Bytes::copy_from_slice(piece))
                    .unwrap(),
            );
            offset += piece.len() as u64;
        }
        events.extend(reader.flush().unwrap());

        let ready_count = events
            .iter()
            .filter(|e| matches!(e, DemuxEvent::Ready(_)))
            .count();
        assert_eq!(ready_count, 1);
        assert_eq!(collect_samples(&events).len(), 3);
    }

    #[test]
    fn moov_at_end_buffers_media() {
        let file = make_file(&[b"aaaaa", b"bbb", b"cc"], true);
        let mut reader = BoxReader::new();

        let mut events = reader.push(0, Bytes::from(file)).unwrap();
        events.extend(reader.flush().unwrap());

        assert!(matches!(events[0], DemuxEvent::Ready(_)));
        let samples = collect_samples(&events);
        assert_eq!(samples.len(), 3);
        assert_eq!(&samples[0].data[..], b"aaaaa");
    }

    #[test]
    fn offset_gap_is_rejected() {
        let file = make_file(&[b"aaaaa"], false);
        let mut reader = BoxReader::new();
        reader
            .push(0, Bytes::copy_from_slice(&file[..10]))
            .unwrap();

        let err = reader
            .push(11, Bytes::copy_from_slice(&file[11..]))
            .unwrap_err();
        assert!(matches!(
            err,
            DemuxError::NonContiguousInput {
                expected: 10,
                actual: 11
            }
        ));
    }

    #[test]
    fn slice_near_u64_max_does_not_wrap() {
        let mut store = SegmentStore::default();
        store.append(Bytes::from_static(b"abcdefgh"));

        // offset + len wraps past zero; must read as out of range
        assert!(store.slice(u64::MAX - 2, 8).is_none());
        assert!(store.slice(u64::MAX, 1).is_none());
        assert_eq!(store.slice(2, 3).unwrap(), Bytes::from_static(b"cde"));
    }

    #[test]
    fn truncation_is_detected_at_flush() {
        let file = make_file(&[b"aaaaa", b"bbb", b"cc"], false);
        let mut reader = BoxReader::new();

        let cut = file.len() - 4;
        reader
            .push(0, Bytes::copy_from_slice(&file[..cut]))
            .unwrap();
        let err = reader.flush().unwrap_err();
        assert!(matches!(err, DemuxError::TruncatedStream(_)));
    }

    #[test]
    fn missing_moov_is_malformed() {
        let mut reader = BoxReader::new();
        reader
            .push(0, Bytes::from(atom(b"mdat", b"xxxx")))
            .unwrap();
        let err = reader.flush().unwrap_err();
        assert!(matches!(err, DemuxError::MalformedContainer(_)));
    }

    #[test]
    fn video_without_config_box_is_marked_unsupported() {
        // raw sample entry with no avcC/hvcC/av1C/vpcC child
        let entry = {
            let mut body = vec![0u8; 78];
            body[24..26].copy_from_slice(&64u16.to_be_bytes());
            body[26..28].copy_from_slice(&48u16.to_be_bytes());
            atom(b"raw ", &body)
        };

        let mvhd = full_atom(b"mvhd", 0, &{
            let mut b = vec![0u8; 8];
            b.extend_from_slice(&u32s(&[1000, 40]));
            b
        });
        let moov = atom(b"moov", &[mvhd, video_trak(1, &[4], 0, &entry)].concat());

        let mut file = moov;
        file.extend_from_slice(&atom(b"mdat", b"xxxx"));

        let mut reader = BoxReader::new();
        let events = reader.push(0, Bytes::from(file)).unwrap();
        let info = match &events[0] {
            DemuxEvent::Ready(info) => info,
            other => panic!("expected Ready, got {:?}", other),
        };
        assert!(matches!(
            info.tracks[0].config,
            TrackConfig::Unsupported { .. }
        ));
        // unsupported track's samples are never extracted
        assert!(reader.flush().unwrap().is_empty());
    }

    #[test]
    fn batches_are_capped() {
        let payloads: Vec<Vec<u8>> = (0..250).map(|i| vec![i as u8; 3]).collect();
        let refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let file = make_file(&refs, false);

        let mut reader = BoxReader::new();
        let events = reader.push(0, Bytes::from(file)).unwrap();

        let batch_sizes: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                DemuxEvent::Samples { samples, .. } => Some(samples.len()),
                _ => None,
            })
            .collect();
        assert_eq!(batch_sizes, vec![100, 100, 50]);
    }
}
