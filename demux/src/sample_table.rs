//! Sample table parsing and flattening.
//!
//! The stbl children describe samples run-length style across several
//! boxes; the reader wants one flat record per sample, so after parsing
//! we expand everything up front. Sample counts in real files are small
//! enough (tens of thousands) that the flat form is cheap.

use bytes::Buf;

use crate::boxes::{children, full_box, FourCc};
use crate::DemuxError;

/// Upper bound on a declared sample count (dozens of hours of media).
/// Wire values above this are treated as malformed rather than
/// allocation requests.
const MAX_SAMPLE_COUNT: u32 = 1 << 24;

#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    /// stts: (sample_count, sample_delta)
    pub time_to_sample: Vec<(u32, u32)>,
    /// ctts: (sample_count, composition_offset)
    pub composition_offsets: Vec<(u32, i32)>,
    /// stsz, one entry per sample
    pub sizes: Vec<u32>,
    /// stsc: (first_chunk, samples_per_chunk), 1-based chunks
    pub sample_to_chunk: Vec<(u32, u32)>,
    /// stco / co64, absolute file offsets
    pub chunk_offsets: Vec<u64>,
    /// stss, 1-based sample numbers; `None` means every sample is sync
    pub sync_samples: Option<Vec<u32>>,
}

/// One sample, fully resolved: absolute file position plus timing.
#[derive(Debug, Clone, Copy)]
pub struct SampleEntry {
    pub offset: u64,
    pub size: u32,
    /// Composition timestamp in track ticks.
    pub cts: i64,
    pub duration: u32,
    pub sync: bool,
}

fn need(buf: &[u8], bytes: usize, what: &str) -> Result<(), DemuxError> {
    if buf.remaining() < bytes {
        Err(DemuxError::MalformedContainer(format!(
            "{} box too short",
            what
        )))
    } else {
        Ok(())
    }
}

impl SampleTable {
    /// Parse the timing and location boxes out of an stbl body. The
    /// sample description (stsd) is the caller's concern.
    pub fn parse(stbl: &[u8]) -> Result<SampleTable, DemuxError> {
        let mut table = SampleTable::default();

        for child in children(stbl) {
            let (fourcc, body) = child?;
            match fourcc {
                FourCc::STTS => table.parse_stts(body)?,
                FourCc::CTTS => table.parse_ctts(body)?,
                FourCc::STSZ => table.parse_stsz(body)?,
                FourCc::STSC => table.parse_stsc(body)?,
                FourCc::STCO => table.parse_stco(body)?,
                FourCc::CO64 => table.parse_co64(body)?,
                FourCc::STSS => table.parse_stss(body)?,
                _ => {}
            }
        }

        Ok(table)
    }

    fn parse_stts(&mut self, body: &[u8]) -> Result<(), DemuxError> {
        let (_, _, mut buf) = full_box(body)?;
        need(buf, 4, "stts")?;
        let entry_count = buf.get_u32();
        need(buf, entry_count as usize * 8, "stts")?;
        for _ in 0..entry_count {
            self.time_to_sample.push((buf.get_u32(), buf.get_u32()));
        }
        Ok(())
    }

    fn parse_ctts(&mut self, body: &[u8]) -> Result<(), DemuxError> {
        let (_, _, mut buf) = full_box(body)?;
        need(buf, 4, "ctts")?;
        let entry_count = buf.get_u32();
        need(buf, entry_count as usize * 8, "ctts")?;
        for _ in 0..entry_count {
            // version 0 stores the offset unsigned but negative values
            // occur in the wild either way; read as i32 for both.
            self.composition_offsets.push((buf.get_u32(), buf.get_i32()));
        }
        Ok(())
    }

    fn parse_stsz(&mut self, body: &[u8]) -> Result<(), DemuxError> {
        let (_, _, mut buf) = full_box(body)?;
        need(buf, 8, "stsz")?;
        let uniform_size = buf.get_u32();
        let sample_count = buf.get_u32();
        if uniform_size != 0 {
            // the uniform path carries no per-sample bytes to check the
            // count against, so bound it before allocating
            if sample_count > MAX_SAMPLE_COUNT {
                return Err(DemuxError::MalformedContainer(format!(
                    "stsz claims {} samples",
                    sample_count
                )));
            }
            self.sizes = vec![uniform_size; sample_count as usize];
        } else {
            need(buf, sample_count as usize * 4, "stsz")?;
            self.sizes = (0..sample_count).map(|_| buf.get_u32()).collect();
        }
        Ok(())
    }

    fn parse_stsc(&mut self, body: &[u8]) -> Result<(), DemuxError> {
        let (_, _, mut buf) = full_box(body)?;
        need(buf, 4, "stsc")?;
        let entry_count = buf.get_u32();
        need(buf, entry_count as usize * 12, "stsc")?;
        for _ in 0..entry_count {
            let first_chunk = buf.get_u32();
            let samples_per_chunk = buf.get_u32();
            let _sample_description_index = buf.get_u32();
            self.sample_to_chunk.push((first_chunk, samples_per_chunk));
        }
        Ok(())
    }

    fn parse_stco(&mut self, body: &[u8]) -> Result<(), DemuxError> {
        let (_, _, mut buf) = full_box(body)?;
        need(buf, 4, "stco")?;
        let entry_count = buf.get_u32();
        need(buf, entry_count as usize * 4, "stco")?;
        self.chunk_offsets = (0..entry_count).map(|_| buf.get_u32() as u64).collect();
        Ok(())
    }

    fn parse_co64(&mut self, body: &[u8]) -> Result<(), DemuxError> {
        let (_, _, mut buf) = full_box(body)?;
        need(buf, 4, "co64")?;
        let entry_count = buf.get_u32();
        need(buf, entry_count as usize * 8, "co64")?;
        self.chunk_offsets = (0..entry_count).map(|_| buf.get_u64()).collect();
        Ok(())
    }

    fn parse_stss(&mut self, body: &[u8]) -> Result<(), DemuxError> {
        let (_, _, mut buf) = full_box(body)?;
        need(buf, 4, "stss")?;
        let entry_count = buf.get_u32();
        need(buf, entry_count as usize * 4, "stss")?;
        self.sync_samples = Some((0..entry_count).map(|_| buf.get_u32()).collect());
        Ok(())
    }

    /// Expand the run-length boxes into one entry per sample.
    pub fn flatten(&self) -> Result<Vec<SampleEntry>, DemuxError> {
        let sample_count = self.sizes.len();
        let mut entries = Vec::with_capacity(sample_count);
        if sample_count == 0 {
            return Ok(entries);
        }

        // durations + decode timestamps from stts
        let mut durations = Vec::with_capacity(sample_count);
        for &(count, delta) in &self.time_to_sample {
            for _ in 0..count {
                if durations.len() == sample_count {
                    break;
                }
                durations.push(delta);
            }
        }
        if durations.len() != sample_count {
            return Err(DemuxError::MalformedContainer(format!(
                "stts covers {} samples, stsz has {}",
                durations.len(),
                sample_count
            )));
        }

        // composition offsets from ctts (absent = zero)
        let mut cts_offsets = vec![0i32; sample_count];
        let mut at = 0usize;
        for &(count, offset) in &self.composition_offsets {
            for _ in 0..count {
                if at == sample_count {
                    break;
                }
                cts_offsets[at] = offset;
                at += 1;
            }
        }

        // file offsets from stsc runs over stco
        let mut offsets = Vec::with_capacity(sample_count);
        'chunks: for (i, &(first_chunk, samples_per_chunk)) in
            self.sample_to_chunk.iter().enumerate()
        {
            if first_chunk == 0 {
                return Err(DemuxError::MalformedContainer(
                    "stsc chunk numbering starts at zero".to_owned(),
                ));
            }
            let next_first_chunk = self
                .sample_to_chunk
                .get(i + 1)
                .map(|&(first, _)| first as usize)
                .unwrap_or(self.chunk_offsets.len() + 1);

            for chunk in first_chunk as usize..next_first_chunk {
                let base = *self.chunk_offsets.get(chunk - 1).ok_or_else(|| {
                    DemuxError::MalformedContainer(format!(
                        "stsc references chunk {} but stco has {}",
                        chunk,
                        self.chunk_offsets.len()
                    ))
                })?;

                let mut offset = base;
                for _ in 0..samples_per_chunk {
                    if offsets.len() == sample_count {
                        break 'chunks;
                    }
                    offsets.push(offset);
                    offset += self.sizes[offsets.len() - 1] as u64;
                }
            }
        }
        if offsets.len() != sample_count {
            return Err(DemuxError::MalformedContainer(format!(
                "chunk map covers {} samples, stsz has {}",
                offsets.len(),
                sample_count
            )));
        }

        let mut dts = 0u64;
        for i in 0..sample_count {
            let sync = match &self.sync_samples {
                Some(sync_samples) => sync_samples.contains(&(i as u32 + 1)),
                None => true,
            };
            entries.push(SampleEntry {
                offset: offsets[i],
                size: self.sizes[i],
                cts: dts as i64 + cts_offsets[i] as i64,
                duration: durations[i],
                sync,
            });
            dts += durations[i] as u64;
        }

        Ok(entries)
    }
}
