//! Box (atom) header parsing and child-box iteration.

use std::fmt;

use crate::DemuxError;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const FTYP: FourCc = FourCc(*b"ftyp");
    pub const MOOV: FourCc = FourCc(*b"moov");
    pub const MDAT: FourCc = FourCc(*b"mdat");
    pub const MVHD: FourCc = FourCc(*b"mvhd");
    pub const TRAK: FourCc = FourCc(*b"trak");
    pub const TKHD: FourCc = FourCc(*b"tkhd");
    pub const MDIA: FourCc = FourCc(*b"mdia");
    pub const MDHD: FourCc = FourCc(*b"mdhd");
    pub const HDLR: FourCc = FourCc(*b"hdlr");
    pub const MINF: FourCc = FourCc(*b"minf");
    pub const STBL: FourCc = FourCc(*b"stbl");
    pub const STSD: FourCc = FourCc(*b"stsd");
    pub const STTS: FourCc = FourCc(*b"stts");
    pub const CTTS: FourCc = FourCc(*b"ctts");
    pub const STSZ: FourCc = FourCc(*b"stsz");
    pub const STSC: FourCc = FourCc(*b"stsc");
    pub const STCO: FourCc = FourCc(*b"stco");
    pub const CO64: FourCc = FourCc(*b"co64");
    pub const STSS: FourCc = FourCc(*b"stss");
    pub const AVCC: FourCc = FourCc(*b"avcC");
    pub const HVCC: FourCc = FourCc(*b"hvcC");
    pub const AV1C: FourCc = FourCc(*b"av1C");
    pub const VPCC: FourCc = FourCc(*b"vpcC");
    pub const MP4A: FourCc = FourCc(*b"mp4a");
    pub const ESDS: FourCc = FourCc(*b"esds");
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() { b as char } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum BoxSize {
    /// Total box size in bytes, header included.
    Sized(u64),
    /// `size == 0`: the box runs to the end of the stream.
    ToEof,
}

#[derive(Debug, Clone)]
pub struct BoxHeader {
    pub fourcc: FourCc,
    pub header_len: u64,
    pub size: BoxSize,
}

/// Parse a box header from the front of `buf`. Returns `Ok(None)` when
/// more bytes are needed (headers are at most 16 bytes).
pub fn parse_header(buf: &[u8]) -> Result<Option<BoxHeader>, DemuxError> {
    if buf.len() < 8 {
        return Ok(None);
    }

    let size32 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let fourcc = FourCc([buf[4], buf[5], buf[6], buf[7]]);

    match size32 {
        0 => Ok(Some(BoxHeader {
            fourcc,
            header_len: 8,
            size: BoxSize::ToEof,
        })),
        1 => {
            if buf.len() < 16 {
                return Ok(None);
            }
            let largesize = u64::from_be_bytes([
                buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
            ]);
            if largesize < 16 {
                return Err(DemuxError::MalformedContainer(format!(
                    "box `{}` largesize {} smaller than its header",
                    fourcc, largesize
                )));
            }
            Ok(Some(BoxHeader {
                fourcc,
                header_len: 16,
                size: BoxSize::Sized(largesize),
            }))
        }
        2..=7 => Err(DemuxError::MalformedContainer(format!(
            "box `{}` size {} smaller than its header",
            fourcc, size32
        ))),
        _ => Ok(Some(BoxHeader {
            fourcc,
            header_len: 8,
            size: BoxSize::Sized(size32 as u64),
        })),
    }
}

/// Iterate the child boxes of a fully-buffered parent body.
pub fn children(body: &[u8]) -> Children<'_> {
    Children { buf: body }
}

pub struct Children<'a> {
    buf: &'a [u8],
}

impl<'a> Iterator for Children<'a> {
    type Item = Result<(FourCc, &'a [u8]), DemuxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }

        let header = match parse_header(self.buf) {
            Ok(Some(header)) => header,
            Ok(None) => {
                self.buf = &[];
                return Some(Err(DemuxError::MalformedContainer(
                    "truncated child box header".to_owned(),
                )));
            }
            Err(e) => {
                self.buf = &[];
                return Some(Err(e));
            }
        };

        let total = match header.size {
            BoxSize::Sized(total) => total,
            // A last-child box may run to the end of its parent.
            BoxSize::ToEof => self.buf.len() as u64,
        };

        if total < header.header_len || total > self.buf.len() as u64 {
            let err = DemuxError::MalformedContainer(format!(
                "child box `{}` overruns its parent",
                header.fourcc
            ));
            self.buf = &[];
            return Some(Err(err));
        }

        let (child, rest) = self.buf.split_at(total as usize);
        self.buf = rest;
        Some(Ok((header.fourcc, &child[header.header_len as usize..])))
    }
}

/// First child with the given type, body only.
pub fn find_child(body: &[u8], fourcc: FourCc) -> Result<Option<&[u8]>, DemuxError> {
    for child in children(body) {
        let (child_fourcc, child_body) = child?;
        if child_fourcc == fourcc {
            return Ok(Some(child_body));
        }
    }
    Ok(None)
}

/// Split a full box body into (version, flags, payload).
pub fn full_box(body: &[u8]) -> Result<(u8, u32, &[u8]), DemuxError> {
    if body.len() < 4 {
        return Err(DemuxError::MalformedContainer(
            "full box shorter than its version and flags".to_owned(),
        ));
    }
    let version = body[0];
    let flags = u32::from_be_bytes([0, body[1], body[2], body[3]]);
    Ok((version, flags, &body[4..]))
}

pub fn major_brand(ftyp_body: &[u8]) -> Option<String> {
    ftyp_body
        .get(..4)
        .map(|b| String::from_utf8_lossy(b).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_header() {
        let buf = [0, 0, 0, 16, b'm', b'o', b'o', b'v', 0, 0, 0, 0, 0, 0, 0, 0];
        let header = parse_header(&buf).unwrap().unwrap();
        assert_eq!(header.fourcc, FourCc::MOOV);
        assert_eq!(header.header_len, 8);
        assert!(matches!(header.size, BoxSize::Sized(16)));
    }

    #[test]
    fn parses_largesize_header() {
        let mut buf = vec![0, 0, 0, 1, b'm', b'd', b'a', b't'];
        buf.extend_from_slice(&0x1_0000_0010u64.to_be_bytes());
        let header = parse_header(&buf).unwrap().unwrap();
        assert_eq!(header.header_len, 16);
        assert!(matches!(header.size, BoxSize::Sized(0x1_0000_0010)));
    }

    #[test]
    fn zero_size_runs_to_eof() {
        let buf = [0, 0, 0, 0, b'm', b'd', b'a', b't'];
        let header = parse_header(&buf).unwrap().unwrap();
        assert!(matches!(header.size, BoxSize::ToEof));
    }

    #[test]
    fn short_buffer_wants_more() {
        assert!(parse_header(&[0, 0, 0]).unwrap().is_none());
        // largesize header needs all 16 bytes
        assert!(parse_header(&[0, 0, 0, 1, b'm', b'd', b'a', b't'])
            .unwrap()
            .is_none());
    }

    #[test]
    fn undersized_box_is_malformed() {
        let buf = [0, 0, 0, 5, b'f', b'r', b'e', b'e'];
        assert!(parse_header(&buf).is_err());
    }

    #[test]
    fn iterates_children() {
        let mut parent = Vec::new();
        for (fourcc, body) in [(*b"mvhd", &[1u8, 2, 3][..]), (*b"trak", &[][..])] {
            parent.extend_from_slice(&(8 + body.len() as u32).to_be_bytes());
            parent.extend_from_slice(&fourcc);
            parent.extend_from_slice(body);
        }

        let kids: Vec<_> = children(&parent).collect::<Result<_, _>>().unwrap();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].0, FourCc::MVHD);
        assert_eq!(kids[0].1, &[1, 2, 3]);
        assert_eq!(kids[1].0, FourCc::TRAK);
    }

    #[test]
    fn child_overrunning_parent_is_malformed() {
        let mut parent = Vec::new();
        parent.extend_from_slice(&100u32.to_be_bytes());
        parent.extend_from_slice(b"trak");
        parent.extend_from_slice(&[0; 4]);
        assert!(find_child(&parent, FourCc::TRAK).is_err());
    }
}
