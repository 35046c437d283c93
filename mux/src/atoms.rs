//! Atom writing primitives.
//!
//! Every box starts with a 4-byte big-endian size (header included)
//! and a 4-byte type. Sizes are rarely known up front, so boxes are
//! written with [`begin_box`] / [`end_box`]: a zero placeholder goes
//! out first and is patched once the content length is known. Full
//! boxes carry an extra version byte and 3 flag bytes.

use std::io::{Seek, SeekFrom, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::MuxResult;

/// Movie-level timescale: millisecond precision.
pub const MOVIE_TIMESCALE: u32 = 1_000;

/// Media-level timescale: microseconds, so chunk timestamps carry over
/// without rounding.
pub const MEDIA_TIMESCALE: u32 = 1_000_000;

/// Start a box: placeholder size + type. Returns the position of the
/// size field for [`end_box`].
pub fn begin_box<W: Write + Seek>(writer: &mut W, fourcc: &[u8; 4]) -> MuxResult<u64> {
    let size_pos = writer.stream_position()?;
    writer.write_u32::<BigEndian>(0)?;
    writer.write_all(fourcc)?;
    Ok(size_pos)
}

/// Start a full box: placeholder size + type + version + flags.
pub fn begin_full_box<W: Write + Seek>(
    writer: &mut W,
    fourcc: &[u8; 4],
    version: u8,
    flags: u32,
) -> MuxResult<u64> {
    let size_pos = begin_box(writer, fourcc)?;
    writer.write_u32::<BigEndian>(((version as u32) << 24) | (flags & 0x00ff_ffff))?;
    Ok(size_pos)
}

/// Patch the size field of a box opened with [`begin_box`].
pub fn end_box<W: Write + Seek>(writer: &mut W, size_pos: u64) -> MuxResult<()> {
    let end = writer.stream_position()?;
    let size = end - size_pos;
    debug_assert!(size <= u32::MAX as u64);
    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u32::<BigEndian>(size as u32)?;
    writer.seek(SeekFrom::Start(end))?;
    Ok(())
}

/// Header for a box whose payload length is already known, e.g. mdat.
/// Falls back to a largesize header when the payload does not fit a
/// 32-bit size.
pub fn write_sized_header<W: Write>(
    writer: &mut W,
    fourcc: &[u8; 4],
    payload_len: u64,
) -> MuxResult<u64> {
    if payload_len + 8 <= u32::MAX as u64 {
        writer.write_u32::<BigEndian>(payload_len as u32 + 8)?;
        writer.write_all(fourcc)?;
        Ok(8)
    } else {
        writer.write_u32::<BigEndian>(1)?;
        writer.write_all(fourcc)?;
        writer.write_u64::<BigEndian>(payload_len + 16)?;
        Ok(16)
    }
}

/// 16.16 fixed point.
pub fn write_fixed_16_16<W: Write>(writer: &mut W, value: f64) -> MuxResult<()> {
    writer.write_i32::<BigEndian>((value * 65536.0).round() as i32)?;
    Ok(())
}

/// 8.8 fixed point.
pub fn write_fixed_8_8<W: Write>(writer: &mut W, value: f64) -> MuxResult<()> {
    writer.write_i16::<BigEndian>((value * 256.0).round() as i16)?;
    Ok(())
}

pub fn write_zeros<W: Write>(writer: &mut W, count: usize) -> MuxResult<()> {
    const ZEROS: [u8; 32] = [0; 32];
    let mut remaining = count;
    while remaining > 0 {
        let take = remaining.min(ZEROS.len());
        writer.write_all(&ZEROS[..take])?;
        remaining -= take;
    }
    Ok(())
}

/// The unity transformation matrix used by mvhd and tkhd.
pub fn write_unity_matrix<W: Write>(writer: &mut W) -> MuxResult<()> {
    write_fixed_16_16(writer, 1.0)?;
    write_fixed_16_16(writer, 0.0)?;
    write_fixed_16_16(writer, 0.0)?;
    write_fixed_16_16(writer, 0.0)?;
    write_fixed_16_16(writer, 1.0)?;
    write_fixed_16_16(writer, 0.0)?;
    write_fixed_16_16(writer, 0.0)?;
    write_fixed_16_16(writer, 0.0)?;
    // 1.0 in 2.30 fixed point
    writer.write_u32::<BigEndian>(0x4000_0000)?;
    Ok(())
}

/// ISO 639-2/T language packed into 3x5 bits; falls back to "und".
pub fn encode_language(lang: &str) -> u16 {
    let bytes = lang.as_bytes();
    if bytes.len() < 3 || bytes.iter().take(3).any(|b| !b.is_ascii_lowercase()) {
        return encode_language("und");
    }
    let a = (bytes[0] - 0x60) as u16;
    let b = (bytes[1] - 0x60) as u16;
    let c = (bytes[2] - 0x60) as u16;
    (a << 10) | (b << 5) | c
}

/// MPEG-4 descriptor length, expandable encoding.
pub fn write_descriptor_length<W: Write>(writer: &mut W, len: usize) -> MuxResult<()> {
    let mut groups = [0u8; 4];
    let mut count = 0;
    let mut value = len;
    loop {
        groups[count] = (value & 0x7f) as u8;
        count += 1;
        value >>= 7;
        if value == 0 || count == 4 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i > 0 { 0x80 } else { 0 };
        writer.write_u8(groups[i] | continuation)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn begin_end_box_patches_size() {
        let mut cursor = Cursor::new(Vec::new());
        let pos = begin_box(&mut cursor, b"moov").unwrap();
        cursor.write_all(&[0xaa; 20]).unwrap();
        end_box(&mut cursor, pos).unwrap();

        let buf = cursor.into_inner();
        assert_eq!(buf.len(), 28);
        assert_eq!(&buf[..4], &28u32.to_be_bytes());
        assert_eq!(&buf[4..8], b"moov");
    }

    #[test]
    fn full_box_packs_version_and_flags() {
        let mut cursor = Cursor::new(Vec::new());
        let pos = begin_full_box(&mut cursor, b"tkhd", 1, 0x000003).unwrap();
        end_box(&mut cursor, pos).unwrap();

        let buf = cursor.into_inner();
        assert_eq!(&buf[8..12], &[0x01, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn sized_header_switches_to_largesize() {
        let mut small = Vec::new();
        assert_eq!(write_sized_header(&mut small, b"mdat", 100).unwrap(), 8);
        assert_eq!(&small[..4], &108u32.to_be_bytes());

        let mut large = Vec::new();
        assert_eq!(
            write_sized_header(&mut large, b"mdat", u32::MAX as u64).unwrap(),
            16
        );
        assert_eq!(&large[..4], &1u32.to_be_bytes());
        assert_eq!(
            &large[8..16],
            &(u32::MAX as u64 + 16).to_be_bytes()
        );
    }

    #[test]
    fn language_encoding() {
        // u=0x15, n=0x0e, d=0x04
        assert_eq!(encode_language("und"), 0x55c4);
        assert_eq!(encode_language(""), 0x55c4);
    }

    #[test]
    fn descriptor_length_expands() {
        let mut short = Vec::new();
        write_descriptor_length(&mut short, 0x20).unwrap();
        assert_eq!(short, vec![0x20]);

        let mut long = Vec::new();
        write_descriptor_length(&mut long, 0x1234).unwrap();
        assert_eq!(long, vec![0x80 | 0x24, 0x34]);
    }
}
