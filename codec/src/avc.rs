use bytes::Buf;

use crate::CodecError;

/// The leading fields of an AVC decoder configuration record (the
/// payload of an `avcC` box), enough to derive the RFC 6381 codec
/// string a decode capability is configured with.
///
/// Bits | Name
/// ---- | ----
/// 8    | Version
/// 8    | Profile Indication
/// 8    | Profile Compatibility
/// 8    | Level Indication
/// 6    | Reserved
/// 2    | NALU Length - 1
#[derive(Debug, Clone)]
pub struct AvcConfigRecord {
    pub profile_indication: u8,
    pub profile_compatibility: u8,
    pub level_indication: u8,
    pub nalu_size: u8,
}

impl AvcConfigRecord {
    pub fn parse(mut buf: &[u8]) -> Result<Self, CodecError> {
        if buf.remaining() < 5 {
            return Err(CodecError::MalformedConfigRecord);
        }

        let version = buf.get_u8();
        if version != 1 {
            return Err(CodecError::MalformedConfigRecord);
        }

        let profile_indication = buf.get_u8();
        let profile_compatibility = buf.get_u8();
        let level_indication = buf.get_u8();
        let nalu_size = (buf.get_u8() & 0x03) + 1;

        Ok(AvcConfigRecord {
            profile_indication,
            profile_compatibility,
            level_indication,
            nalu_size,
        })
    }

    /// `avc1.PPCCLL` — profile, compatibility and level as hex pairs.
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02X}{:02X}{:02X}",
            self.profile_indication, self.profile_compatibility, self.level_indication
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_baseline_record() {
        // version 1, baseline profile (0x42), compat 0xE0, level 3.1
        // (0x1F), 4-byte NALU lengths
        let record = AvcConfigRecord::parse(&[0x01, 0x42, 0xE0, 0x1F, 0xFF]).unwrap();
        assert_eq!(record.profile_indication, 0x42);
        assert_eq!(record.nalu_size, 4);
        assert_eq!(record.codec_string(), "avc1.42E01F");
    }

    #[test]
    fn rejects_unknown_version() {
        let err = AvcConfigRecord::parse(&[0x02, 0x42, 0xE0, 0x1F, 0xFF]).unwrap_err();
        assert!(matches!(err, CodecError::MalformedConfigRecord));
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(AvcConfigRecord::parse(&[0x01, 0x42]).is_err());
    }
}
