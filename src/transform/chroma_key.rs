use bytes::BytesMut;

use recast_codec::RawFrame;

use crate::Error;

pub const DEFAULT_SIMILARITY: f32 = 0.4;
pub const DEFAULT_SMOOTHNESS: f32 = 0.05;
pub const DEFAULT_SPILL: f32 = 0.05;

/// CPU port of the source player's chroma-key fragment shader: pixels
/// whose chroma lands within `similarity` of the key color go
/// transparent, `smoothness` widens the alpha ramp at the boundary, and
/// `spill` desaturates the fringe so the key color does not bleed into
/// kept pixels.
#[derive(Debug)]
pub struct ChromaKey {
    key_uv: (f32, f32),
    similarity: f32,
    smoothness: f32,
    spill: f32,
}

impl ChromaKey {
    pub fn new(key_color: [u8; 3]) -> ChromaKey {
        ChromaKey::with_thresholds(
            key_color,
            DEFAULT_SIMILARITY,
            DEFAULT_SMOOTHNESS,
            DEFAULT_SPILL,
        )
    }

    pub fn with_thresholds(
        key_color: [u8; 3],
        similarity: f32,
        smoothness: f32,
        spill: f32,
    ) -> ChromaKey {
        ChromaKey {
            key_uv: rgb_to_uv(
                key_color[0] as f32 / 255.0,
                key_color[1] as f32 / 255.0,
                key_color[2] as f32 / 255.0,
            ),
            similarity,
            smoothness: smoothness.max(f32::EPSILON),
            spill: spill.max(f32::EPSILON),
        }
    }

    pub fn apply(&mut self, frame: RawFrame) -> Result<Option<RawFrame>, Error> {
        let mut out = BytesMut::from(&frame.data[..]);

        for px in out.chunks_mut(RawFrame::BYTES_PER_PIXEL) {
            let r = px[0] as f32 / 255.0;
            let g = px[1] as f32 / 255.0;
            let b = px[2] as f32 / 255.0;

            let (u, v) = rgb_to_uv(r, g, b);
            let du = u - self.key_uv.0;
            let dv = v - self.key_uv.1;
            let chroma_dist = (du * du + dv * dv).sqrt();

            // negative: inside the key; positive: distance past it
            let base_mask = chroma_dist - self.similarity;
            let full_mask = ((base_mask / self.smoothness).clamp(0.0, 1.0)).powf(1.5);
            let spill_val = ((base_mask / self.spill).clamp(0.0, 1.0)).powf(1.5);

            let desat = (r * 0.2126 + g * 0.7152 + b * 0.0722).clamp(0.0, 1.0);
            px[0] = (mix(desat, r, spill_val) * 255.0).round() as u8;
            px[1] = (mix(desat, g, spill_val) * 255.0).round() as u8;
            px[2] = (mix(desat, b, spill_val) * 255.0).round() as u8;
            px[3] = (full_mask * 255.0).round() as u8;
        }

        let keyed = RawFrame::rgba(
            frame.timestamp_micros,
            frame.duration_micros,
            frame.width,
            frame.height,
            out.freeze(),
        )
        .ok_or_else(|| Error::Transform("chroma key output size mismatch".to_owned()))?;

        Ok(Some(keyed))
    }
}

/// BT.601-style RGB to UV projection, biased into [0, 1].
fn rgb_to_uv(r: f32, g: f32, b: f32) -> (f32, f32) {
    (
        r * -0.169 + g * -0.331 + b * 0.5 + 0.5,
        r * 0.5 + g * -0.419 + b * -0.081 + 0.5,
    )
}

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const GREEN: [u8; 3] = [0, 255, 0];

    fn one_pixel(rgba: [u8; 4]) -> RawFrame {
        RawFrame::rgba(0, 33_333, 1, 1, Bytes::from(rgba.to_vec())).unwrap()
    }

    #[test]
    fn key_color_goes_fully_transparent() {
        let mut key = ChromaKey::new(GREEN);
        let out = key.apply(one_pixel([0, 255, 0, 255])).unwrap().unwrap();
        assert_eq!(out.data[3], 0);
    }

    #[test]
    fn distant_color_stays_opaque_and_unchanged() {
        let mut key = ChromaKey::new(GREEN);
        let out = key.apply(one_pixel([255, 0, 0, 255])).unwrap().unwrap();
        assert_eq!(out.data[3], 255);
        // far past the spill threshold: color untouched
        assert_eq!(&out.data[..3], &[255, 0, 0]);
    }

    #[test]
    fn near_key_color_is_partially_masked() {
        // dull green near the key but past similarity
        let mut key = ChromaKey::with_thresholds(GREEN, 0.1, 0.5, 0.5);
        let out = key.apply(one_pixel([80, 220, 80, 255])).unwrap().unwrap();
        let alpha = out.data[3];
        assert!(alpha > 0 && alpha < 255, "alpha was {}", alpha);
    }
}
