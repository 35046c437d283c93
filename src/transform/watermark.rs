use bytes::BytesMut;

use recast_codec::RawFrame;

use crate::Error;

/// Horizontal speed in pixels per frame.
const DEFAULT_DX: i32 = 16;
/// Vertical speed in pixels per frame.
const DEFAULT_DY: i32 = 10;

const DEFAULT_FONT_SIZE: u32 = 80;
const DEFAULT_GLYPH_COUNT: u32 = 4;

/// Alpha of the white stamp, out of 255.
const STAMP_ALPHA: u32 = 128;

/// A translucent stamp that bounces around the frame like the source
/// player's canvas watermark: the bounding box is glyph-count times the
/// font size wide and one font size tall, and reflects off all four
/// edges. Position and velocity live here, in the transform value.
#[derive(Debug)]
pub struct Watermark {
    width: u32,
    height: u32,
    x: i32,
    y: i32,
    dx: i32,
    dy: i32,
}

impl Watermark {
    pub fn new() -> Watermark {
        Watermark::with_size(
            DEFAULT_FONT_SIZE * DEFAULT_GLYPH_COUNT,
            DEFAULT_FONT_SIZE,
        )
    }

    pub fn with_size(width: u32, height: u32) -> Watermark {
        Watermark {
            width,
            height,
            x: 0,
            y: 0,
            dx: DEFAULT_DX,
            dy: DEFAULT_DY,
        }
    }

    pub fn apply(&mut self, frame: RawFrame) -> Result<Option<RawFrame>, Error> {
        let mut out = BytesMut::from(&frame.data[..]);

        let x0 = self.x.max(0) as u32;
        let y0 = self.y.max(0) as u32;
        let x1 = (self.x + self.width as i32).clamp(0, frame.width as i32) as u32;
        let y1 = (self.y + self.height as i32).clamp(0, frame.height as i32) as u32;

        let stride = frame.width as usize * RawFrame::BYTES_PER_PIXEL;
        for y in y0..y1 {
            let row = &mut out[y as usize * stride..(y as usize + 1) * stride];
            for x in x0..x1 {
                let px = &mut row
                    [x as usize * RawFrame::BYTES_PER_PIXEL..(x as usize + 1) * RawFrame::BYTES_PER_PIXEL];
                // source-over with a half-opaque white stamp
                for channel in &mut px[..3] {
                    let blended =
                        (255 * STAMP_ALPHA + *channel as u32 * (255 - STAMP_ALPHA)) / 255;
                    *channel = blended as u8;
                }
            }
        }

        self.advance(frame.width, frame.height);

        let stamped = RawFrame::rgba(
            frame.timestamp_micros,
            frame.duration_micros,
            frame.width,
            frame.height,
            out.freeze(),
        )
        .ok_or_else(|| Error::Transform("watermark output size mismatch".to_owned()))?;

        Ok(Some(stamped))
    }

    fn advance(&mut self, frame_width: u32, frame_height: u32) {
        self.x += self.dx;
        self.y += self.dy;

        if self.x + self.width as i32 > frame_width as i32 || self.x < 0 {
            self.dx = -self.dx;
        }
        if self.y + self.height as i32 > frame_height as i32 || self.y < 0 {
            self.dy = -self.dy;
        }
    }
}

impl Default for Watermark {
    fn default() -> Watermark {
        Watermark::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn black_frame(width: u32, height: u32) -> RawFrame {
        let data = vec![0u8; (width * height) as usize * 4];
        let mut frame = RawFrame::rgba(0, 33_333, width, height, Bytes::from(data)).unwrap();
        // alpha opaque
        let mut raw = frame.data.to_vec();
        for px in raw.chunks_mut(4) {
            px[3] = 255;
        }
        frame.data = Bytes::from(raw);
        frame
    }

    #[test]
    fn stamps_translucent_white_over_the_frame() {
        let mut watermark = Watermark::with_size(4, 2);
        let out = watermark.apply(black_frame(16, 16)).unwrap().unwrap();

        // stamp starts at the origin: 50% white over black
        assert_eq!(&out.data[..3], &[128, 128, 128]);
        // outside the stamp the frame is untouched
        let stride = 16 * 4;
        assert_eq!(&out.data[3 * stride..3 * stride + 3], &[0, 0, 0]);
    }

    #[test]
    fn bounces_off_the_right_edge() {
        let mut watermark = Watermark::with_size(4, 2);
        // 24px wide frame, stamp at x=0 moving +16: one step reaches
        // x=16, 16+4 <= 24 holds, next step would overflow and reflect
        let frame = black_frame(24, 24);
        watermark.apply(frame.clone()).unwrap();
        assert_eq!(watermark.x, 16);
        assert_eq!(watermark.dx, 16);

        watermark.apply(frame.clone()).unwrap();
        assert_eq!(watermark.x, 32);
        // 32 + 4 > 24: horizontal velocity reflected
        assert_eq!(watermark.dx, -16);

        watermark.apply(frame).unwrap();
        assert_eq!(watermark.x, 16);
    }

    #[test]
    fn two_watermarks_do_not_share_position() {
        let mut a = Watermark::with_size(4, 2);
        let b = Watermark::with_size(4, 2);

        a.apply(black_frame(64, 64)).unwrap();
        assert_ne!((a.x, a.y), (b.x, b.y));
    }
}
