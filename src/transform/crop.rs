use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use recast_codec::RawFrame;

use crate::Error;

/// A sub-rectangle of the source frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Copies a fixed rectangle out of every frame.
#[derive(Debug)]
pub struct Crop {
    rect: CropRect,
}

impl Crop {
    /// Bounds are checked here, against the source dimensions the
    /// container reported, so a bad rectangle fails the run before any
    /// frame is decoded.
    pub fn new(rect: CropRect, source_width: u32, source_height: u32) -> Result<Crop, Error> {
        if rect.width == 0 || rect.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "crop rectangle {}x{} is empty",
                rect.width, rect.height
            )));
        }

        let right = rect.x.checked_add(rect.width);
        let bottom = rect.y.checked_add(rect.height);
        match (right, bottom) {
            (Some(right), Some(bottom)) if right <= source_width && bottom <= source_height => {
                Ok(Crop { rect })
            }
            _ => Err(Error::InvalidConfig(format!(
                "crop rectangle {}x{}+{}+{} exceeds source {}x{}",
                rect.width, rect.height, rect.x, rect.y, source_width, source_height
            ))),
        }
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.rect.width, self.rect.height)
    }

    pub fn apply(&mut self, frame: RawFrame) -> Result<Option<RawFrame>, Error> {
        let rect = self.rect;
        if rect.x + rect.width > frame.width || rect.y + rect.height > frame.height {
            return Err(Error::Transform(format!(
                "frame {}x{} smaller than crop source",
                frame.width, frame.height
            )));
        }

        let row_bytes = rect.width as usize * RawFrame::BYTES_PER_PIXEL;
        let mut out = BytesMut::with_capacity(rect.height as usize * row_bytes);

        let x_offset = rect.x as usize * RawFrame::BYTES_PER_PIXEL;
        for y in rect.y..rect.y + rect.height {
            let row = frame.row(y);
            out.extend_from_slice(&row[x_offset..x_offset + row_bytes]);
        }

        let cropped = RawFrame::rgba(
            frame.timestamp_micros,
            frame.duration_micros,
            rect.width,
            rect.height,
            out.freeze(),
        )
        .ok_or_else(|| Error::Transform("crop output size mismatch".to_owned()))?;

        Ok(Some(cropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(width: u32, height: u32) -> RawFrame {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 0, 255]);
            }
        }
        RawFrame::rgba(0, 33_333, width, height, Bytes::from(data)).unwrap()
    }

    #[test]
    fn bounds_checked_at_construction() {
        let rect = CropRect {
            x: 100,
            y: 0,
            width: 640,
            height: 360,
        };
        assert!(matches!(
            Crop::new(rect, 720, 1280),
            Err(Error::InvalidConfig(_))
        ));
        assert!(Crop::new(rect, 740, 360).is_ok());
    }

    #[test]
    fn crops_the_requested_rectangle() {
        let rect = CropRect {
            x: 2,
            y: 1,
            width: 3,
            height: 2,
        };
        let mut crop = Crop::new(rect, 8, 4).unwrap();

        let out = crop.apply(frame(8, 4)).unwrap().unwrap();
        assert_eq!((out.width, out.height), (3, 2));
        // first output pixel is source (2, 1)
        assert_eq!(&out.data[..4], &[2, 1, 0, 255]);
        // first pixel of second row is source (2, 2)
        assert_eq!(&out.row(1)[..4], &[2, 2, 0, 255]);
    }

    #[test]
    fn cropping_twice_with_same_rect_is_idempotent_on_content() {
        let rect = CropRect {
            x: 0,
            y: 0,
            width: 4,
            height: 3,
        };
        let mut crop = Crop::new(rect, 8, 4).unwrap();
        let once = crop.apply(frame(8, 4)).unwrap().unwrap();

        let mut crop_again = Crop::new(rect, 4, 3).unwrap();
        let twice = crop_again.apply(once.clone()).unwrap().unwrap();

        assert_eq!(once.data, twice.data);
    }
}
