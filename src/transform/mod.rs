//! Per-frame RGBA transforms applied between decode and encode.

pub mod chroma_key;
pub mod crop;
pub mod watermark;

pub use chroma_key::ChromaKey;
pub use crop::{Crop, CropRect};
pub use watermark::Watermark;

use recast_codec::RawFrame;

use crate::Error;

/// The transform selected for a pipeline run.
///
/// Transforms consume their input frame; `Ok(None)` drops the frame
/// from the stream. Moving transforms (the watermark) keep their
/// position in the value itself, so two concurrent runs never share
/// state.
#[derive(Debug)]
pub enum Transform {
    Crop(Crop),
    Watermark(Watermark),
    ChromaKey(ChromaKey),
}

impl Transform {
    pub fn apply(&mut self, frame: RawFrame) -> Result<Option<RawFrame>, Error> {
        match self {
            Transform::Crop(crop) => crop.apply(frame),
            Transform::Watermark(watermark) => watermark.apply(frame),
            Transform::ChromaKey(chroma_key) => chroma_key.apply(frame),
        }
    }

    /// Output dimensions for a given input size, known before any frame
    /// is processed.
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Transform::Crop(crop) => crop.output_size(),
            Transform::Watermark(_) | Transform::ChromaKey(_) => (width, height),
        }
    }
}
