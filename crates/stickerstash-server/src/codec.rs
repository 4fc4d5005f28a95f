//! Image codec
//!
//! Decodes photos and WebP stickers, scales them to fit a square bounding box
//! (the longest side becomes exactly `max_dimension`) and re-encodes as PNG.

use image::imageops::FilterType;
use image::ImageFormat;
use std::io::Cursor;
use stickerstash_core::{Codec, CodecError};

#[derive(Debug, Clone)]
pub struct ImageCodec {
    /// Largest accepted input
    pub max_input_bytes: usize,
}

impl ImageCodec {
    pub fn new(max_input_bytes: usize) -> Self {
        Self { max_input_bytes }
    }
}

impl Codec for ImageCodec {
    fn convert_to_target_format(
        &self,
        bytes: &[u8],
        max_dimension: u32,
    ) -> Result<Vec<u8>, CodecError> {
        if bytes.len() > self.max_input_bytes {
            return Err(CodecError::Oversized {
                size: bytes.len(),
                limit: self.max_input_bytes,
            });
        }

        let decoded =
            image::load_from_memory(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        let resized = decoded.resize(max_dimension, max_dimension, FilterType::Lanczos3);

        let mut out = Vec::new();
        resized
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(out)
    }
}
