//! Codec and localization collaborators

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("input is {size} bytes, limit is {limit} bytes")]
    Oversized { size: usize, limit: usize },

    #[error("unsupported or corrupt image: {0}")]
    Decode(String),

    #[error("failed to encode image: {0}")]
    Encode(String),
}

/// Resizes and re-encodes raw images into the platform's sticker format.
pub trait Codec: Send + Sync {
    fn convert_to_target_format(
        &self,
        bytes: &[u8],
        max_dimension: u32,
    ) -> Result<Vec<u8>, CodecError>;
}

/// The set of language codes the localization catalogue supports.
pub trait LanguageCatalog: Send + Sync {
    fn is_supported_language(&self, code: &str) -> bool;
}
