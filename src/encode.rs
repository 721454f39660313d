use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::error::{Result, VerifyError};
use crate::types::{CapturedImage, ImageSource};

/// A transport-safe image payload: base64 data (no scheme prefix, `=`-padded
/// to a multiple of 4) plus the declared media type, unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: String,
    pub mime_type: String,
}

/// Encode an image for inline transport. Deterministic; the only side effect
/// is reading file-backed sources, which fails with `ImageRead`.
pub async fn encode(image: &CapturedImage) -> Result<EncodedImage> {
    let bytes = match &image.source {
        ImageSource::Memory(bytes) => bytes.clone(),
        ImageSource::File(path) => tokio::fs::read(path)
            .await
            .map_err(|e| VerifyError::ImageRead(format!("{}: {}", path.display(), e)))?,
    };

    Ok(EncodedImage {
        data: STANDARD.encode(&bytes),
        mime_type: image.mime_type.clone(),
    })
}
