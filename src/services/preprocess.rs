use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

/// Canonical prefix for every photo the preprocessor emits.
pub const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Resize and re-encode bounds for inbound photos.
#[derive(Debug, Clone, Copy)]
pub struct PreprocessPolicy {
    pub max_edge: u32,
    pub quality: u8,
}

impl Default for PreprocessPolicy {
    fn default() -> Self {
        Self {
            max_edge: 1024,
            quality: 70,
        }
    }
}

/// Normalizes inbound photos before they are stored or sent to the vision model.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePreprocessor {
    policy: PreprocessPolicy,
}

impl ImagePreprocessor {
    pub fn new(policy: PreprocessPolicy) -> Self {
        Self { policy }
    }

    /// Downscale and re-encode a data URL or bare base64 photo as a JPEG data URL.
    ///
    /// Best effort: any decode or encode failure returns the input unchanged.
    pub fn compress(&self, raw: &str) -> String {
        match self.try_compress(raw) {
            Ok(normalized) => normalized,
            Err(e) => {
                tracing::warn!(error = %e, "Image preprocessing failed, keeping original payload");
                raw.to_string()
            }
        }
    }

    fn try_compress(&self, raw: &str) -> Result<String, PreprocessError> {
        let bytes = decode_payload(raw)?;
        let decoded = image::load_from_memory(&bytes)?;

        let max_edge = self.policy.max_edge.max(1);
        let resized = if decoded.width() > max_edge || decoded.height() > max_edge {
            decoded.resize(max_edge, max_edge, FilterType::Triangle)
        } else {
            decoded
        };

        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

        let mut encoded = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut encoded, self.policy.quality.clamp(1, 100));
        rgb.write_with_encoder(encoder)?;

        Ok(format!(
            "{}{}",
            JPEG_DATA_URL_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(&encoded)
        ))
    }
}

/// Extract the raw image bytes from a data URL or bare base64 string.
pub fn decode_payload(raw: &str) -> Result<Vec<u8>, PreprocessError> {
    let encoded = match raw.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        Some(_) => return Err(PreprocessError::NotAnImage),
        None => raw,
    };
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
    Ok(bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Payload is not an image data URL")]
    NotAnImage,

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),
}
