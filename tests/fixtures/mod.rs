//! Generated photos and canned model replies for integration tests

#![allow(dead_code)]

use base64::Engine;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// A solid-colour PNG of the given size as a data URL.
pub fn png_data_url(width: u32, height: u32) -> String {
    let photo = RgbImage::from_pixel(width, height, Rgb([40, 160, 90]));
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(photo)
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("encode test PNG");
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes.into_inner())
    )
}

/// Canned replies a vision model might give.
pub struct VisionReply;

impl VisionReply {
    pub fn verified(score: u32, action: &str) -> String {
        format!(
            r#"Here is my assessment: {{"verified": true, "score": {score}, "action": "{action}", "narrative": "Great {action} today!"}}"#
        )
    }

    pub fn rejected() -> String {
        r#"{"verified": false, "score": 0, "action": "Unknown", "narrative": "This does not look like an eco action."}"#
            .to_string()
    }

    pub fn garbage() -> String {
        "I cannot comply with JSON today.".to_string()
    }
}

/// A voucher draft a text model might give.
pub fn voucher_draft(title: &str) -> String {
    format!(r#"{{"title": "{title}", "description": "Partner offer for green heroes.", "code": "MODEL-CODE"}}"#)
}
