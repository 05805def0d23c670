//! Page image encoding for the vision path: `DynamicImage` → base64 PNG
//! wrapped in `ImageData`.
//!
//! PNG keeps the small print of nutrition tables crisp; JPEG ringing around
//! digits is exactly the kind of noise that turns `1.1` into `LL`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page as a base64 PNG ready for the vision request.
///
/// `detail: "high"` lets tiling providers read fine print; a single
/// low-detail tile loses table rows.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} page → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, GrayImage};

    #[test]
    fn encodes_grayscale_page_as_png() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 12, Luma([200])));
        let data = encode_page(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }
}
