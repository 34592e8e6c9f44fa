use eframe::egui::ColorImage;
use tracing::debug;

/// Download and decode the thumbnail reported in a video's metadata.
pub fn fetch_thumbnail(url: &str) -> Option<ColorImage> {
    let resp = match reqwest::blocking::get(url).and_then(|r| r.error_for_status()) {
        Ok(r) => r.bytes().ok()?,
        Err(e) => {
            debug!("Thumbnail request failed for {}: {}", url, e);
            return None;
        }
    };
    // Load image data into an image::DynamicImage and convert to RGBA8
    let img = match image::load_from_memory(&resp) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            debug!("Thumbnail decode failed for {}: {}", url, e);
            return None;
        }
    };
    let size = [img.width() as usize, img.height() as usize];
    Some(ColorImage::from_rgba_unmultiplied(size, &img))
}
