// src/raster.rs

use crate::error::Error;
use resvg::{tiny_skia, usvg};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// CSS pixels per inch; usvg reports tree sizes in these.
const SVG_DPI: f32 = 96.0;

/// Decoded bitmap, alpha already composited onto white.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// System fonts are scanned once per process, not once per invoice.
fn system_fonts() -> Arc<usvg::fontdb::Database> {
    static FONTS: OnceLock<Arc<usvg::fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut db = usvg::fontdb::Database::new();
            db.load_system_fonts();
            if db.is_empty() {
                warn!("No system fonts found, payment slip text will be missing");
            } else {
                info!(faces = db.len(), "Loaded system fonts");
            }
            Arc::new(db)
        })
        .clone()
}

/// Rasterises `svg_path` into a PNG at `png_path` with the given resolution.
pub fn svg_to_png(svg_path: &Path, png_path: &Path, dpi: u32) -> Result<(), Error> {
    let data = fs::read(svg_path)?;

    let mut options = usvg::Options::default();
    options.fontdb = system_fonts();
    let tree = usvg::Tree::from_data(&data, &options).map_err(|e| Error::Raster(e.to_string()))?;

    let scale = dpi as f32 / SVG_DPI;
    let size = tree.size();
    let width = (size.width() * scale).ceil() as u32;
    let height = (size.height() * scale).ceil() as u32;
    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| Error::Raster(format!("cannot allocate {width}x{height} pixmap")))?;
    pixmap.fill(tiny_skia::Color::WHITE);

    resvg::render(&tree, tiny_skia::Transform::from_scale(scale, scale), &mut pixmap.as_mut());

    pixmap
        .save_png(png_path)
        .map_err(|e| Error::Raster(e.to_string()))?;
    debug!(path = %png_path.display(), width, height, "Rasterised SVG");
    Ok(())
}

/// Reads a PNG into flat RGB bytes suitable for a PDF image XObject.
pub fn load_png(path: &Path) -> Result<RasterImage, Error> {
    let pixmap = tiny_skia::Pixmap::load_png(path).map_err(|e| Error::Raster(e.to_string()))?;

    let mut rgb = Vec::with_capacity(pixmap.pixels().len() * 3);
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        let alpha = color.alpha() as u32;
        for channel in [color.red(), color.green(), color.blue()] {
            rgb.push(((channel as u32 * alpha + 255 * (255 - alpha)) / 255) as u8);
        }
    }

    Ok(RasterImage {
        width: pixmap.width(),
        height: pixmap.height(),
        rgb,
    })
}

/// Per-render directory for the intermediate SVG/PNG pair. Unique names
/// keep concurrent or repeated renders from clobbering each other.
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub fn new_in(parent: &Path) -> Result<Self, Error> {
        let dir = tempfile::Builder::new()
            .prefix(".qrbill-")
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Removes the intermediates. Failures are logged and otherwise ignored.
    pub fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            debug!(path = %path.display(), error = %e, "Could not remove scratch files");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HALF_BLACK: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="10" viewBox="0 0 20 10"><rect x="0" y="0" width="10" height="10" fill="#000000"/></svg>"##;

    #[test]
    fn rasterises_at_requested_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let svg = dir.path().join("in.svg");
        let png = dir.path().join("out.png");
        fs::write(&svg, HALF_BLACK).unwrap();

        svg_to_png(&svg, &png, 192).unwrap();
        let image = load_png(&png).unwrap();

        assert_eq!((image.width, image.height), (40, 20));
        assert_eq!(image.rgb.len(), 40 * 20 * 3);
        // Left half black, right half white.
        let pixel = |x: u32, y: u32| {
            let i = ((y * image.width + x) * 3) as usize;
            (image.rgb[i], image.rgb[i + 1], image.rgb[i + 2])
        };
        assert_eq!(pixel(5, 10), (0, 0, 0));
        assert_eq!(pixel(35, 10), (255, 255, 255));
    }

    #[test]
    fn invalid_svg_is_a_raster_error() {
        let dir = tempfile::tempdir().unwrap();
        let svg = dir.path().join("broken.svg");
        fs::write(&svg, "this is not svg").unwrap();

        let result = svg_to_png(&svg, &dir.path().join("out.png"), 150);
        assert!(matches!(result, Err(Error::Raster(_))));
        assert!(!dir.path().join("out.png").exists());
    }

    #[test]
    fn missing_png_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_png(&dir.path().join("nope.png")).is_err());
    }

    #[test]
    fn scratch_cleanup_removes_intermediates() {
        let parent = tempfile::tempdir().unwrap();
        let scratch = Scratch::new_in(parent.path()).unwrap();
        let file = scratch.file("slip.svg");
        fs::write(&file, HALF_BLACK).unwrap();
        assert!(file.exists());

        scratch.cleanup();
        assert!(!file.exists());
        assert_eq!(fs::read_dir(parent.path()).unwrap().count(), 0);
    }
}
