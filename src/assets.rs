//! Figure assets referenced by parsed units.
//!
//! Not part of the parse itself: callers that publish the Markdown run
//! [`rasterize_figures`] over the units afterwards so every figure points at
//! an image a browser can display. Bitmaps in exotic formats are re-encoded
//! as PNG next to the original; vector figures are reported and left alone.

use crate::error::ParseWarning;
use crate::output::{ContentUnit, UnitKind};
use image::ImageFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::{debug, warn};

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\(\s*([^)\s]+)[^)]*\)").unwrap());

/// Extensions tried, in order, for figure paths written without one.
const CANDIDATE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "pdf", "eps", "bmp", "gif", "tif", "tiff", "webp",
];

/// Formats decoded and re-encoded as PNG.
const RASTERIZABLE: &[&str] = &["bmp", "gif", "tif", "tiff", "webp"];

/// Formats that need an external renderer.
const VECTOR: &[&str] = &["pdf", "eps", "ps"];

/// Image targets of every `![..](path)` in `text`, in order.
pub fn figure_paths(text: &str) -> Vec<String> {
    RE_IMAGE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// The figure path as it exists on disk, completing a missing extension.
fn locate(source_dir: &Path, path: &str) -> Option<String> {
    if source_dir.join(path).is_file() {
        return Some(path.to_string());
    }
    if extension_of(path).is_some() {
        return None;
    }
    CANDIDATE_EXTENSIONS
        .iter()
        .map(|ext| format!("{path}.{ext}"))
        .find(|candidate| source_dir.join(candidate).is_file())
}

/// Decode `path` and write it as PNG beside the original, unless that PNG
/// already exists. Returns the new relative path.
fn rasterize(source_dir: &Path, path: &str) -> Result<String, image::ImageError> {
    let png = Path::new(path).with_extension("png");
    let target = source_dir.join(&png);
    if !target.exists() {
        image::open(source_dir.join(path))?.save_with_format(&target, ImageFormat::Png)?;
        debug!("Rasterised {} → {}", path, png.display());
    }
    Ok(png.to_string_lossy().into_owned())
}

/// Rewrite the figure units in `units` to reference displayable images.
///
/// Paths are resolved against `source_dir`. Figures that cannot be found,
/// decoded or that are vector graphics stay untouched and are reported.
pub fn rasterize_figures(units: &mut [ContentUnit], source_dir: &Path) -> Vec<ParseWarning> {
    let mut warnings = Vec::new();
    let mut ambiguity = |detail: String| {
        warn!("{detail}");
        warnings.push(ParseWarning::ConversionAmbiguity { detail });
    };

    for unit in units.iter_mut().filter(|u| u.kind == UnitKind::Figure) {
        for path in figure_paths(&unit.text) {
            let Some(found) = locate(source_dir, &path) else {
                ambiguity(format!("figure '{path}' not found"));
                continue;
            };
            let ext = extension_of(&found).unwrap_or_default();
            let replacement = if RASTERIZABLE.contains(&ext.as_str()) {
                match rasterize(source_dir, &found) {
                    Ok(png) => png,
                    Err(e) => {
                        ambiguity(format!("figure '{found}' could not be converted: {e}"));
                        continue;
                    }
                }
            } else if VECTOR.contains(&ext.as_str()) {
                ambiguity(format!("figure '{found}' is vector graphics, left as is"));
                continue;
            } else {
                found
            };
            if replacement != path {
                unit.text = unit
                    .text
                    .replace(&format!("]({path})"), &format!("]({replacement})"));
            }
        }
    }
    warnings
}
