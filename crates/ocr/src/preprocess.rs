use std::collections::VecDeque;
use std::io::Cursor;
use std::path::Path;

use autoform_core::NormalizerConfig;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{warp_with, Interpolation};
use imageproc::morphology::dilate;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to load image: {0}")]
    Load(#[from] image::ImageError),
    #[error("Image has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

/// Which binarization path an image took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMode {
    /// Dark text on a light background; Otsu thresholding.
    Paper,
    /// Light text on a dark background; inverted, then a fixed threshold.
    Dark,
}

/// A two-level (0 / 255) image ready for text recognition.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: GrayImage,
    pub tone: ToneMode,
    /// Rotation applied during skew correction, in degrees (0 if none).
    pub skew_deg: f32,
    /// Set when the input could not be used and this is a blank stand-in.
    pub degraded: bool,
}

impl NormalizedImage {
    pub fn blank(size: u32) -> Self {
        let size = size.max(1);
        Self {
            image: GrayImage::from_pixel(size, size, Luma([255])),
            tone: ToneMode::Paper,
            skew_deg: 0.0,
            degraded: true,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_binary(&self) -> bool {
        self.image.pixels().all(|p| p[0] == 0 || p[0] == 255)
    }

    /// Encode as PNG for engines that take an encoded buffer.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        Ok(buf)
    }
}

/// Turns a photographed or scanned form into a clean binary image.
///
/// Never fails: any load or decode fault yields [`NormalizedImage::blank`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn normalize_path(&self, path: &Path) -> NormalizedImage {
        match image::open(path) {
            Ok(img) => self.normalize(img),
            Err(e) => {
                warn!("Cannot load image {}: {e}", path.display());
                self.fallback()
            }
        }
    }

    pub fn normalize_bytes(&self, data: &[u8]) -> NormalizedImage {
        match image::load_from_memory(data) {
            Ok(img) => self.normalize(img),
            Err(e) => {
                warn!("Cannot decode image ({} bytes): {e}", data.len());
                self.fallback()
            }
        }
    }

    pub fn normalize(&self, img: DynamicImage) -> NormalizedImage {
        match self.try_normalize(img) {
            Ok(n) => n,
            Err(e) => {
                warn!("Preprocessing failed: {e}");
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> NormalizedImage {
        NormalizedImage::blank(self.config.fallback_size)
    }

    fn try_normalize(&self, img: DynamicImage) -> Result<NormalizedImage, PreprocessError> {
        let cfg = &self.config;
        if img.width() == 0 || img.height() == 0 {
            return Err(PreprocessError::Empty {
                width: img.width(),
                height: img.height(),
            });
        }

        // 1. Annotation lines. Only meaningful when there is color to look at.
        let img = if cfg.remove_color_lines && img.color().has_color() {
            DynamicImage::ImageRgb8(remove_color_lines(&img.to_rgb8(), cfg))
        } else {
            img
        };

        // 2. Intensity + tone classification.
        let gray = img.to_luma8();
        let mean = mean_intensity(&gray);
        let tone = if mean < cfg.dark_mode_threshold {
            ToneMode::Dark
        } else {
            ToneMode::Paper
        };

        // 3. Upscale.
        let (w, h) = gray.dimensions();
        let nw = ((w as f32 * cfg.scale).round() as u32).max(1);
        let nh = ((h as f32 * cfg.scale).round() as u32).max(1);
        let mut gray = imageops::resize(&gray, nw, nh, FilterType::Triangle);

        // 4. Dark text on light background from here on.
        if tone == ToneMode::Dark {
            imageops::invert(&mut gray);
        }

        // 5. Skew.
        let (gray, skew_deg) = correct_skew(gray, cfg);

        // 6. Binarize.
        let binary = match tone {
            ToneMode::Dark => threshold(&gray, cfg.dark_binary_threshold),
            ToneMode::Paper => {
                let blurred = gaussian_blur_f32(&gray, cfg.blur_sigma);
                let level = otsu_level(&blurred);
                threshold(&blurred, level)
            }
        };

        // 7. Pad.
        let image = pad(&binary, cfg.pad);

        debug!(
            ?tone,
            mean,
            skew_deg,
            width = image.width(),
            height = image.height(),
            "Image normalized"
        );

        Ok(NormalizedImage {
            image,
            tone,
            skew_deg,
            degraded: false,
        })
    }
}

// ── Color line removal ────────────────────────────────────────────────────────

/// RGB → HSV in OpenCV units: hue 0–180, saturation and value 0–255.
pub fn rgb_to_hsv(p: Rgb<u8>) -> (u8, u8, u8) {
    let [r, g, b] = p.0.map(f32::from);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max == 0.0 { 0.0 } else { 255.0 * delta / max };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    ((h / 2.0).round() as u8, s.round() as u8, max as u8)
}

/// Mask of pixels whose hue falls in one of the configured annotation bands.
pub fn color_line_mask(img: &RgbImage, cfg: &NormalizerConfig) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let (h, s, v) = rgb_to_hsv(*img.get_pixel(x, y));
        let hit = s >= cfg.min_saturation
            && v >= cfg.min_value
            && cfg
                .color_bands
                .iter()
                .any(|b| h >= b.hue_min && h <= b.hue_max);
        Luma([if hit { 255 } else { 0 }])
    })
}

/// Erase red/blue annotation strokes, filling them from surrounding pixels.
pub fn remove_color_lines(img: &RgbImage, cfg: &NormalizerConfig) -> RgbImage {
    let mut mask = color_line_mask(img, cfg);
    if mask.pixels().all(|p| p[0] == 0) {
        return img.clone();
    }
    for _ in 0..cfg.mask_dilate_passes {
        mask = dilate(&mask, Norm::LInf, 1);
    }
    inpaint(img, &mask, cfg.inpaint_radius)
}

/// Fill masked pixels front by front: a breadth-first sweep from the known
/// region fills the nearest pixels first, each from an average of the
/// already-known pixels within `radius` weighted by inverse squared distance
/// and front proximity. A simplified front-ordered fill with no gradient or
/// isophote term, which is enough for thin ruled lines.
pub fn inpaint(img: &RgbImage, mask: &GrayImage, radius: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    let idx = |x: u32, y: u32| (y * w + x) as usize;
    let mut out = img.clone();
    let mut known: Vec<bool> = mask.pixels().map(|p| p[0] == 0).collect();
    let mut arrival = vec![u32::MAX; known.len()];
    let mut queued = vec![false; known.len()];
    let mut queue = VecDeque::new();

    for y in 0..h {
        for x in 0..w {
            let i = idx(x, y);
            if known[i] {
                arrival[i] = 0;
            } else if neighbours4(x, y, w, h).any(|(nx, ny)| known[idx(nx, ny)]) {
                arrival[i] = 1;
                queued[i] = true;
                queue.push_back((x, y));
            }
        }
    }

    let r = radius.max(1) as i64;
    while let Some((x, y)) = queue.pop_front() {
        let i = idx(x, y);
        let mut acc = [0f32; 3];
        let mut total = 0f32;
        for dy in -r..=r {
            for dx in -r..=r {
                let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                    continue;
                }
                let d2 = (dx * dx + dy * dy) as f32;
                if d2 == 0.0 || d2 > (r * r) as f32 {
                    continue;
                }
                let j = idx(nx as u32, ny as u32);
                if !known[j] {
                    continue;
                }
                // Closer pixels and pixels from earlier fronts dominate.
                let level = 1.0 / (1.0 + arrival[i].abs_diff(arrival[j]) as f32);
                let weight = level / d2;
                let p = out.get_pixel(nx as u32, ny as u32);
                for c in 0..3 {
                    acc[c] += weight * p[c] as f32;
                }
                total += weight;
            }
        }
        if total > 0.0 {
            let filled = acc.map(|v| (v / total).round().clamp(0.0, 255.0) as u8);
            out.put_pixel(x, y, Rgb(filled));
        }
        known[i] = true;

        for (nx, ny) in neighbours4(x, y, w, h) {
            let j = idx(nx, ny);
            if !known[j] && !queued[j] {
                queued[j] = true;
                arrival[j] = arrival[i] + 1;
                queue.push_back((nx, ny));
            }
        }
    }

    out
}

fn neighbours4(x: u32, y: u32, w: u32, h: u32) -> impl Iterator<Item = (u32, u32)> {
    [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)]
        .into_iter()
        .map(move |(dx, dy)| (x as i64 + dx, y as i64 + dy))
        .filter(move |&(nx, ny)| nx >= 0 && ny >= 0 && nx < w as i64 && ny < h as i64)
        .map(|(nx, ny)| (nx as u32, ny as u32))
}

// ── Skew ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Border {
    Constant(u8),
    Replicate,
}

/// Rotate about the image center by `degrees`. Scoring and correction both
/// go through here so the sign convention is shared.
fn rotate(image: &GrayImage, degrees: f32, interpolation: Interpolation, border: Border) -> GrayImage {
    let (w, h) = image.dimensions();
    let (cx, cy) = ((w / 2) as f32, (h / 2) as f32);
    let (sin, cos) = degrees.to_radians().sin_cos();

    // Bicubic sampling needs a full 4×4 neighbourhood; keep replicated
    // coordinates inside it.
    let (lo, hi_x, hi_y) = match interpolation {
        Interpolation::Bicubic if w >= 4 && h >= 4 => (1.0, (w - 3) as f32, (h - 3) as f32),
        _ => (0.0, (w - 1) as f32, (h - 1) as f32),
    };
    let default = match border {
        Border::Constant(v) => Luma([v]),
        Border::Replicate => Luma([255]),
    };

    warp_with(
        image,
        move |x, y| {
            let (dx, dy) = (x - cx, y - cy);
            let sx = cos * dx - sin * dy + cx;
            let sy = sin * dx + cos * dy + cy;
            match border {
                Border::Constant(_) => (sx, sy),
                Border::Replicate => (sx.clamp(lo, hi_x), sy.clamp(lo, hi_y)),
            }
        },
        interpolation,
        default,
    )
}

/// Sum of squared differences between adjacent rows of the horizontal
/// projection profile. Sharp steps mean level text lines.
fn profile_score(image: &GrayImage) -> f64 {
    let (w, h) = image.dimensions();
    let profile: Vec<f64> = (0..h)
        .map(|y| (0..w).map(|x| image.get_pixel(x, y)[0] as f64).sum())
        .collect();
    profile.windows(2).map(|p| (p[1] - p[0]).powi(2)).sum()
}

/// Candidate angles ordered by magnitude (0, -s, +s, -2s, …) so that ties
/// resolve toward the smallest rotation.
fn candidate_angles(limit: f32, step: f32) -> Vec<f32> {
    let n = (limit / step).floor().max(0.0) as i32;
    let mut angles = vec![0.0];
    for i in 1..=n {
        let a = i as f32 * step;
        angles.push(-a);
        angles.push(a);
    }
    angles
}

/// Angle (degrees) that best levels the text lines of `gray`.
pub fn estimate_skew(gray: &GrayImage, cfg: &NormalizerConfig) -> f32 {
    let (w, h) = gray.dimensions();
    let small = imageops::resize(gray, (w / 2).max(1), (h / 2).max(1), FilterType::Triangle);
    let level = otsu_level(&small);
    let inverted = threshold_inverted(&small, level);

    let mut best = (0.0f32, f64::MIN);
    for angle in candidate_angles(cfg.skew_limit_deg, cfg.skew_step_deg) {
        let rotated = rotate(&inverted, angle, Interpolation::Nearest, Border::Constant(0));
        let score = profile_score(&rotated);
        if score > best.1 {
            best = (angle, score);
        }
    }
    best.0
}

/// Level the image. Returns the image and the rotation applied (0 when the
/// best angle is negligible and the input is returned untouched).
pub fn correct_skew(gray: GrayImage, cfg: &NormalizerConfig) -> (GrayImage, f32) {
    if gray.width() < 2 || gray.height() < 2 {
        return (gray, 0.0);
    }
    let angle = estimate_skew(&gray, cfg);
    if angle.abs() < cfg.skew_min_deg {
        return (gray, 0.0);
    }
    debug!(angle, "Correcting skew");
    let rotated = rotate(&gray, angle, Interpolation::Bicubic, Border::Replicate);
    (rotated, angle)
}

// ── Pixel helpers ─────────────────────────────────────────────────────────────

fn mean_intensity(gray: &GrayImage) -> f32 {
    let n = gray.width() as u64 * gray.height() as u64;
    if n == 0 {
        return 0.0;
    }
    let sum: u64 = gray.pixels().map(|p| p[0] as u64).sum();
    (sum as f64 / n as f64) as f32
}

/// `> level` becomes white, everything else black.
fn threshold(gray: &GrayImage, level: u8) -> GrayImage {
    let mut out = gray.clone();
    for p in out.pixels_mut() {
        p[0] = if p[0] > level { 255 } else { 0 };
    }
    out
}

fn threshold_inverted(gray: &GrayImage, level: u8) -> GrayImage {
    let mut out = gray.clone();
    for p in out.pixels_mut() {
        p[0] = if p[0] > level { 0 } else { 255 };
    }
    out
}

fn pad(image: &GrayImage, border: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    let mut canvas = GrayImage::from_pixel(w + 2 * border, h + 2 * border, Luma([255]));
    imageops::replace(&mut canvas, image, border as i64, border as i64);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    /// White page with black horizontal bars standing in for text lines.
    fn text_lines(width: u32, height: u32) -> GrayImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            let in_margin = x < width / 10 || x >= width - width / 10;
            let on_line = y >= 10 && (y - 10) % 30 < 8 && y < height - 10;
            Luma([if on_line && !in_margin { 0 } else { 255 }])
        })
    }

    fn small_config() -> NormalizerConfig {
        NormalizerConfig {
            pad: 5,
            ..NormalizerConfig::default()
        }
    }

    #[test]
    fn inpaint_fills_each_side_from_its_nearest_front() {
        let img = RgbImage::from_fn(9, 5, |x, _| match x {
            0..=2 => Rgb([200, 0, 0]),
            6..=8 => Rgb([0, 0, 200]),
            _ => Rgb([0, 255, 0]),
        });
        let mask = GrayImage::from_fn(9, 5, |x, _| Luma([if (3..=5).contains(&x) { 255 } else { 0 }]));
        let out = inpaint(&img, &mask, 1);
        for y in 0..5 {
            let left = out.get_pixel(3, y).0;
            let right = out.get_pixel(5, y).0;
            assert!(left[0] > 150 && left[1] < 50 && left[2] < 50, "({y}) left {left:?}");
            assert!(right[2] > 150 && right[0] < 50 && right[1] < 50, "({y}) right {right:?}");
            // The middle column meets both fronts at once.
            let mid = out.get_pixel(4, y).0;
            assert!(mid[0] > 0 && mid[2] > 0 && mid[1] < 50, "({y}) mid {mid:?}");
        }
    }

    #[test]
    fn hsv_matches_opencv_scale() {
        assert_eq!(rgb_to_hsv(Rgb([255, 0, 0])), (0, 255, 255));
        assert_eq!(rgb_to_hsv(Rgb([0, 255, 0])), (60, 255, 255));
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 255])), (120, 255, 255));
        assert_eq!(rgb_to_hsv(Rgb([128, 128, 128])), (0, 0, 128));
    }

    #[test]
    fn mask_covers_red_and_blue_but_not_black_or_green() {
        let cfg = NormalizerConfig::default();
        let img: RgbImage = ImageBuffer::from_fn(4, 1, |x, _| match x {
            0 => Rgb([220, 20, 30]),
            1 => Rgb([20, 40, 220]),
            2 => Rgb([0, 0, 0]),
            _ => Rgb([20, 200, 20]),
        });
        let mask = color_line_mask(&img, &cfg);
        let values: Vec<u8> = mask.pixels().map(|p| p[0]).collect();
        assert_eq!(values, vec![255, 255, 0, 0]);
    }

    #[test]
    fn red_line_is_erased_and_text_kept() {
        let cfg = NormalizerConfig::default();
        let img: RgbImage = ImageBuffer::from_fn(60, 40, |x, y| {
            if y == 20 {
                Rgb([230, 10, 10])
            } else if y == 5 && (10..50).contains(&x) {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let out = remove_color_lines(&img, &cfg);
        for x in 0..60 {
            let p = out.get_pixel(x, 20);
            assert!(p.0.iter().all(|&c| c > 200), "pixel ({x},20) = {:?}", p.0);
        }
        assert_eq!(out.get_pixel(30, 5), &Rgb([0, 0, 0]));
    }

    #[test]
    fn image_without_annotation_color_is_untouched() {
        let cfg = NormalizerConfig::default();
        let img: RgbImage = ImageBuffer::from_fn(8, 8, |x, _| Rgb([x as u8 * 30; 3]));
        assert_eq!(remove_color_lines(&img, &cfg), img);
    }

    #[test]
    fn upright_binary_image_passes_skew_correction_unchanged() {
        let cfg = NormalizerConfig::default();
        let img = text_lines(400, 300);
        let (out, angle) = correct_skew(img.clone(), &cfg);
        assert_eq!(angle, 0.0);
        assert_eq!(out, img);
    }

    #[test]
    fn rotated_lines_are_detected() {
        let cfg = NormalizerConfig::default();
        let tilted = rotate(&text_lines(400, 300), 3.0, Interpolation::Bilinear, Border::Constant(255));
        let angle = estimate_skew(&tilted, &cfg);
        assert!((angle + 3.0).abs() <= 1.0, "estimated {angle}");
    }

    #[test]
    fn candidate_angles_start_at_zero_and_are_symmetric() {
        assert_eq!(candidate_angles(2.0, 1.0), vec![0.0, -1.0, 1.0, -2.0, 2.0]);
        assert_eq!(candidate_angles(0.0, 1.0), vec![0.0]);
    }

    #[test]
    fn paper_mode_path_is_binary_and_padded() {
        let cfg = small_config();
        let page = text_lines(40, 30);
        let n = Normalizer::new(cfg).normalize(DynamicImage::ImageLuma8(page));
        assert_eq!(n.tone, ToneMode::Paper);
        assert!(!n.degraded);
        assert!(n.is_binary());
        assert_eq!(n.width(), 40 * 3 + 10);
        assert_eq!(n.height(), 30 * 3 + 10);
        // Padding is white.
        assert_eq!(n.image.get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn dark_mode_path_is_binary_and_inverted() {
        let cfg = small_config();
        let mut page = text_lines(40, 30);
        imageops::invert(&mut page);
        let n = Normalizer::new(cfg).normalize(DynamicImage::ImageLuma8(page));
        assert_eq!(n.tone, ToneMode::Dark);
        assert!(n.is_binary());
        // Background is light after inversion; the corner inside the pad is white.
        assert_eq!(n.image.get_pixel(6, 6)[0], 255);
        assert!(n.image.pixels().any(|p| p[0] == 0));
    }

    #[test]
    fn color_input_goes_through_full_pipeline() {
        let cfg = small_config();
        let img: RgbImage = ImageBuffer::from_fn(30, 20, |x, y| {
            if y == 10 {
                Rgb([20, 40, 220])
            } else if y == 4 && x > 5 && x < 25 {
                Rgb([0, 0, 0])
            } else {
                Rgb([250, 250, 250])
            }
        });
        let n = Normalizer::new(cfg).normalize(DynamicImage::ImageRgb8(img));
        assert!(!n.degraded);
        assert!(n.is_binary());
    }

    #[test]
    fn unreadable_bytes_fall_back_to_blank() {
        let n = Normalizer::default().normalize_bytes(b"definitely not an image");
        assert!(n.degraded);
        assert_eq!((n.width(), n.height()), (100, 100));
        assert!(n.is_binary());
    }

    #[test]
    fn missing_file_falls_back_to_blank() {
        let n = Normalizer::default().normalize_path(Path::new("/nonexistent/form.png"));
        assert!(n.degraded);
    }

    #[test]
    fn zero_sized_image_falls_back_to_blank() {
        let n = Normalizer::default().normalize(DynamicImage::new_luma8(0, 0));
        assert!(n.degraded);
        assert_eq!(n.width(), 100);
    }

    #[test]
    fn to_png_produces_png_header() {
        let png = NormalizedImage::blank(4).to_png().unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
    }
}
