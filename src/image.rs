//! Immutable color, grayscale and binary raster types.
//!
//! Conversions only go one way (color -> grayscale -> binary) and are plain
//! methods on the source type, so an invalid conversion does not compile.
//! Every operation returns a new image and leaves its receiver untouched.

use crate::error::{DigitizeError, Result};
use image::{imageops, imageops::FilterType, DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use serde::{Deserialize, Serialize};
use std::fmt;

const ACTIVE: u8 = 255;
const INACTIVE: u8 = 0;

/// Axis-aligned rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the rectangle is non-empty and lies inside a `width`x`height` image
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

fn check_crop(rect: Rect, width: u32, height: u32) -> Result<()> {
    if rect.fits_within(width, height) {
        Ok(())
    } else {
        Err(DigitizeError::OutOfBounds {
            rect,
            width,
            height,
        })
    }
}

fn scaled_dimensions(width: u32, height: u32, scale: f32) -> Result<(u32, u32)> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(DigitizeError::invalid_parameter("scale", scale));
    }
    let new_width = ((width as f32 * scale).round() as u32).max(1);
    let new_height = ((height as f32 * scale).round() as u32).max(1);
    Ok((new_width, new_height))
}

/// Three-channel 8-bit image
#[derive(Debug, Clone, PartialEq)]
pub struct ColorImage(RgbImage);

impl ColorImage {
    pub fn new(buffer: RgbImage) -> Self {
        Self(buffer)
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgb<u8> {
        *self.0.get_pixel(x, y)
    }

    pub fn as_buffer(&self) -> &RgbImage {
        &self.0
    }

    /// Luminance conversion
    pub fn to_grayscale(&self) -> GrayscaleImage {
        GrayscaleImage(imageops::grayscale(&self.0))
    }

    pub fn crop(&self, rect: Rect) -> Result<Self> {
        check_crop(rect, self.width(), self.height())?;
        Ok(Self(
            imageops::crop_imm(&self.0, rect.x, rect.y, rect.width, rect.height).to_image(),
        ))
    }

    /// Rotate clockwise about the center, filling uncovered pixels with `background`
    pub fn rotate(&self, angle_degrees: f32, background: Rgb<u8>) -> Self {
        Self(rotate_about_center(
            &self.0,
            angle_degrees.to_radians(),
            Interpolation::Bilinear,
            background,
        ))
    }

    pub fn resize(&self, scale: f32) -> Result<Self> {
        let (w, h) = scaled_dimensions(self.width(), self.height(), scale)?;
        Ok(Self(imageops::resize(&self.0, w, h, FilterType::Triangle)))
    }
}

/// Single-channel 8-bit intensity image
#[derive(Debug, Clone, PartialEq)]
pub struct GrayscaleImage(GrayImage);

impl GrayscaleImage {
    pub fn new(buffer: GrayImage) -> Self {
        Self(buffer)
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Self {
        Self(GrayImage::from_fn(width, height, |x, y| Luma([f(x, y)])))
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.0.get_pixel(x, y).0[0]
    }

    pub fn as_buffer(&self) -> &GrayImage {
        &self.0
    }

    /// 256-bin histogram of intensities
    pub fn histogram(&self) -> [u64; 256] {
        let mut histogram = [0u64; 256];
        for pixel in self.0.pixels() {
            histogram[pixel.0[0] as usize] += 1;
        }
        histogram
    }

    /// Binarize with an arbitrary predicate on the intensity
    pub fn to_binary(&self, predicate: impl Fn(u8) -> bool) -> BinaryImage {
        BinaryImage(GrayImage::from_fn(self.width(), self.height(), |x, y| {
            if predicate(self.pixel(x, y)) {
                Luma([ACTIVE])
            } else {
                Luma([INACTIVE])
            }
        }))
    }

    /// Mark every pixel at or below `level` (dark ink) as active
    pub fn threshold(&self, level: u8) -> BinaryImage {
        self.to_binary(|value| value <= level)
    }

    /// Scale intensities so the most frequent level becomes white
    pub fn white_point_adjusted(&self) -> Self {
        let histogram = self.histogram();
        let white_point = histogram
            .iter()
            .enumerate()
            .max_by_key(|&(level, count)| (*count, std::cmp::Reverse(level)))
            .map(|(level, _)| level)
            .unwrap_or(255);
        if white_point == 0 {
            return self.clone();
        }
        let factor = 255.0 / white_point as f32;
        Self(GrayImage::from_fn(self.width(), self.height(), |x, y| {
            let scaled = self.pixel(x, y) as f32 * factor;
            Luma([scaled.round().min(255.0) as u8])
        }))
    }

    pub fn crop(&self, rect: Rect) -> Result<Self> {
        check_crop(rect, self.width(), self.height())?;
        Ok(Self(
            imageops::crop_imm(&self.0, rect.x, rect.y, rect.width, rect.height).to_image(),
        ))
    }

    /// Rotate clockwise about the center, filling uncovered pixels with `background`
    pub fn rotate(&self, angle_degrees: f32, background: u8) -> Self {
        Self(rotate_about_center(
            &self.0,
            angle_degrees.to_radians(),
            Interpolation::Bilinear,
            Luma([background]),
        ))
    }

    pub fn resize(&self, scale: f32) -> Result<Self> {
        let (w, h) = scaled_dimensions(self.width(), self.height(), scale)?;
        Ok(Self(imageops::resize(&self.0, w, h, FilterType::Triangle)))
    }
}

/// Boolean mask; stored as 0/255 so imageproc's morphology applies directly
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryImage(GrayImage);

impl BinaryImage {
    /// All-inactive mask
    pub fn empty(width: u32, height: u32) -> Self {
        Self(GrayImage::new(width, height))
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        Self(GrayImage::from_fn(width, height, |x, y| {
            Luma([if f(x, y) { ACTIVE } else { INACTIVE }])
        }))
    }

    /// Any non-zero pixel counts as active
    fn from_nonzero(buffer: GrayImage) -> Self {
        let mut buffer = buffer;
        for pixel in buffer.pixels_mut() {
            pixel.0[0] = if pixel.0[0] > 0 { ACTIVE } else { INACTIVE };
        }
        Self(buffer)
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn is_active(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel(x, y).0[0] == ACTIVE
    }

    pub fn as_buffer(&self) -> &GrayImage {
        &self.0
    }

    pub fn active_count(&self) -> usize {
        self.0.pixels().filter(|p| p.0[0] == ACTIVE).count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.pixels().all(|p| p.0[0] == INACTIVE)
    }

    /// Number of active pixels in each column
    pub fn column_density(&self) -> Vec<f64> {
        let mut density = vec![0.0; self.width() as usize];
        for (x, _, pixel) in self.0.enumerate_pixels() {
            if pixel.0[0] == ACTIVE {
                density[x as usize] += 1.0;
            }
        }
        density
    }

    /// Number of active pixels in each row
    pub fn row_density(&self) -> Vec<f64> {
        let mut density = vec![0.0; self.height() as usize];
        for (_, y, pixel) in self.0.enumerate_pixels() {
            if pixel.0[0] == ACTIVE {
                density[y as usize] += 1.0;
            }
        }
        density
    }

    /// Contiguous active runs in column `x` as inclusive `(first_row, last_row)` pairs
    pub fn column_runs(&self, x: u32) -> Vec<(u32, u32)> {
        let mut runs = Vec::new();
        let mut start = None;
        for y in 0..self.height() {
            match (self.is_active(x, y), start) {
                (true, None) => start = Some(y),
                (false, Some(first)) => {
                    runs.push((first, y - 1));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(first) = start {
            runs.push((first, self.height() - 1));
        }
        runs
    }

    /// Copy of the mask with the given rows and columns cleared
    pub fn without_lines(&self, rows: &[u32], columns: &[u32]) -> Self {
        let mut buffer = self.0.clone();
        for &y in rows {
            for x in 0..self.width() {
                buffer.put_pixel(x, y, Luma([INACTIVE]));
            }
        }
        for &x in columns {
            for y in 0..self.height() {
                buffer.put_pixel(x, y, Luma([INACTIVE]));
            }
        }
        Self(buffer)
    }

    /// Pixels active here and not active in `other`
    pub fn subtract(&self, other: &BinaryImage) -> Self {
        Self::from_fn(self.width(), self.height(), |x, y| {
            self.is_active(x, y)
                && !(x < other.width() && y < other.height() && other.is_active(x, y))
        })
    }

    pub fn dilate(&self, radius: u8) -> Self {
        Self::from_nonzero(imageproc::morphology::dilate(&self.0, Norm::LInf, radius))
    }

    pub fn erode(&self, radius: u8) -> Self {
        Self::from_nonzero(imageproc::morphology::erode(&self.0, Norm::LInf, radius))
    }

    /// Erosion followed by dilation; removes specks smaller than the kernel
    pub fn open(&self, radius: u8) -> Self {
        Self::from_nonzero(imageproc::morphology::open(&self.0, Norm::LInf, radius))
    }

    /// Active pixels become black ink on white paper
    pub fn to_grayscale(&self) -> GrayscaleImage {
        GrayscaleImage::from_fn(self.width(), self.height(), |x, y| {
            if self.is_active(x, y) {
                0
            } else {
                255
            }
        })
    }

    pub fn crop(&self, rect: Rect) -> Result<Self> {
        check_crop(rect, self.width(), self.height())?;
        Ok(Self(
            imageops::crop_imm(&self.0, rect.x, rect.y, rect.width, rect.height).to_image(),
        ))
    }

    /// Nearest-neighbour rotation so every pixel stays boolean
    pub fn rotate(&self, angle_degrees: f32, background: bool) -> Self {
        let fill = if background { ACTIVE } else { INACTIVE };
        Self::from_nonzero(rotate_about_center(
            &self.0,
            angle_degrees.to_radians(),
            Interpolation::Nearest,
            Luma([fill]),
        ))
    }

    pub fn resize(&self, scale: f32) -> Result<Self> {
        let (w, h) = scaled_dimensions(self.width(), self.height(), scale)?;
        Ok(Self::from_nonzero(imageops::resize(
            &self.0,
            w,
            h,
            FilterType::Nearest,
        )))
    }
}

/// Any of the three raster kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Image {
    Color(ColorImage),
    Grayscale(GrayscaleImage),
    Binary(BinaryImage),
}

impl Image {
    pub fn width(&self) -> u32 {
        match self {
            Image::Color(img) => img.width(),
            Image::Grayscale(img) => img.width(),
            Image::Binary(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Image::Color(img) => img.height(),
            Image::Grayscale(img) => img.height(),
            Image::Binary(img) => img.height(),
        }
    }

    /// Intensity view of the image; active mask pixels read as ink
    pub fn to_grayscale(&self) -> GrayscaleImage {
        match self {
            Image::Color(img) => img.to_grayscale(),
            Image::Grayscale(img) => img.clone(),
            Image::Binary(img) => img.to_grayscale(),
        }
    }

    pub fn crop(&self, rect: Rect) -> Result<Self> {
        Ok(match self {
            Image::Color(img) => Image::Color(img.crop(rect)?),
            Image::Grayscale(img) => Image::Grayscale(img.crop(rect)?),
            Image::Binary(img) => Image::Binary(img.crop(rect)?),
        })
    }

    /// `background` is the fill intensity; for masks any non-zero value is active
    pub fn rotate(&self, angle_degrees: f32, background: u8) -> Self {
        match self {
            Image::Color(img) => {
                Image::Color(img.rotate(angle_degrees, Rgb([background; 3])))
            }
            Image::Grayscale(img) => Image::Grayscale(img.rotate(angle_degrees, background)),
            Image::Binary(img) => Image::Binary(img.rotate(angle_degrees, background > 0)),
        }
    }

    pub fn resize(&self, scale: f32) -> Result<Self> {
        Ok(match self {
            Image::Color(img) => Image::Color(img.resize(scale)?),
            Image::Grayscale(img) => Image::Grayscale(img.resize(scale)?),
            Image::Binary(img) => Image::Binary(img.resize(scale)?),
        })
    }
}

impl From<DynamicImage> for Image {
    fn from(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => Image::Grayscale(GrayscaleImage(gray)),
            other => Image::Color(ColorImage(other.into_rgb8())),
        }
    }
}

impl From<GrayImage> for Image {
    fn from(gray: GrayImage) -> Self {
        Image::Grayscale(GrayscaleImage(gray))
    }
}

impl From<RgbImage> for Image {
    fn from(rgb: RgbImage) -> Self {
        Image::Color(ColorImage(rgb))
    }
}
