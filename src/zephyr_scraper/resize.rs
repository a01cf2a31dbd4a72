// zephyr_scraper - Weather station telemetry acquisition and health monitoring
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Image normalization applied before cam and sounding images are stored.

use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use std::io::Cursor;
use thiserror::Error;

pub const DEFAULT_WIDTH: u32 = 600;

const JPEG_QUALITY: u8 = 80;

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("unable to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("unable to encode image: {0}")]
    Encode(#[source] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

/// Decode `bytes`, scale to `width` pixels wide keeping the aspect ratio, and re-encode.
pub fn resize_to_width(bytes: &[u8], width: u32, format: OutputFormat) -> Result<Vec<u8>, ResizeError> {
    let img = image::load_from_memory(bytes).map_err(ResizeError::Decode)?;
    let resized = img.resize(width, u32::MAX, FilterType::Triangle);

    let mut buf = Vec::new();
    match format {
        OutputFormat::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8())
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(JPEG_QUALITY))
            .map_err(ResizeError::Encode)?,
        OutputFormat::Png => resized
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .map_err(ResizeError::Encode)?,
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::{resize_to_width, OutputFormat, ResizeError};
    use image::{DynamicImage, GenericImageView, ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 140, 200]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_resize_keeps_aspect_ratio() {
        let out = resize_to_width(&png(1200, 800), 600, OutputFormat::Jpeg).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((600, 400), decoded.dimensions());
    }

    #[test]
    fn test_resize_png_output() {
        let out = resize_to_width(&png(300, 100), 600, OutputFormat::Png).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((600, 200), decoded.dimensions());
        assert_eq!(Some(image::ImageFormat::Png), image::guess_format(&out).ok());
    }

    #[test]
    fn test_resize_garbage() {
        let res = resize_to_width(b"definitely not an image", 600, OutputFormat::Jpeg);
        assert!(matches!(res, Err(ResizeError::Decode(_))));
    }
}
