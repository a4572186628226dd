use std::path::{Path, PathBuf};

use ::image::{DynamicImage, ImageBuffer, ImageDecoder, ImageFormat, ImageReader, Luma, Rgb};
use ndarray::Array2;

use crate::consts::U16_NORM;
use crate::error::{Result, StackError};
use crate::image::{Image, PixelBuffer, SampleKind};
use crate::sequence::{FrameLayout, FrameSource};

fn is_float(img: &DynamicImage) -> bool {
    matches!(
        img,
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_)
    )
}

/// Load an image file as a single grayscale channel.
///
/// Float images stay float; everything else is converted to 16-bit.
pub fn load_image(path: &Path) -> Result<Image> {
    let img = ::image::open(path)?;
    let (w, h) = (img.width() as usize, img.height() as usize);
    let buffer = if is_float(&img) {
        let raw = img.to_luma32f().into_raw();
        PixelBuffer::F32(Array2::from_shape_vec((h, w), raw).map_err(shape_error)?)
    } else {
        let raw = img.to_luma16().into_raw();
        PixelBuffer::U16(Array2::from_shape_vec((h, w), raw).map_err(shape_error)?)
    };
    Ok(Image::mono(buffer))
}

fn shape_error(e: ndarray::ShapeError) -> StackError {
    StackError::InvalidInput(e.to_string())
}

fn to_u16(buffer: &PixelBuffer) -> Vec<u16> {
    match buffer {
        PixelBuffer::U16(a) => a.iter().copied().collect(),
        PixelBuffer::F32(a) => a
            .iter()
            .map(|&v| (v.clamp(0.0, 1.0) as f64 * U16_NORM).round() as u16)
            .collect(),
    }
}

fn format_for(path: &Path) -> ImageFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => ImageFormat::Png,
        _ => ImageFormat::Tiff,
    }
}

/// Save as 16-bit TIFF, or PNG when the extension says so.
///
/// One channel is written as grayscale, three as RGB. Float samples are
/// clamped to `[0, 1]` first.
pub fn save_image(image: &Image, path: &Path) -> Result<()> {
    let (h, w, c) = image.dims();
    let format = format_for(path);
    let size_error = || StackError::InvalidInput(format!("cannot encode {w}x{h} image"));
    match c {
        1 => {
            let pixels = to_u16(&image.channels()[0]);
            let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
                .ok_or_else(size_error)?;
            img.save_with_format(path, format)?;
        }
        3 => {
            let planes: Vec<Vec<u16>> = image.channels().iter().map(to_u16).collect();
            let pixels = (0..h * w)
                .flat_map(|i| [planes[0][i], planes[1][i], planes[2][i]])
                .collect();
            let img = ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
                .ok_or_else(size_error)?;
            img.save_with_format(path, format)?;
        }
        n => {
            return Err(StackError::InvalidInput(format!(
                "cannot save an image with {n} channels"
            )))
        }
    }
    Ok(())
}

/// Frames stored as individual image files, decoded on demand.
#[derive(Clone, Debug, Default)]
pub struct FileSequence {
    paths: Vec<PathBuf>,
}

impl FileSequence {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    fn path(&self, index: usize) -> Result<&Path> {
        self.paths
            .get(index)
            .map(PathBuf::as_path)
            .ok_or_else(|| StackError::FrameRead {
                index,
                reason: format!("only {} files", self.paths.len()),
            })
    }
}

impl FrameSource for FileSequence {
    fn frame_count(&self) -> usize {
        self.paths.len()
    }

    fn read_frame(&self, index: usize) -> Result<Image> {
        let path = self.path(index)?;
        load_image(path).map_err(|e| StackError::FrameRead {
            index,
            reason: format!("{}: {e}", path.display()),
        })
    }

    /// Reads the header only.
    fn frame_layout(&self, index: usize) -> Result<FrameLayout> {
        let path = self.path(index)?;
        let decoder = ImageReader::open(path)?
            .with_guessed_format()?
            .into_decoder()?;
        let (w, h) = decoder.dimensions();
        let kind = match decoder.color_type() {
            ::image::ColorType::Rgb32F | ::image::ColorType::Rgba32F => SampleKind::F32,
            _ => SampleKind::U16,
        };
        Ok(FrameLayout {
            height: h as usize,
            width: w as usize,
            channels: 1,
            kind,
            exposure: 0.0,
        })
    }
}
