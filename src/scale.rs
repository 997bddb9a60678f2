//! Fits decoded frames to the hosting view's geometry.

use crate::error::CatResult;
use imgref::ImgVec;
use rgb::RGBA8;

/// Target display size in device-independent pixels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const ZERO: Size = Size { width: 0, height: 0 };

    pub fn new(width: u32, height: u32) -> Self {
        Size { width, height }
    }

    /// A zero target disables resizing entirely.
    pub fn is_zero(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// How a decoded frame is fitted into the target size.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContentMode {
    /// Stretch to the target size exactly. Aspect ratio is not preserved.
    Fill,
    /// Largest size that fits entirely within the target, preserving aspect ratio.
    AspectFit,
    /// Smallest size that covers the target, preserving aspect ratio.
    AspectFill,
    /// Leave frames at their decoded size.
    None,
}

pub(crate) fn scaled_dimensions(
    width: usize,
    height: usize,
    target: Size,
    mode: ContentMode,
) -> (usize, usize) {
    let target_width = target.width as usize;
    let target_height = target.height as usize;
    match mode {
        ContentMode::None => (width, height),
        ContentMode::Fill => (target_width, target_height),
        ContentMode::AspectFit | ContentMode::AspectFill => {
            let horizontal = target_width as f64 / width as f64;
            let vertical = target_height as f64 / height as f64;
            let factor = if mode == ContentMode::AspectFit {
                horizontal.min(vertical)
            } else {
                horizontal.max(vertical)
            };
            (
                ((width as f64 * factor).round() as usize).max(1),
                ((height as f64 * factor).round() as usize).max(1),
            )
        }
    }
}

/// Scales a frame to the target size per the content mode.
/// Returns the frame untouched when no scaling applies.
pub(crate) fn resize_frame(
    image: ImgVec<RGBA8>,
    target: Size,
    mode: ContentMode,
) -> CatResult<ImgVec<RGBA8>> {
    if target.is_zero() || mode == ContentMode::None {
        return Ok(image);
    }

    let (buf, width, height) = image.into_contiguous_buf();
    let (dst_width, dst_height) = scaled_dimensions(width, height, target, mode);
    if (dst_width, dst_height) == (width, height) {
        return Ok(ImgVec::new(buf, width, height));
    }

    let mut resizer = resize::new(
        width,
        height,
        dst_width,
        dst_height,
        resize::Pixel::RGBA8,
        resize::Type::Lanczos3,
    )?;
    let mut dst = vec![RGBA8::new(0, 0, 0, 0); dst_width * dst_height];
    resizer.resize(&buf, &mut dst)?;
    Ok(ImgVec::new(dst, dst_width, dst_height))
}
