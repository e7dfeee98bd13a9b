use core_graphics::display::{
    kCGNullWindowID, kCGWindowImageDefault, kCGWindowListOptionOnScreenOnly, CGDisplay, CGRect,
};
use core_graphics::image::CGImage;

use crate::error::TrackerError;
use crate::platform::{CaptureMethod, CapturedImage};

pub fn capture(method: CaptureMethod) -> Result<CapturedImage, TrackerError> {
    let image = match method {
        CaptureMethod::AllWindows => {
            let bounds = desktop_bounds()?;
            CGDisplay::screenshot(
                bounds,
                kCGWindowListOptionOnScreenOnly,
                kCGNullWindowID,
                kCGWindowImageDefault,
            )
            .ok_or_else(|| TrackerError::TransientIo("window list capture returned null".into()))?
        }
        CaptureMethod::MainDisplay => CGDisplay::main()
            .image()
            .ok_or_else(|| TrackerError::TransientIo("display capture returned null".into()))?,
    };

    to_rgba(&image)
}

/// Union of every active display's bounds in global coordinates.
fn desktop_bounds() -> Result<CGRect, TrackerError> {
    let displays = CGDisplay::active_displays()
        .map_err(|err| TrackerError::TransientIo(format!("CGGetActiveDisplayList failed: {err}")))?;

    displays
        .into_iter()
        .map(|id| CGDisplay::new(id).bounds())
        .reduce(|acc, rect| acc.union(&rect))
        .ok_or_else(|| TrackerError::TransientIo("no active displays".into()))
}

/// CGImage pixels arrive as 32-bit BGRA rows with padding; repack as tight RGBA.
fn to_rgba(image: &CGImage) -> Result<CapturedImage, TrackerError> {
    let width = image.width();
    let height = image.height();
    let bytes_per_row = image.bytes_per_row();
    if image.bits_per_pixel() != 32 || width == 0 || height == 0 {
        return Err(TrackerError::TransientIo(format!(
            "unsupported capture layout ({width}x{height}, {} bpp)",
            image.bits_per_pixel()
        )));
    }

    let data = image.data();
    let bytes = data.bytes();
    let mut rgba = Vec::with_capacity(width * height * 4);
    for row in 0..height {
        let start = row * bytes_per_row;
        let Some(line) = bytes.get(start..start + width * 4) else {
            return Err(TrackerError::TransientIo("capture buffer truncated".into()));
        };
        for pixel in line.chunks_exact(4) {
            rgba.extend_from_slice(&[pixel[2], pixel[1], pixel[0], 255]);
        }
    }

    Ok(CapturedImage {
        width: u32::try_from(width)
            .map_err(|_| TrackerError::TransientIo("capture too wide".into()))?,
        height: u32::try_from(height)
            .map_err(|_| TrackerError::TransientIo("capture too tall".into()))?,
        rgba,
    })
}
