//! Pairing-code rendering: terminal half-blocks and PNG.

use qrcode::{Color, EcLevel, QrCode};
use std::path::Path;
use tether_core::error::TetherError;

/// Light modules around the symbol so phone cameras can lock on.
const QUIET_ZONE: usize = 2;

fn encode(code: &str) -> Result<QrCode, TetherError> {
    QrCode::with_error_correction_level(code.as_bytes(), EcLevel::L)
        .map_err(|e| TetherError::Validation(format!("pairing code does not fit a QR symbol: {e}")))
}

/// Render a pairing code for the terminal.
///
/// Two module rows share one text line (`▀`, `▄`, `█`, space), so the output
/// is roughly square in a typical terminal font. Dark modules are drawn as
/// filled cells; on dark-background terminals pass `invert = true`.
pub fn render_terminal(code: &str, invert: bool) -> Result<String, TetherError> {
    let qr = encode(code)?;
    let width = qr.width();
    let colors = qr.into_colors();
    let size = width + QUIET_ZONE * 2;

    let filled = |row: usize, col: usize| -> bool {
        let dark = row >= QUIET_ZONE
            && col >= QUIET_ZONE
            && row - QUIET_ZONE < width
            && col - QUIET_ZONE < width
            && colors[(row - QUIET_ZONE) * width + (col - QUIET_ZONE)] == Color::Dark;
        dark != invert
    };

    let mut out = String::with_capacity((size + 1) * size.div_ceil(2) * 3);
    for row in (0..size).step_by(2) {
        for col in 0..size {
            let top = filled(row, col);
            let bottom = row + 1 < size && filled(row + 1, col);
            out.push(match (top, bottom) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}

/// Render a pairing code as PNG bytes, `scale` pixels per module.
pub fn render_png(code: &str, scale: u32) -> Result<Vec<u8>, TetherError> {
    use image::{ImageBuffer, Luma};

    let qr = encode(code)?;
    let scale = scale.max(1);
    let quiet = QUIET_ZONE as u32;
    let modules = qr.width() as u32;
    let side = (modules + quiet * 2) * scale;

    let img = ImageBuffer::from_fn(side, side, |x, y| {
        let (mx, my) = (x / scale, y / scale);
        let inside = mx >= quiet && my >= quiet && mx - quiet < modules && my - quiet < modules;
        if inside && qr[((mx - quiet) as usize, (my - quiet) as usize)] == Color::Dark {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| TetherError::Io(std::io::Error::other(format!("PNG encoding failed: {e}"))))?;
    Ok(buf.into_inner())
}

/// Write the PNG rendering of a pairing code to `path`.
pub fn write_png(code: &str, path: &Path) -> Result<(), TetherError> {
    let png = render_png(code, 10)?;
    std::fs::write(path, png)?;
    Ok(())
}
