use ab_glyph::{FontRef, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, Rgba};
use imageproc::drawing::{draw_text_mut, text_size};
use std::io::Cursor;

static FONT_BYTES: &[u8] = include_bytes!("../../assets/DejaVuSans-Bold.ttf");

const WRAP_WIDTH: usize = 50;
const OUTLINE_PX: i32 = 2;

/// Burns the narration into the bottom of a scene image: wrapped,
/// centered, white text with a black outline. Purely local transform;
/// the only failure modes are decode/encode errors.
pub fn overlay_narration(image_bytes: &[u8], narration: &str) -> Result<Vec<u8>> {
    let font = FontRef::try_from_slice(FONT_BYTES).map_err(|_| anyhow!("bundled font is invalid"))?;
    let scene = image::load_from_memory(image_bytes).context("Failed to decode scene image")?;
    let mut canvas = scene.to_rgba8();
    let (width, height) = canvas.dimensions();

    let lines = wrap_text(narration, WRAP_WIDTH);
    let scale = PxScale::from((height as f32 / 32.0).max(12.0));
    let gap = scale.y as i32 + 10;
    let start_y = height as i32 - gap - lines.len() as i32 * gap;

    let white = Rgba([255u8, 255, 255, 255]);
    let black = Rgba([0u8, 0, 0, 255]);

    for (i, line) in lines.iter().enumerate() {
        let (text_width, _) = text_size(scale, &font, line);
        let x = ((width as i32 - text_width as i32) / 2).max(0);
        let y = (start_y + i as i32 * gap).max(0);

        for dx in [-OUTLINE_PX, 0, OUTLINE_PX] {
            for dy in [-OUTLINE_PX, 0, OUTLINE_PX] {
                if dx != 0 || dy != 0 {
                    draw_text_mut(&mut canvas, black, x + dx, y + dy, scale, &font, line);
                }
            }
        }
        draw_text_mut(&mut canvas, white, x, y, scale, &font, line);
    }

    let mut out = Vec::new();
    canvas
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .context("Failed to encode narrated page")?;
    Ok(out)
}

fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
