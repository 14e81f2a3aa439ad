use anyhow::{anyhow, bail, Context, Result};
use printpdf::image_crate::{load_from_memory, DynamicImage, GenericImageView};
use printpdf::{Image, ImageTransform, Mm, PdfDocument};

const DPI: f32 = 150.0;

fn px_to_mm(px: u32) -> f32 {
    px as f32 * 25.4 / DPI
}

/// Combines the narrated page images, already in page order, into one
/// PDF. Requires exactly `expected` decodable images; any missing or
/// unreadable page means an upstream invariant was violated, so this
/// fails without retrying.
pub fn assemble(title: &str, pages: &[Vec<u8>], expected: usize) -> Result<Vec<u8>> {
    if pages.len() != expected {
        bail!(
            "expected {} narrated pages, got {}",
            expected,
            pages.len()
        );
    }
    if pages.is_empty() {
        bail!("no narrated pages to assemble");
    }

    let mut decoded = Vec::with_capacity(pages.len());
    for (i, bytes) in pages.iter().enumerate() {
        let img = load_from_memory(bytes)
            .with_context(|| format!("page {} is not a decodable image", i + 1))?;
        // PDF image XObjects want plain RGB; drop any alpha channel.
        decoded.push(DynamicImage::ImageRgb8(img.to_rgb8()));
    }

    let (first_w, first_h) = decoded[0].dimensions();
    let (doc, first_page, first_layer) = PdfDocument::new(
        title,
        Mm(px_to_mm(first_w)),
        Mm(px_to_mm(first_h)),
        "page 1",
    );

    for (i, img) in decoded.iter().enumerate() {
        let (page, layer) = if i == 0 {
            (first_page, first_layer)
        } else {
            let (w, h) = img.dimensions();
            doc.add_page(Mm(px_to_mm(w)), Mm(px_to_mm(h)), format!("page {}", i + 1))
        };

        let pdf_image = Image::from_dynamic_image(img);
        pdf_image.add_to_layer(
            doc.get_page(page).get_layer(layer),
            ImageTransform {
                dpi: Some(DPI),
                ..Default::default()
            },
        );
    }

    doc.save_to_bytes()
        .map_err(|e| anyhow!("Failed to serialize PDF: {e}"))
}
