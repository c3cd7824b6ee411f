//! Grid composite construction.
//!
//! Source photos are tiled into a bounded number of large composite images
//! before being sent to the vision model. Each photo sits in its own cell on
//! a thatched background with its position number printed beneath it, and the
//! returned position map translates those numbers back to file ids.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use uuid::Uuid;

/// Composite canvas edge length in pixels.
const CANVAS_SIZE: u32 = 2000;
/// Gap kept between a cell's content and its edges.
const CELL_SPACING: u32 = 40;
/// Diagonal stripe period of the background pattern.
const THATCH_SPACING: i64 = 10;
/// Diagonal stripe width of the background pattern.
const THATCH_WIDTH: i64 = 5;

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const THATCH_GREY: Rgb<u8> = Rgb([200, 200, 200]);

/// The composites for one model pass plus the position map that resolves
/// printed position numbers back to file ids.
#[derive(Debug, Default)]
pub struct GridBatch {
    pub composites: Vec<Vec<u8>>,
    pub positions: HashMap<String, Uuid>,
}

/// Tile `sources` into at most `cap` JPEG composites.
///
/// Images that fail to decode are skipped; position numbers stay contiguous
/// over the images that did decode, in source order. An empty input yields
/// an empty batch.
pub fn compose_grids(
    sources: &[(Uuid, Vec<u8>)],
    cap: usize,
) -> Result<GridBatch, image::ImageError> {
    let decoded: Vec<(Uuid, DynamicImage)> = sources
        .iter()
        .filter_map(|(id, bytes)| image::load_from_memory(bytes).ok().map(|img| (*id, img)))
        .collect();

    if decoded.is_empty() {
        return Ok(GridBatch::default());
    }

    let (per_grid, _) = grid_plan(decoded.len(), cap);
    let (rows, cols) = grid_shape(per_grid);

    let mut batch = GridBatch::default();
    for (chunk_idx, chunk) in decoded.chunks(per_grid).enumerate() {
        let mut canvas = RgbImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, BLACK);
        draw_thatch(&mut canvas);

        let cell_w = CANVAS_SIZE / cols;
        let row_h = CANVAS_SIZE / rows;
        let label_h = (row_h as f64 * 0.25) as u32;
        let image_h = row_h - label_h;

        for (slot, (file_id, img)) in chunk.iter().enumerate() {
            let position = chunk_idx * per_grid + slot;
            let col = (slot as u32) % cols;
            let row = (slot as u32) / cols;
            let x0 = col * cell_w;
            let y0 = row * row_h;

            // black content panel, covering the label band as well so the
            // position number is printed on a solid background
            fill_rect(
                &mut canvas,
                x0 + CELL_SPACING,
                y0 + CELL_SPACING,
                cell_w.saturating_sub(2 * CELL_SPACING),
                row_h.saturating_sub(2 * CELL_SPACING),
                BLACK,
            );

            let avail_w = cell_w.saturating_sub(2 * CELL_SPACING).max(1);
            let avail_h = image_h.saturating_sub(2 * CELL_SPACING).max(1);
            let thumb = if img.width() > avail_w || img.height() > avail_h {
                img.resize(avail_w, avail_h, FilterType::Lanczos3)
            } else {
                img.clone()
            };

            let paste_x = x0 + (cell_w.saturating_sub(thumb.width())) / 2;
            let paste_y = y0 + (image_h.saturating_sub(thumb.height())) / 2;
            image::imageops::overlay(
                &mut canvas,
                &thumb.to_rgb8(),
                paste_x as i64,
                paste_y as i64,
            );

            let text = format!("ID: {position}");
            let text_y = y0 + image_h + (label_h.saturating_sub(glyph_text_height())) / 2;
            draw_text(&mut canvas, &text, x0 + cell_w / 2, text_y, WHITE);

            batch.positions.insert(position.to_string(), *file_id);

            // 1-px outline around the cell, label band included
            outline_rect(&mut canvas, x0, y0, cell_w, row_h, BLACK);
        }

        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(canvas).write_to(&mut out, ImageFormat::Jpeg)?;
        batch.composites.push(out.into_inner());
    }

    Ok(batch)
}

// ── Grid arithmetic ──────────────────────────────────────────────────────────

/// How many photos go in each composite, and how many composites result.
/// The composite count never exceeds `cap`.
pub fn grid_plan(loaded: usize, cap: usize) -> (usize, usize) {
    let cap = cap.max(1);
    let target = loaded.div_ceil(cap).min(cap);
    let per_grid = loaded.div_ceil(target);
    (per_grid, loaded.div_ceil(per_grid))
}

/// Near-square cell layout for one composite.
pub fn grid_shape(per_grid: usize) -> (u32, u32) {
    let rows = ((per_grid as f64).sqrt().floor() as u32).max(1);
    let cols = (per_grid as u32).div_ceil(rows);
    (rows, cols)
}

// ── Raster helpers ───────────────────────────────────────────────────────────

fn draw_thatch(canvas: &mut RgbImage) {
    let (w, h) = canvas.dimensions();
    for y in 0..h {
        for x in 0..w {
            let (xi, yi) = (x as i64, y as i64);
            let falling = (xi + yi) % THATCH_SPACING < THATCH_WIDTH;
            let rising = (xi - yi).rem_euclid(THATCH_SPACING) < THATCH_WIDTH;
            if falling || rising {
                canvas.put_pixel(x, y, THATCH_GREY);
            }
        }
    }
}

fn fill_rect(canvas: &mut RgbImage, x0: u32, y0: u32, width: u32, height: u32, color: Rgb<u8>) {
    let (w, h) = canvas.dimensions();
    for y in y0..(y0 + height).min(h) {
        for x in x0..(x0 + width).min(w) {
            canvas.put_pixel(x, y, color);
        }
    }
}

fn outline_rect(canvas: &mut RgbImage, x0: u32, y0: u32, width: u32, height: u32, color: Rgb<u8>) {
    let (w, h) = canvas.dimensions();
    if width == 0 || height == 0 || x0 >= w || y0 >= h {
        return;
    }
    let x1 = (x0 + width - 1).min(w - 1);
    let y1 = (y0 + height - 1).min(h - 1);
    for x in x0..=x1 {
        canvas.put_pixel(x, y0, color);
        canvas.put_pixel(x, y1, color);
    }
    for y in y0..=y1 {
        canvas.put_pixel(x0, y, color);
        canvas.put_pixel(x1, y, color);
    }
}

// ── Position labels ──────────────────────────────────────────────────────────
//
// The labels only ever contain "ID: <digits>", so a small bitmap face for
// those characters avoids pulling in a font rasterizer and shipping a font.

const GLYPH_COLS: u32 = 5;
const GLYPH_ROWS: u32 = 7;
const GLYPH_SCALE: u32 = 12;
const GLYPH_GAP: u32 = GLYPH_SCALE;

/// 5x7 glyph bitmaps, one byte per row, bit 4 = leftmost column.
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c {
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        ':' => [0b00000, 0b00110, 0b00110, 0b00000, 0b00110, 0b00110, 0b00000],
        ' ' => [0b00000; 7],
        _ => return None,
    };
    Some(rows)
}

fn glyph_text_height() -> u32 {
    GLYPH_ROWS * GLYPH_SCALE
}

fn glyph_text_width(text: &str) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 0;
    }
    n * GLYPH_COLS * GLYPH_SCALE + (n - 1) * GLYPH_GAP
}

/// Draw `text` horizontally centered on `center_x` with its top at `top_y`.
/// Characters without a glyph render as blanks.
fn draw_text(canvas: &mut RgbImage, text: &str, center_x: u32, top_y: u32, color: Rgb<u8>) {
    let mut x = center_x.saturating_sub(glyph_text_width(text) / 2);
    for c in text.chars() {
        if let Some(rows) = glyph(c) {
            for (row_idx, row) in rows.iter().enumerate() {
                for col_idx in 0..GLYPH_COLS {
                    if row & (1 << (GLYPH_COLS - 1 - col_idx)) != 0 {
                        fill_rect(
                            canvas,
                            x + col_idx * GLYPH_SCALE,
                            top_y + (row_idx as u32) * GLYPH_SCALE,
                            GLYPH_SCALE,
                            GLYPH_SCALE,
                            color,
                        );
                    }
                }
            }
        }
        x += GLYPH_COLS * GLYPH_SCALE + GLYPH_GAP;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb([shade, shade, shade]),
        ));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn plan_balances_grids_under_the_cap() {
        assert_eq!(grid_plan(45, 20), (15, 3));
        assert_eq!(grid_plan(21, 20), (11, 2));
        assert_eq!(grid_plan(20, 20), (20, 1));
        assert_eq!(grid_plan(1, 20), (1, 1));
        assert_eq!(grid_plan(400, 20), (20, 20));
        // past cap^2 photos the grids grow instead of the composite count
        assert_eq!(grid_plan(500, 20), (25, 20));
    }

    #[test]
    fn shape_is_near_square() {
        assert_eq!(grid_shape(15), (3, 5));
        assert_eq!(grid_shape(20), (4, 5));
        assert_eq!(grid_shape(1), (1, 1));
        assert_eq!(grid_shape(2), (1, 2));
        assert_eq!(grid_shape(12), (3, 4));
    }

    #[test]
    fn forty_five_photos_make_three_composites() {
        let sources: Vec<(Uuid, Vec<u8>)> = (0..45)
            .map(|i| (Uuid::new_v4(), png_bytes(100, 80, i as u8)))
            .collect();

        let batch = compose_grids(&sources, 20).unwrap();

        assert_eq!(batch.composites.len(), 3);
        assert_eq!(batch.positions.len(), 45);
        for (idx, (file_id, _)) in sources.iter().enumerate() {
            assert_eq!(batch.positions.get(&idx.to_string()), Some(file_id));
        }
    }

    #[test]
    fn undecodable_photos_are_skipped_without_gaps() {
        let good_a = (Uuid::new_v4(), png_bytes(60, 60, 10));
        let bad = (Uuid::new_v4(), b"definitely not an image".to_vec());
        let good_b = (Uuid::new_v4(), png_bytes(60, 60, 20));

        let batch =
            compose_grids(&[good_a.clone(), bad, good_b.clone()], 20).unwrap();

        assert_eq!(batch.composites.len(), 1);
        assert_eq!(batch.positions.len(), 2);
        assert_eq!(batch.positions.get("0"), Some(&good_a.0));
        assert_eq!(batch.positions.get("1"), Some(&good_b.0));
        assert!(batch.positions.get("2").is_none());
    }

    #[test]
    fn empty_input_yields_empty_batch() {
        let batch = compose_grids(&[], 20).unwrap();
        assert!(batch.composites.is_empty());
        assert!(batch.positions.is_empty());
    }

    #[test]
    fn composites_are_decodable_jpegs_at_canvas_size() {
        let sources = vec![(Uuid::new_v4(), png_bytes(3000, 500, 90))];
        let batch = compose_grids(&sources, 20).unwrap();

        assert_eq!(batch.composites.len(), 1);
        let img = image::load_from_memory(&batch.composites[0]).unwrap();
        assert_eq!(img.width(), CANVAS_SIZE);
        assert_eq!(img.height(), CANVAS_SIZE);
    }

    #[test]
    fn oversized_photos_are_shrunk_not_cropped() {
        // a photo far wider than a cell must still fit inside one
        let sources = vec![
            (Uuid::new_v4(), png_bytes(4000, 200, 30)),
            (Uuid::new_v4(), png_bytes(50, 50, 60)),
        ];
        let batch = compose_grids(&sources, 20).unwrap();
        assert_eq!(batch.composites.len(), 1);
        assert_eq!(batch.positions.len(), 2);
    }

    #[test]
    fn cell_outline_frames_the_cell_only() {
        let mut canvas = RgbImage::from_pixel(40, 40, THATCH_GREY);
        outline_rect(&mut canvas, 10, 10, 20, 10, BLACK);

        // all four edges of the rectangle turn black
        assert_eq!(canvas.get_pixel(10, 10), &BLACK);
        assert_eq!(canvas.get_pixel(29, 10), &BLACK);
        assert_eq!(canvas.get_pixel(10, 19), &BLACK);
        assert_eq!(canvas.get_pixel(29, 19), &BLACK);
        assert_eq!(canvas.get_pixel(20, 10), &BLACK);
        assert_eq!(canvas.get_pixel(20, 19), &BLACK);
        assert_eq!(canvas.get_pixel(10, 15), &BLACK);
        assert_eq!(canvas.get_pixel(29, 15), &BLACK);

        // interior and surrounding pixels stay untouched
        assert_eq!(canvas.get_pixel(20, 15), &THATCH_GREY);
        assert_eq!(canvas.get_pixel(9, 15), &THATCH_GREY);
        assert_eq!(canvas.get_pixel(30, 15), &THATCH_GREY);
        assert_eq!(canvas.get_pixel(20, 9), &THATCH_GREY);
        assert_eq!(canvas.get_pixel(20, 20), &THATCH_GREY);
    }

    #[test]
    fn outline_clips_at_the_canvas_edge() {
        let mut canvas = RgbImage::from_pixel(20, 20, THATCH_GREY);
        outline_rect(&mut canvas, 10, 10, 50, 50, BLACK);

        assert_eq!(canvas.get_pixel(10, 10), &BLACK);
        assert_eq!(canvas.get_pixel(19, 19), &BLACK);
        assert_eq!(canvas.get_pixel(19, 10), &BLACK);
        assert_eq!(canvas.get_pixel(10, 19), &BLACK);
    }
}
