//! Detection overlays.
//!
//! Draws bounding boxes and `"<class>: NN%"` labels directly onto an RGB8
//! frame copy. Labels use a small built-in 5x7 bitmap font so there is no
//! font-rasterizer dependency. All writes are clamped to frame bounds.

use crate::detect::Detection;
use crate::frame::{Frame, BYTES_PER_PIXEL};

const BOX_COLOR: [u8; 3] = [0, 255, 0];
const LABEL_TEXT_COLOR: [u8; 3] = [0, 0, 0];
const BOX_THICKNESS: i32 = 2;
const GLYPH_WIDTH: i32 = 6; // 5 pixels + 1 spacing
const GLYPH_HEIGHT: i32 = 7;
const LABEL_PAD: i32 = 2;

/// Draw every detection onto the frame.
pub fn draw_detections(frame: &mut Frame, detections: &[Detection]) {
    for det in detections {
        let left = det.bbox.x;
        let top = det.bbox.y;
        let right = det.bbox.x + det.bbox.width;
        let bottom = det.bbox.y + det.bbox.height;

        for t in 0..BOX_THICKNESS {
            draw_rect_outline(frame, left + t, top + t, right - t, bottom - t, BOX_COLOR);
        }

        let label = format!("{}: {}%", det.class_name, (det.confidence * 100.0) as i32);
        let text_width = label.chars().count() as i32 * GLYPH_WIDTH;
        let bar_height = GLYPH_HEIGHT + LABEL_PAD * 2;
        let bar_top = (top - bar_height).max(0);
        fill_rect(
            frame,
            left,
            bar_top,
            left + text_width + LABEL_PAD * 2,
            bar_top + bar_height,
            BOX_COLOR,
        );
        draw_text(
            frame,
            left + LABEL_PAD,
            bar_top + LABEL_PAD,
            &label,
            LABEL_TEXT_COLOR,
        );
    }
}

fn put_pixel(frame: &mut Frame, x: i32, y: i32, color: [u8; 3]) {
    if x < 0 || y < 0 || x >= frame.width as i32 || y >= frame.height as i32 {
        return;
    }
    let idx = (y as usize * frame.width as usize + x as usize) * BYTES_PER_PIXEL;
    frame.pixels_mut()[idx..idx + 3].copy_from_slice(&color);
}

fn draw_rect_outline(frame: &mut Frame, left: i32, top: i32, right: i32, bottom: i32, color: [u8; 3]) {
    for x in left..=right {
        put_pixel(frame, x, top, color);
        put_pixel(frame, x, bottom, color);
    }
    for y in top..=bottom {
        put_pixel(frame, left, y, color);
        put_pixel(frame, right, y, color);
    }
}

fn fill_rect(frame: &mut Frame, left: i32, top: i32, right: i32, bottom: i32, color: [u8; 3]) {
    for y in top..bottom {
        for x in left..right {
            put_pixel(frame, x, y, color);
        }
    }
}

fn draw_text(frame: &mut Frame, mut x: i32, y: i32, text: &str, color: [u8; 3]) {
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        put_pixel(frame, x + col, y + row as i32, color);
                    }
                }
            }
        }
        x += GLYPH_WIDTH;
    }
}

#[rustfmt::skip]
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'B' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110]),
        'C' => Some([0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110]),
        'D' => Some([0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110]),
        'E' => Some([0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111]),
        'F' => Some([0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000]),
        'G' => Some([0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111]),
        'H' => Some([0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'I' => Some([0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        'J' => Some([0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100]),
        'K' => Some([0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001]),
        'L' => Some([0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111]),
        'M' => Some([0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001]),
        'N' => Some([0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001]),
        'O' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'P' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000]),
        'Q' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101]),
        'R' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001]),
        'S' => Some([0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110]),
        'T' => Some([0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
        'U' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'V' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100]),
        'W' => Some([0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b11011, 0b10001]),
        'X' => Some([0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001]),
        'Y' => Some([0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100]),
        'Z' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111]),
        '0' => Some([0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110]),
        '1' => Some([0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        '2' => Some([0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111]),
        '3' => Some([0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110]),
        '4' => Some([0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010]),
        '5' => Some([0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110]),
        '6' => Some([0b01110, 0b10000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110]),
        '7' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000]),
        '8' => Some([0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110]),
        '9' => Some([0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00001, 0b01110]),
        '%' => Some([0b11001, 0b11010, 0b00010, 0b00100, 0b01000, 0b01011, 0b10011]),
        ':' => Some([0b00000, 0b00100, 0b00100, 0b00000, 0b00100, 0b00100, 0b00000]),
        '.' => Some([0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00110, 0b00110]),
        '-' => Some([0b00000, 0b00000, 0b00000, 0b01110, 0b00000, 0b00000, 0b00000]),
        '_' => Some([0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111]),
        _ => None,
    }
}
