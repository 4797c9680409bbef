use ndarray::{s, Array3};

use crate::types::PixelPosition;

pub type Bgr = [u8; 3];

pub const WHITE: Bgr = [255, 255, 255];
pub const BLACK: Bgr = [0, 0, 0];

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pixels: Array3<u8>,
}

impl Frame {
    pub fn blank(rows: usize, cols: usize) -> Self {
        Frame {
            pixels: Array3::zeros((rows, cols, 3)),
        }
    }

    pub fn filled(rows: usize, cols: usize, color: Bgr) -> Self {
        Frame {
            pixels: Array3::from_shape_fn((rows, cols, 3), |(_, _, channel)| color[channel]),
        }
    }

    pub fn from_pixels(pixels: Array3<u8>) -> Self {
        Frame { pixels }
    }

    pub fn rows(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn cols(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    pub fn pixel(&self, row: usize, col: usize) -> Option<Bgr> {
        if row >= self.rows() || col >= self.cols() {
            return None;
        }
        Some([
            self.pixels[[row, col, 0]],
            self.pixels[[row, col, 1]],
            self.pixels[[row, col, 2]],
        ])
    }

    pub fn crop_square(&self) -> Frame {
        let (rows, cols) = (self.rows(), self.cols());
        let side = rows.min(cols);
        let row0 = (rows - side) / 2;
        let col0 = (cols - side) / 2;

        Frame {
            pixels: self
                .pixels
                .slice(s![row0..row0 + side, col0..col0 + side, ..])
                .to_owned(),
        }
    }

    pub fn square_crop_origin(rows: usize, cols: usize) -> PixelPosition {
        let side = rows.min(cols);
        PixelPosition::new(((rows - side) / 2) as f64, ((cols - side) / 2) as f64)
    }

    fn put(&mut self, row: i64, col: i64, color: Bgr) {
        if row < 0 || col < 0 || row as usize >= self.rows() || col as usize >= self.cols() {
            return;
        }
        let (row, col) = (row as usize, col as usize);
        for (channel, value) in color.iter().enumerate() {
            self.pixels[[row, col, channel]] = *value;
        }
    }

    pub fn fill_disc(&mut self, center: PixelPosition, radius: f64, color: Bgr) {
        let r = radius.ceil() as i64;
        let (cr, cc) = (center.row.round() as i64, center.col.round() as i64);

        for dr in -r..=r {
            for dc in -r..=r {
                if ((dr * dr + dc * dc) as f64) <= radius * radius {
                    self.put(cr + dr, cc + dc, color);
                }
            }
        }
    }

    pub fn draw_cross(&mut self, center: PixelPosition, half_len: i64, color: Bgr) {
        let (cr, cc) = (center.row.round() as i64, center.col.round() as i64);
        for d in -half_len..=half_len {
            self.put(cr + d, cc, color);
            self.put(cr, cc + d, color);
        }
    }

    pub fn draw_line(&mut self, from: PixelPosition, to: PixelPosition, color: Bgr) {
        let steps = (to.row - from.row)
            .abs()
            .max((to.col - from.col).abs())
            .ceil()
            .max(1.) as i64;

        for step in 0..=steps {
            let t = step as f64 / steps as f64;
            let row = from.row + (to.row - from.row) * t;
            let col = from.col + (to.col - from.col) * t;
            self.put(row.round() as i64, col.round() as i64, color);
        }
    }

    pub fn draw_polygon(&mut self, points: &[PixelPosition], color: Bgr) {
        if points.len() < 2 {
            return;
        }
        for (idx, point) in points.iter().enumerate() {
            let next = points[(idx + 1) % points.len()];
            self.draw_line(*point, next, color);
        }
    }
}
