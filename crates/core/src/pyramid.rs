//! Pyramid level geometry
//!
//! Both solver backends walk the same coarse-to-fine schedule: level ℓ has
//! size `⌈W·s^ℓ⌉ × ⌈H·s^ℓ⌉` and grid spacing `(W/level_w, H/level_h)`, with
//! ℓ counting down from `min(warp_levels, max_warp_levels) − 1` to 0. The
//! geometry lives here once so the backends cannot drift apart.

/// Geometry of a single pyramid level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PyramidLevel {
    /// Level index; 0 is full resolution
    pub index: u32,
    /// Level width in pixels
    pub width: usize,
    /// Level height in pixels
    pub height: usize,
    /// Grid spacing in x (full-resolution pixels per level pixel)
    pub hx: f32,
    /// Grid spacing in y
    pub hy: f32,
}

/// Coarse-to-fine iterator over pyramid levels
#[derive(Debug, Clone)]
pub struct PyramidSchedule {
    source_width: usize,
    source_height: usize,
    scale: f32,
    next: Option<u32>,
}

impl PyramidSchedule {
    /// Build the schedule for a `width × height` image pair
    ///
    /// `warp_levels` caps the depth; the effective depth also stops where a
    /// reduced dimension would drop below 4 pixels.
    ///
    /// # Panics
    ///
    /// Panics unless `0 < scale < 1` and the image is non-empty.
    #[must_use]
    pub fn new(width: usize, height: usize, warp_levels: u32, scale: f32) -> Self {
        assert!(scale > 0.0 && scale < 1.0, "warp scale must lie in (0, 1)");
        assert!(width > 0 && height > 0, "empty source image");
        let top = warp_levels.min(max_warp_levels(width, height, scale));
        Self {
            source_width: width,
            source_height: height,
            scale,
            next: top.checked_sub(1),
        }
    }

    fn level(&self, index: u32) -> PyramidLevel {
        let width = scaled_dim(self.source_width, self.scale, index);
        let height = scaled_dim(self.source_height, self.scale, index);
        PyramidLevel {
            index,
            width,
            height,
            hx: self.source_width as f32 / width as f32,
            hy: self.source_height as f32 / height as f32,
        }
    }
}

impl Iterator for PyramidSchedule {
    type Item = PyramidLevel;

    fn next(&mut self) -> Option<PyramidLevel> {
        let index = self.next?;
        self.next = index.checked_sub(1);
        Some(self.level(index))
    }
}

fn scaled_dim(dim: usize, scale: f32, level: u32) -> usize {
    ((dim as f64) * f64::from(scale).powi(level as i32)).ceil() as usize
}

/// Maximum usable pyramid depth for an image size and reduction factor
///
/// Counts up until a reduced dimension falls below 4 pixels; a dimension
/// collapsing all the way to 1 steps the result back by one.
#[must_use]
pub fn max_warp_levels(width: usize, height: usize, scale: f32) -> u32 {
    let mut i: u32 = 1;
    loop {
        let nx = scaled_dim(width, scale, i);
        let ny = scaled_dim(height, scale, i);
        if nx < 4 || ny < 4 {
            if nx == 1 || ny == 1 {
                i -= 1;
            }
            return i;
        }
        i += 1;
    }
}
