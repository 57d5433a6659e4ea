//! Padded greyscale raster used throughout the flow engine
//!
//! An [`Image`] owns a flat `f32` buffer sized for its *logical* extent plus
//! a boundary halo, while the *actual* extent marks the sub-rectangle that is
//! currently meaningful. A single allocation can therefore host every pyramid
//! level of a coarse-to-fine run without reallocating: levels only shrink the
//! actual size.
//!
//! # Memory layout
//!
//! Rows are stored with a pitch of `width + 2·bx` rounded up to the next
//! multiple of 32, so device uploads see aligned rows. Element `(x, y)` of
//! the actual region lives at `(y + by) · pitch + (x + bx)`; coordinates in
//! `[-bx, width + bx) × [-by, height + by)` address valid memory and are used
//! for the mirrored boundary halo that stencil kernels read.

/// Row pitch alignment in elements. Device buffers share the host layout, so
/// this must stay a multiple of the compute tile width.
const PITCH_ALIGN: usize = 32;

/// Padded 2-D float raster with a mirrored boundary halo
///
/// The halo is not maintained automatically: callers run
/// [`Image::fill_boundaries`] before any stencil that reads outside the
/// actual region.
#[derive(Debug, Clone)]
pub struct Image {
    width: usize,
    height: usize,
    actual_width: usize,
    actual_height: usize,
    bx: usize,
    by: usize,
    pitch: usize,
    data: Vec<f32>,
}

impl Image {
    /// Create an image without a halo, zero-initialized
    #[must_use]
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_halo(width, height, 0, 0)
    }

    /// Create an image with a boundary halo of `bx` columns and `by` rows on
    /// each side, zero-initialized
    ///
    /// # Returns
    ///
    /// Image whose actual size equals its logical size
    #[must_use]
    pub fn with_halo(width: usize, height: usize, bx: usize, by: usize) -> Self {
        let pitch = aligned_pitch(width, bx);
        Self {
            width,
            height,
            actual_width: width,
            actual_height: height,
            bx,
            by,
            pitch,
            data: vec![0.0; pitch * (height + 2 * by)],
        }
    }

    /// Reallocate for a new shape, discarding all pixel data
    pub fn reinit(
        &mut self,
        width: usize,
        height: usize,
        actual_width: usize,
        actual_height: usize,
        bx: usize,
        by: usize,
    ) {
        assert!(
            actual_width <= width && actual_height <= height,
            "actual size exceeds logical capacity"
        );
        self.width = width;
        self.height = height;
        self.actual_width = actual_width;
        self.actual_height = actual_height;
        self.bx = bx;
        self.by = by;
        self.pitch = aligned_pitch(width, bx);
        self.data.clear();
        self.data.resize(self.pitch * (height + 2 * by), 0.0);
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn actual_width(&self) -> usize {
        self.actual_width
    }

    #[must_use]
    pub fn actual_height(&self) -> usize {
        self.actual_height
    }

    #[must_use]
    pub fn halo(&self) -> (usize, usize) {
        (self.bx, self.by)
    }

    /// Row pitch in elements (multiple of 32)
    #[must_use]
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// Shrink or grow the meaningful region without touching storage
    ///
    /// # Panics
    ///
    /// Panics if the requested size exceeds the logical capacity
    pub fn set_actual_size(&mut self, width: usize, height: usize) {
        assert!(
            width <= self.width && height <= self.height,
            "actual size exceeds logical capacity"
        );
        self.actual_width = width;
        self.actual_height = height;
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> usize {
        debug_assert!(x >= -(self.bx as i32) && y >= -(self.by as i32));
        let row = (y + self.by as i32) as usize;
        let col = (x + self.bx as i32) as usize;
        row * self.pitch + col
    }

    /// Stored value at `(x, y)`; halo coordinates are legal
    #[inline]
    #[must_use]
    pub fn at(&self, x: i32, y: i32) -> f32 {
        self.data[self.index(x, y)]
    }

    /// Mutable reference to the stored value at `(x, y)`
    #[inline]
    pub fn at_mut(&mut self, x: i32, y: i32) -> &mut f32 {
        let idx = self.index(x, y);
        &mut self.data[idx]
    }

    /// Value at `(x, y)`, or 0 outside the actual region
    #[inline]
    #[must_use]
    pub fn sample(&self, x: i32, y: i32) -> f32 {
        if x < 0 || x >= self.actual_width as i32 || y < 0 || y >= self.actual_height as i32 {
            0.0
        } else {
            self.data[self.index(x, y)]
        }
    }

    /// Whole backing buffer including halo, row-pitched
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable backing buffer; layout invariants are the caller's problem
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Zero the entire backing buffer, halo included
    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Exchange backing storage with another image of identical layout
    ///
    /// Shapes are untouched; only the pixel data moves. Used for ping-pong
    /// buffering between solver sweeps.
    ///
    /// # Panics
    ///
    /// Panics if the two buffers have different lengths
    pub fn swap_data(&mut self, other: &mut Image) {
        assert_eq!(
            self.data.len(),
            other.data.len(),
            "swap_data requires identical storage layout"
        );
        std::mem::swap(&mut self.data, &mut other.data);
    }

    /// Copy the actual region of `src` into this image and adopt its actual
    /// size
    ///
    /// # Panics
    ///
    /// Panics if this image's logical capacity cannot hold the source's
    /// actual region
    pub fn copy_from(&mut self, src: &Image) {
        assert!(
            self.width >= src.actual_width && self.height >= src.actual_height,
            "destination capacity too small for source actual size"
        );
        self.actual_width = src.actual_width;
        self.actual_height = src.actual_height;
        for y in 0..self.actual_height as i32 {
            for x in 0..self.actual_width as i32 {
                *self.at_mut(x, y) = src.at(x, y);
            }
        }
    }

    /// Add the actual region of `other` into this image, element-wise
    ///
    /// # Panics
    ///
    /// Panics if the actual sizes differ
    pub fn add_assign(&mut self, other: &Image) {
        assert!(
            self.actual_width == other.actual_width && self.actual_height == other.actual_height,
            "add_assign requires matching actual sizes"
        );
        for y in 0..self.actual_height as i32 {
            for x in 0..self.actual_width as i32 {
                *self.at_mut(x, y) += other.at(x, y);
            }
        }
    }

    /// Reflect the actual region outward into the halo
    ///
    /// Even symmetry about the border pixel: `P(-k, y) = P(k, y)` and
    /// `P(w-1+k, y) = P(w-1-k, y)` for `1 ≤ k ≤ bx`, and the same for rows.
    /// Corners are left untouched; the stencils only read edge-adjacent
    /// halo cells. Idempotent.
    pub fn fill_boundaries(&mut self) {
        let (aw, ah) = (self.actual_width as i32, self.actual_height as i32);
        if self.bx > 0 {
            for y in 0..ah {
                for k in 1..=self.bx as i32 {
                    *self.at_mut(-k, y) = self.at(k, y);
                    *self.at_mut(aw - 1 + k, y) = self.at(aw - 1 - k, y);
                }
            }
        }
        if self.by > 0 {
            for x in 0..aw {
                for k in 1..=self.by as i32 {
                    *self.at_mut(x, -k) = self.at(x, k);
                    *self.at_mut(x, ah - 1 + k) = self.at(x, ah - 1 - k);
                }
            }
        }
    }
}

fn aligned_pitch(width: usize, bx: usize) -> usize {
    let full = width + 2 * bx;
    full.div_ceil(PITCH_ALIGN) * PITCH_ALIGN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_is_multiple_of_32() {
        let img = Image::with_halo(100, 50, 1, 1);
        assert_eq!(img.pitch() % 32, 0);
        assert!(img.pitch() >= 100 + 2);
        assert_eq!(img.pitch(), 128);

        let exact = Image::with_halo(30, 10, 1, 1);
        assert_eq!(exact.pitch(), 32);
    }

    #[test]
    fn new_image_is_zeroed() {
        let img = Image::with_halo(16, 16, 1, 1);
        assert!(img.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn get_set_roundtrip_includes_halo() {
        let mut img = Image::with_halo(8, 8, 1, 1);
        *img.at_mut(3, 4) = 12.5;
        assert_eq!(img.at(3, 4), 12.5);
        *img.at_mut(-1, 0) = 7.0;
        assert_eq!(img.at(-1, 0), 7.0);
    }

    #[test]
    fn sample_is_zero_outside_actual_region() {
        let mut img = Image::with_halo(8, 8, 1, 1);
        *img.at_mut(0, 0) = 3.0;
        img.set_actual_size(4, 4);
        assert_eq!(img.sample(0, 0), 3.0);
        assert_eq!(img.sample(5, 0), 0.0);
        assert_eq!(img.sample(-1, 0), 0.0);
        assert_eq!(img.sample(0, 4), 0.0);
    }

    #[test]
    fn boundary_reflection_is_even_about_border_pixel() {
        // 32-wide buffer used at actual width 20 with a one-pixel halo
        let mut img = Image::with_halo(32, 8, 1, 1);
        img.set_actual_size(20, 8);
        for y in 0..8 {
            for x in 0..20 {
                *img.at_mut(x, y) = (y * 100 + x) as f32;
            }
        }
        img.fill_boundaries();
        for y in 0..8 {
            assert_eq!(img.at(-1, y), img.at(1, y));
            assert_eq!(img.at(20, y), img.at(18, y));
        }
        for x in 0..20 {
            assert_eq!(img.at(x, -1), img.at(x, 1));
            assert_eq!(img.at(x, 8), img.at(x, 6));
        }
    }

    #[test]
    fn boundary_reflection_is_idempotent() {
        let mut img = Image::with_halo(6, 5, 1, 1);
        for y in 0..5 {
            for x in 0..6 {
                *img.at_mut(x, y) = (x * y + x) as f32;
            }
        }
        img.fill_boundaries();
        let once = img.data().to_vec();
        img.fill_boundaries();
        assert_eq!(once, img.data());
    }

    #[test]
    fn copy_from_adopts_actual_size() {
        let mut src = Image::with_halo(16, 16, 1, 1);
        src.set_actual_size(10, 12);
        for y in 0..12 {
            for x in 0..10 {
                *src.at_mut(x, y) = (x + y) as f32;
            }
        }
        let mut dst = Image::with_halo(16, 16, 1, 1);
        dst.copy_from(&src);
        assert_eq!(dst.actual_width(), 10);
        assert_eq!(dst.actual_height(), 12);
        assert_eq!(dst.at(9, 11), 20.0);
    }

    #[test]
    #[should_panic(expected = "destination capacity too small")]
    fn copy_from_checks_capacity() {
        let src = Image::with_halo(32, 32, 1, 1);
        let mut dst = Image::with_halo(16, 16, 1, 1);
        dst.copy_from(&src);
    }

    #[test]
    #[should_panic(expected = "matching actual sizes")]
    fn add_assign_checks_shapes() {
        let a = Image::with_halo(8, 8, 1, 1);
        let mut b = Image::with_halo(8, 8, 1, 1);
        b.set_actual_size(4, 4);
        b.add_assign(&a);
    }

    #[test]
    fn add_assign_adds_actual_region() {
        let mut a = Image::with_halo(4, 4, 1, 1);
        let mut b = Image::with_halo(4, 4, 1, 1);
        *a.at_mut(1, 1) = 2.0;
        *b.at_mut(1, 1) = 3.0;
        a.add_assign(&b);
        assert_eq!(a.at(1, 1), 5.0);
    }

    #[test]
    fn swap_data_preserves_shapes() {
        let mut a = Image::with_halo(8, 8, 1, 1);
        let mut b = Image::with_halo(8, 8, 1, 1);
        a.set_actual_size(5, 5);
        *a.at_mut(0, 0) = 1.0;
        *b.at_mut(0, 0) = 2.0;
        a.swap_data(&mut b);
        assert_eq!(a.at(0, 0), 2.0);
        assert_eq!(b.at(0, 0), 1.0);
        assert_eq!(a.actual_width(), 5);
        assert_eq!(b.actual_width(), 8);
    }
}
