//! Binary PGM reading and writing
//!
//! P5 input is 8-bit greyscale promoted to float; P5 output clamps to
//! [0, 255]. The P6 writer emits 24-bit RGB for flow visualisations.

use crate::error::FlowError;
use crate::image::Image;
use std::fs;
use std::io::Write;
use std::path::Path;

fn malformed(path: &Path, reason: impl Into<String>) -> FlowError {
    FlowError::MalformedFile {
        format: "pgm",
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Whitespace- and comment-aware header tokenizer
struct HeaderCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> HeaderCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Next header token, skipping whitespace and `#` comment lines
    fn token(&mut self) -> Option<&'a str> {
        loop {
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.pos < self.bytes.len() && self.bytes[self.pos] == b'#' {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
        let start = self.pos;
        while self.pos < self.bytes.len() && !self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if self.pos == start {
            None
        } else {
            std::str::from_utf8(&self.bytes[start..self.pos]).ok()
        }
    }

    /// Consume the single whitespace byte separating header and raster
    fn skip_separator(&mut self) {
        if self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }
}

/// Read a binary 8-bit PGM into a float image (no halo)
///
/// # Errors
///
/// I/O failures, a wrong magic, missing or non-numeric dimensions, a
/// max-value above 255, or a truncated raster.
pub fn read_pgm(path: impl AsRef<Path>) -> Result<Image, FlowError> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let mut cursor = HeaderCursor::new(&bytes);

    match cursor.token() {
        Some("P5") => {}
        other => {
            return Err(malformed(
                path,
                format!("expected magic P5, found {:?}", other.unwrap_or("")),
            ))
        }
    }

    let mut dimension = |name: &str| -> Result<usize, FlowError> {
        cursor
            .token()
            .and_then(|t| t.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .ok_or_else(|| malformed(path, format!("missing or invalid {name}")))
    };
    let width = dimension("width")?;
    let height = dimension("height")?;
    let max_value = dimension("max value")?;
    if max_value > 255 {
        return Err(malformed(
            path,
            format!("max value {max_value} needs more than one byte per pixel"),
        ));
    }
    cursor.skip_separator();

    let raster = &bytes[cursor.pos..];
    if raster.len() < width * height {
        return Err(malformed(
            path,
            format!(
                "raster truncated: expected {} bytes, found {}",
                width * height,
                raster.len()
            ),
        ));
    }

    let mut img = Image::new(width, height);
    for y in 0..height {
        for x in 0..width {
            *img.at_mut(x as i32, y as i32) = f32::from(raster[y * width + x]);
        }
    }
    Ok(img)
}

/// Write the actual region as binary 8-bit PGM, clamping to [0, 255]
///
/// # Errors
///
/// Underlying I/O failures.
pub fn write_pgm(img: &Image, path: impl AsRef<Path>) -> Result<(), FlowError> {
    let width = img.actual_width();
    let height = img.actual_height();
    let mut out = Vec::with_capacity(width * height + 32);
    write!(out, "P5\n{width} {height}\n255\n")?;
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            out.push(img.at(x, y).clamp(0.0, 255.0) as u8);
        }
    }
    fs::write(path, out)?;
    Ok(())
}

/// Debug writer that includes the boundary halo around the actual region
///
/// # Errors
///
/// Underlying I/O failures.
pub fn write_pgm_with_boundaries(img: &Image, path: impl AsRef<Path>) -> Result<(), FlowError> {
    let (bx, by) = img.halo();
    let width = img.actual_width() + 2 * bx;
    let height = img.actual_height() + 2 * by;
    let mut out = Vec::with_capacity(width * height + 32);
    write!(out, "P5\n{width} {height}\n255\n")?;
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let value = img.at(x - bx as i32, y - by as i32);
            out.push(value.clamp(0.0, 255.0) as u8);
        }
    }
    fs::write(path, out)?;
    Ok(())
}

/// Write 24-bit RGB data as binary P6
///
/// `rgb` is `width·height` pixels, 3 bytes each, in R,G,B order.
///
/// # Errors
///
/// Underlying I/O failures.
///
/// # Panics
///
/// Panics if the buffer length does not match the dimensions.
pub fn write_ppm(
    width: usize,
    height: usize,
    rgb: &[u8],
    path: impl AsRef<Path>,
) -> Result<(), FlowError> {
    assert_eq!(rgb.len(), width * height * 3, "rgb buffer size mismatch");
    let mut out = Vec::with_capacity(rgb.len() + 32);
    write!(out, "P6\n{width} {height}\n255\n")?;
    out.extend_from_slice(rgb);
    fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pgm_roundtrip_preserves_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gradient.pgm");

        let mut img = Image::new(7, 5);
        for y in 0..5 {
            for x in 0..7 {
                *img.at_mut(x, y) = (x * 30 + y) as f32;
            }
        }
        write_pgm(&img, &path).unwrap();
        let back = read_pgm(&path).unwrap();
        assert_eq!(back.actual_width(), 7);
        assert_eq!(back.actual_height(), 5);
        for y in 0..5 {
            for x in 0..7 {
                assert_eq!(back.at(x, y), img.at(x, y));
            }
        }
    }

    #[test]
    fn header_comments_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commented.pgm");
        let mut bytes = b"P5\n# created by a test\n# second comment\n3 2\n255\n".to_vec();
        bytes.extend_from_slice(&[10, 20, 30, 40, 50, 60]);
        std::fs::write(&path, bytes).unwrap();

        let img = read_pgm(&path).unwrap();
        assert_eq!((img.actual_width(), img.actual_height()), (3, 2));
        assert_eq!(img.at(0, 0), 10.0);
        assert_eq!(img.at(2, 1), 60.0);
    }

    #[test]
    fn writer_clamps_out_of_range_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clamped.pgm");
        let mut img = Image::new(2, 1);
        *img.at_mut(0, 0) = -40.0;
        *img.at_mut(1, 0) = 300.0;
        write_pgm(&img, &path).unwrap();
        let back = read_pgm(&path).unwrap();
        assert_eq!(back.at(0, 0), 0.0);
        assert_eq!(back.at(1, 0), 255.0);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colour.ppm");
        std::fs::write(&path, b"P6\n1 1\n255\n\0\0\0").unwrap();
        let err = read_pgm(&path).unwrap_err();
        assert!(matches!(err, FlowError::MalformedFile { format: "pgm", .. }));
    }

    #[test]
    fn truncated_raster_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.pgm");
        std::fs::write(&path, b"P5\n4 4\n255\n\x01\x02").unwrap();
        assert!(read_pgm(&path).is_err());
    }

    #[test]
    fn halo_writer_includes_the_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("halo.pgm");
        let mut img = Image::with_halo(4, 3, 1, 1);
        for y in 0..3 {
            for x in 0..4 {
                *img.at_mut(x, y) = (10 * (x + 1)) as f32;
            }
        }
        img.fill_boundaries();
        write_pgm_with_boundaries(&img, &path).unwrap();
        let back = read_pgm(&path).unwrap();
        assert_eq!((back.actual_width(), back.actual_height()), (6, 5));
        // halo column mirrors the second interior column
        assert_eq!(back.at(0, 1), 20.0);
    }
}
