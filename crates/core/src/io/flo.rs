//! Middlebury `.flo` flow files
//!
//! Little-endian layout: a float tag (202021.25, doubling as an endianness
//! check), int32 width and height, then `height · width` interleaved
//! `(u, v)` float pairs in row-major order. The writer emits the same bytes
//! the reader accepts, bit-exactly.

use crate::error::FlowError;
use crate::image::Image;
use crate::solver::FlowField;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Sanity tag at the head of every `.flo` file
pub const FLO_TAG: f32 = 202021.25;

/// Dimension bound from the format definition
const MAX_DIMENSION: i32 = 99_999;

fn malformed(path: &Path, reason: impl Into<String>) -> FlowError {
    FlowError::MalformedFile {
        format: "flo",
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn read_f32(bytes: &[u8], pos: usize) -> f32 {
    f32::from_le_bytes(bytes[pos..pos + 4].try_into().expect("bounds checked"))
}

fn read_i32(bytes: &[u8], pos: usize) -> i32 {
    i32::from_le_bytes(bytes[pos..pos + 4].try_into().expect("bounds checked"))
}

/// Read a `.flo` flow field
///
/// # Errors
///
/// I/O failures, a wrong tag (usually an endianness clue), out-of-range
/// dimensions, or a payload whose length disagrees with the header.
pub fn read_flo(path: impl AsRef<Path>) -> Result<FlowField, FlowError> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    if bytes.len() < 12 {
        return Err(malformed(path, "file shorter than its header"));
    }

    let tag = read_f32(&bytes, 0);
    if tag != FLO_TAG {
        return Err(malformed(
            path,
            format!("wrong tag {tag} (big-endian machine?)"),
        ));
    }
    let width = read_i32(&bytes, 4);
    let height = read_i32(&bytes, 8);
    if !(1..=MAX_DIMENSION).contains(&width) {
        return Err(malformed(path, format!("illegal width {width}")));
    }
    if !(1..=MAX_DIMENSION).contains(&height) {
        return Err(malformed(path, format!("illegal height {height}")));
    }
    let (width, height) = (width as usize, height as usize);

    let expected = 12 + width * height * 2 * 4;
    if bytes.len() < expected {
        return Err(malformed(path, "payload truncated"));
    }
    if bytes.len() > expected {
        return Err(malformed(path, "file is too long"));
    }

    let mut u = Image::new(width, height);
    let mut v = Image::new(width, height);
    let mut pos = 12;
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            *u.at_mut(x, y) = read_f32(&bytes, pos);
            *v.at_mut(x, y) = read_f32(&bytes, pos + 4);
            pos += 8;
        }
    }
    Ok(FlowField { u, v })
}

/// Write a flow field as `.flo`, bit-exactly
///
/// # Errors
///
/// Underlying I/O failures.
///
/// # Panics
///
/// Panics if the two components disagree on their actual size.
pub fn write_flo(u: &Image, v: &Image, path: impl AsRef<Path>) -> Result<(), FlowError> {
    assert!(
        u.actual_width() == v.actual_width() && u.actual_height() == v.actual_height(),
        "flow components must share one size"
    );
    let width = u.actual_width();
    let height = u.actual_height();

    let mut out = Vec::with_capacity(12 + width * height * 8);
    out.write_all(&FLO_TAG.to_le_bytes())?;
    out.write_all(&(width as i32).to_le_bytes())?;
    out.write_all(&(height as i32).to_le_bytes())?;
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            out.write_all(&u.at(x, y).to_le_bytes())?;
            out.write_all(&v.at(x, y).to_le_bytes())?;
        }
    }
    fs::write(path, out)?;
    Ok(())
}
