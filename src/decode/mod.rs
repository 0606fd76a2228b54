//! Channel decoding: compressed per-channel streams in, straight-alpha
//! 8-bit RGBA out.
//!
//! Every entry point is per-channel and returns `DecodeError` on failure;
//! one bad channel fails its layer, never the document.  Truncated input
//! pads the remainder of the plane with zero instead of erroring where the
//! format allows it.

pub mod packbits;
pub mod predict;
pub mod worker;

use crate::error::DecodeError;
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Channel compression tags as stored in the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    Raw,
    Rle,
    Zip,
    ZipPrediction,
}

impl Compression {
    pub fn from_tag(tag: u16) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(Compression::Raw),
            1 => Ok(Compression::Rle),
            2 => Ok(Compression::Zip),
            3 => Ok(Compression::ZipPrediction),
            other => Err(DecodeError::UnknownCompression(other)),
        }
    }
}

/// Uncompressed byte length of one scanline at the given depth.
fn row_bytes(width: u32, depth: u16) -> usize {
    (width as usize * depth as usize).div_ceil(8)
}

/// Decode one compressed channel into its raw plane (still at file depth,
/// big-endian for 16/32-bit).  `large_format` selects the 4-byte RLE
/// scanline-count entries used by PSB files.
pub fn decode_channel(
    input: &[u8],
    width: u32,
    height: u32,
    depth: u16,
    compression: Compression,
    large_format: bool,
) -> Result<Vec<u8>, DecodeError> {
    if width == 0 || height == 0 || !matches!(depth, 1 | 8 | 16 | 32) {
        return Err(DecodeError::BadDimensions { width, height, depth });
    }
    let row_len = row_bytes(width, depth);
    let plane_len = row_len
        .checked_mul(height as usize)
        .ok_or(DecodeError::BadDimensions { width, height, depth })?;

    match compression {
        Compression::Raw => {
            let mut plane = vec![0u8; plane_len];
            let n = input.len().min(plane_len);
            plane[..n].copy_from_slice(&input[..n]);
            Ok(plane)
        }
        Compression::Rle => {
            let (counts, table_len) =
                packbits::scanline_counts(input, height as usize, large_format).ok_or(
                    DecodeError::TruncatedInput {
                        expected: height as usize * if large_format { 4 } else { 2 },
                        got: input.len(),
                    },
                )?;
            let mut plane = vec![0u8; plane_len];
            let mut offset = table_len;
            for (r, &count) in counts.iter().enumerate() {
                let end = offset.saturating_add(count).min(input.len());
                let row = &mut plane[r * row_len..(r + 1) * row_len];
                // A truncated scanline decodes what it can; the row tail
                // stays zero.
                packbits::decode_scanline(&input[offset.min(input.len())..end], row);
                offset = end;
            }
            Ok(plane)
        }
        Compression::Zip | Compression::ZipPrediction => {
            let mut plane = Vec::with_capacity(plane_len);
            ZlibDecoder::new(input)
                .take(plane_len as u64)
                .read_to_end(&mut plane)
                .map_err(|e| DecodeError::Inflate(e.to_string()))?;
            plane.resize(plane_len, 0);
            if compression == Compression::ZipPrediction {
                predict::remove_prediction(&mut plane, row_len, predict::stride_for_depth(depth));
            }
            Ok(plane)
        }
    }
}

/// Normalize a decoded plane to one byte per sample.
///
/// * 8-bit passes through.
/// * 16-bit big-endian maps `v / 257` (65535 → 255 exactly).
/// * 32-bit big-endian IEEE-754 maps `round(clamp(f, 0, 1) * 255)`.
pub fn normalize_samples(plane: &[u8], depth: u16) -> Vec<u8> {
    match depth {
        16 => plane
            .chunks_exact(2)
            .map(|c| (u16::from_be_bytes([c[0], c[1]]) / 257) as u8)
            .collect(),
        32 => plane
            .chunks_exact(4)
            .map(|c| {
                let f = f32::from_be_bytes([c[0], c[1], c[2], c[3]]);
                (f.clamp(0.0, 1.0) * 255.0).round() as u8
            })
            .collect(),
        _ => plane.to_vec(),
    }
}

/// Interleave normalized channel planes into straight-alpha RGBA.
///
/// Channel ids: 0/1/2 → R/G/B, −1 → alpha; any other id (masks and so on) is
/// ignored.  A missing channel leaves its component at 0, except alpha which
/// defaults to fully opaque.  Planes shorter than the pixel count are treated
/// as zero-padded.
pub fn assemble_rgba(channels: &[(i16, Vec<u8>)], width: u32, height: u32) -> Vec<u8> {
    let pixels = width as usize * height as usize;
    let mut rgba = vec![0u8; pixels * 4];

    let has_alpha = channels.iter().any(|(id, _)| *id == -1);
    if !has_alpha {
        for px in rgba.chunks_exact_mut(4) {
            px[3] = 255;
        }
    }

    for (id, plane) in channels {
        let slot = match id {
            0 => 0,
            1 => 1,
            2 => 2,
            -1 => 3,
            _ => continue,
        };
        for (i, &v) in plane.iter().take(pixels).enumerate() {
            rgba[i * 4 + slot] = v;
        }
    }

    rgba
}
