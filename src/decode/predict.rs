//! Horizontal prediction filter used by zip-with-prediction channels.
//!
//! Each row stores deltas: byte `i` (for `i >= stride`) is the difference
//! from byte `i - stride`, modulo 256.  Rows are independent.  The stride is
//! one byte for sub-byte depths, otherwise the sample size in bytes.

/// Byte stride between predicted samples for a given bit depth.
pub fn stride_for_depth(depth: u16) -> usize {
    if depth < 8 { 1 } else { depth as usize / 8 }
}

/// Undo the prediction filter in place.  `row_bytes` is the uncompressed
/// byte length of one scanline; a trailing partial row is left untouched.
pub fn remove_prediction(data: &mut [u8], row_bytes: usize, stride: usize) {
    if row_bytes == 0 || stride == 0 {
        return;
    }
    for row in data.chunks_exact_mut(row_bytes) {
        for i in stride..row.len() {
            row[i] = row[i].wrapping_add(row[i - stride]);
        }
    }
}

/// Apply the prediction filter in place (the encoder side, used by tests).
pub fn apply_prediction(data: &mut [u8], row_bytes: usize, stride: usize) {
    if row_bytes == 0 || stride == 0 {
        return;
    }
    for row in data.chunks_exact_mut(row_bytes) {
        for i in (stride..row.len()).rev() {
            row[i] = row[i].wrapping_sub(row[i - stride]);
        }
    }
}
