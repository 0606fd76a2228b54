//! PackBits run-length coding, the PSD flavor: one compressed stream per
//! scanline, prefixed (at the channel level) by a big-endian byte-count
//! table.
//!
//! Decoding is defensive by contract: a short or malformed scanline fills
//! what it can and leaves the rest of the row at zero.  It must never read
//! or write outside the row.

/// Decode one PackBits scanline into `out`, which is pre-sized to the row's
/// uncompressed byte length.  Returns the number of bytes produced.
///
/// Control byte `n` as i8:
/// * `0..=127`  — copy the next `n + 1` bytes literally
/// * `-127..=-1` — repeat the next byte `1 - n` times
/// * `-128`     — no-op
pub fn decode_scanline(input: &[u8], out: &mut [u8]) -> usize {
    let mut src = 0usize;
    let mut dst = 0usize;

    while src < input.len() && dst < out.len() {
        let ctrl = input[src] as i8;
        src += 1;

        if ctrl == -128 {
            continue;
        }

        if ctrl >= 0 {
            let run = ctrl as usize + 1;
            let avail = input.len() - src;
            let n = run.min(avail).min(out.len() - dst);
            out[dst..dst + n].copy_from_slice(&input[src..src + n]);
            src += n;
            dst += n;
        } else {
            let run = 1 - ctrl as isize;
            let Some(&byte) = input.get(src) else { break };
            src += 1;
            let n = (run as usize).min(out.len() - dst);
            out[dst..dst + n].fill(byte);
            dst += n;
        }
    }

    dst
}

/// Encode one scanline with PackBits.  Runs of 3+ identical bytes become
/// replicate packets; everything else is emitted as literal packets of at
/// most 128 bytes.
pub fn encode_scanline(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len() / 2 + 2);
    let mut i = 0usize;

    while i < row.len() {
        // Measure the run starting here.
        let mut run = 1usize;
        while i + run < row.len() && row[i + run] == row[i] && run < 128 {
            run += 1;
        }

        if run >= 3 {
            out.push((1i16 - run as i16) as u8);
            out.push(row[i]);
            i += run;
            continue;
        }

        // Literal packet: scan forward until a 3-run starts or we hit 128.
        let start = i;
        let mut len = 0usize;
        while i < row.len() && len < 128 {
            let mut ahead = 1usize;
            while i + ahead < row.len() && row[i + ahead] == row[i] && ahead < 3 {
                ahead += 1;
            }
            if ahead >= 3 {
                break;
            }
            i += 1;
            len += 1;
        }
        out.push((len - 1) as u8);
        out.extend_from_slice(&row[start..start + len]);
    }

    out
}

/// Parse the per-scanline byte-count table that precedes RLE channel data.
/// Counts are u16 big-endian, or u32 when `large_format` (PSB) is set.
/// Returns `(counts, table_len_in_bytes)`, or `None` if the input is shorter
/// than the table itself.
pub fn scanline_counts(input: &[u8], rows: usize, large_format: bool) -> Option<(Vec<usize>, usize)> {
    let entry = if large_format { 4 } else { 2 };
    let table_len = rows.checked_mul(entry)?;
    if input.len() < table_len {
        return None;
    }

    let mut counts = Vec::with_capacity(rows);
    for r in 0..rows {
        let off = r * entry;
        let count = if large_format {
            u32::from_be_bytes([input[off], input[off + 1], input[off + 2], input[off + 3]])
                as usize
        } else {
            u16::from_be_bytes([input[off], input[off + 1]]) as usize
        };
        counts.push(count);
    }
    Some((counts, table_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_literal_packet() {
        let input = [2u8, 10, 20, 30];
        let mut out = [0u8; 3];
        assert_eq!(decode_scanline(&input, &mut out), 3);
        assert_eq!(out, [10, 20, 30]);
    }

    #[test]
    fn decodes_replicate_packet() {
        // -2 as control => repeat next byte 3 times
        let input = [(-2i8) as u8, 7];
        let mut out = [0u8; 3];
        assert_eq!(decode_scanline(&input, &mut out), 3);
        assert_eq!(out, [7, 7, 7]);
    }

    #[test]
    fn minus_128_is_a_no_op() {
        let input = [(-128i8) as u8, 0u8, 42];
        let mut out = [0u8; 1];
        assert_eq!(decode_scanline(&input, &mut out), 1);
        assert_eq!(out, [42]);
    }

    #[test]
    fn short_input_pads_with_zero() {
        let input = [1u8, 5]; // promises 2 literals, delivers 1
        let mut out = [9u8; 4];
        out.fill(0);
        let produced = decode_scanline(&input, &mut out);
        assert_eq!(produced, 1);
        assert_eq!(out, [5, 0, 0, 0]);
    }

    #[test]
    fn overlong_run_is_clamped_to_row() {
        let input = [(-100i8) as u8, 1]; // 101-byte run into a 4-byte row
        let mut out = [0u8; 4];
        assert_eq!(decode_scanline(&input, &mut out), 4);
        assert_eq!(out, [1, 1, 1, 1]);
    }

    #[test]
    fn encode_decode_round_trip() {
        let rows: [&[u8]; 4] = [
            &[0; 64],
            &[1, 2, 3, 4, 5],
            &[9, 9, 9, 9, 1, 2, 9, 9, 9, 3],
            &[255; 300],
        ];
        for row in rows {
            let enc = encode_scanline(row);
            let mut dec = vec![0u8; row.len()];
            assert_eq!(decode_scanline(&enc, &mut dec), row.len());
            assert_eq!(dec, row);
        }
    }

    #[test]
    fn count_table_u16_and_u32() {
        let input = [0u8, 3, 0, 5, 0xAA];
        let (counts, len) = scanline_counts(&input, 2, false).unwrap();
        assert_eq!(counts, vec![3, 5]);
        assert_eq!(len, 4);

        let input = [0u8, 0, 0, 3, 0, 0, 0, 5];
        let (counts, len) = scanline_counts(&input, 2, true).unwrap();
        assert_eq!(counts, vec![3, 5]);
        assert_eq!(len, 8);

        assert!(scanline_counts(&[0u8; 3], 2, false).is_none());
    }
}
