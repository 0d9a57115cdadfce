//! Little helpers shared by the record readers and writers.

use std::io::{self, Read, Write};

use crate::error::FormatError;

/// Fail with [`FormatError::Truncated`] unless `data` holds at least `needed` bytes.
pub fn ensure_len(data: &[u8], needed: u64) -> Result<(), FormatError> {
    let available = data.len() as u64;
    if available < needed {
        return Err(FormatError::Truncated { needed, available });
    }
    Ok(())
}

/// Read a NUL-padded string stored in a fixed-width field.
///
/// Bytes after the first NUL are ignored. Invalid UTF-8 is replaced, not
/// rejected.
pub fn read_fixed_str<R: Read>(reader: &mut R, width: usize) -> io::Result<String> {
    let mut buf = vec![0u8; width];
    reader.read_exact(&mut buf)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(width);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Write `s` into a fixed-width NUL-padded field.
///
/// The string is cut on a char boundary so that at least one NUL remains.
pub fn write_fixed_str<W: Write>(writer: &mut W, s: &str, width: usize) -> io::Result<()> {
    let mut end = s.len().min(width.saturating_sub(1));
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut buf = vec![0u8; width];
    buf[..end].copy_from_slice(&s.as_bytes()[..end]);
    writer.write_all(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_str_stops_at_nul() {
        let mut data: &[u8] = b"main\0garbage\0\0\0";
        let s = read_fixed_str(&mut data, 15).unwrap();
        assert_eq!(s, "main");
        assert!(data.is_empty());
    }

    #[test]
    fn fixed_str_truncates_on_char_boundary() {
        let mut out = Vec::new();
        // "ab€" is 5 bytes; width 5 leaves room for 4, which would split '€'.
        write_fixed_str(&mut out, "ab\u{20ac}", 5).unwrap();
        assert_eq!(out, b"ab\0\0\0");
    }

    #[test]
    fn ensure_len_reports_shortfall() {
        let err = ensure_len(&[0u8; 3], 8).unwrap_err();
        assert!(matches!(
            err,
            FormatError::Truncated {
                needed: 8,
                available: 3
            }
        ));
    }
}
