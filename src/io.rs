//! Minimal binary encode/decode helpers shared by the page, WAL and
//! catalog formats. All multibyte integers are little-endian, matching
//! the on-disk contract in the design doc.

/// A fixed-width, null-terminated byte field. Used for `CHAR`/`VARCHAR`
/// columns, which are padded/truncated to `width` bytes on encode.
pub fn encode_fixed_str(s: &str, width: usize) -> Vec<u8> {
    let mut buf = vec![0u8; width];
    let bytes = s.as_bytes();
    let n = bytes.len().min(width.saturating_sub(1));
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

pub fn decode_fixed_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_str_round_trips_within_width() {
        let encoded = encode_fixed_str("hello", 10);
        assert_eq!(encoded.len(), 10);
        assert_eq!(decode_fixed_str(&encoded), "hello");
    }

    #[test]
    fn fixed_str_truncates_to_width_minus_one() {
        let encoded = encode_fixed_str("abcdef", 4);
        assert_eq!(decode_fixed_str(&encoded), "abc");
    }
}
