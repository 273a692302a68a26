//! Corruption detectors run over the raw 5-byte packet header (1 type byte
//! + 4 big-endian length bytes) before a packet is staged for fragmenting.
//! Kept as explicit named predicates rather than inline conditionals.

use thiserror::Error;

use crate::MAX_RAW_BODY_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorruptionError {
    #[error("header body length {0} exceeds max raw body size {1}")]
    BodyTooLarge(u32, u32),
    #[error("header bytes are all equal, looks desynced")]
    AllBytesEqual,
    #[error("header bytes look like base64 text, looks desynced")]
    LooksLikeBase64Text,
}

/// All five header bytes identical is almost certainly a desynced read.
pub fn is_all_bytes_equal(header: &[u8; 5]) -> bool {
    header.iter().all(|&b| b == header[0])
}

/// Five consecutive bytes that are all valid Base64 alphabet characters
/// suggests the reader is looking at Base64 text rather than a binary
/// header (a previous fragment boundary was missed).
pub fn has_five_consecutive_base64_chars(header: &[u8; 5]) -> bool {
    header.iter().all(|&b| is_base64_alphabet_char(b))
}

fn is_base64_alphabet_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

/// Validate a raw 5-byte header (type byte + 4-byte BE length) before it is
/// trusted enough to wait on and fragment.
pub fn validate_header(header: &[u8; 5]) -> Result<(), CorruptionError> {
    if is_all_bytes_equal(header) {
        return Err(CorruptionError::AllBytesEqual);
    }
    if has_five_consecutive_base64_chars(header) {
        return Err(CorruptionError::LooksLikeBase64Text);
    }
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len > MAX_RAW_BODY_SIZE {
        return Err(CorruptionError::BodyTooLarge(len, MAX_RAW_BODY_SIZE));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_equal_bytes_are_rejected() {
        assert!(is_all_bytes_equal(&[7, 7, 7, 7, 7]));
        assert!(validate_header(&[7, 7, 7, 7, 7]).is_err());
    }

    #[test]
    fn base64_looking_header_is_rejected() {
        let header = *b"AbC1/";
        assert!(has_five_consecutive_base64_chars(&header));
        assert!(validate_header(&header).is_err());
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut header = [3u8, 0, 0, 0, 0];
        header[1..5].copy_from_slice(&(MAX_RAW_BODY_SIZE + 1).to_be_bytes());
        assert_eq!(
            validate_header(&header),
            Err(CorruptionError::BodyTooLarge(
                MAX_RAW_BODY_SIZE + 1,
                MAX_RAW_BODY_SIZE
            ))
        );
    }

    #[test]
    fn ordinary_header_passes() {
        // type=3 (JsonCommand), len=128
        let header = [3u8, 0, 0, 0, 128];
        assert!(validate_header(&header).is_ok());
    }
}
