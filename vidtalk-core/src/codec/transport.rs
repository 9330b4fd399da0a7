//! Binary <-> text transport encoding (standard base64, padded).

use base64::{engine::general_purpose, Engine as _};

use crate::error::{Result, VidtalkError};

pub fn bytes_to_transport_text(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// # Errors
/// `MalformedAudio` if `text` is not valid standard base64.
pub fn transport_text_to_bytes(text: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| VidtalkError::MalformedAudio(format!("base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_byte_value() {
        let bytes: Vec<u8> = (0..=255u8).chain((0..=255u8).rev()).collect();
        for len in [0usize, 1, 2, 3, 4, 255, 512] {
            let slice = &bytes[..len];
            let text = bytes_to_transport_text(slice);
            assert_eq!(transport_text_to_bytes(&text).unwrap(), slice);
        }
    }

    #[test]
    fn known_vector() {
        assert_eq!(bytes_to_transport_text(b"hello"), "aGVsbG8=");
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            transport_text_to_bytes("not base64!!"),
            Err(VidtalkError::MalformedAudio(_))
        ));
    }
}
