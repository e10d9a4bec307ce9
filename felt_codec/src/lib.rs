//! Conversions between raw bytes and Starknet field elements.
//!
//! On-chain calldata in this ecosystem is a flat list of field elements
//! (felts). Proof payloads are opaque byte blobs, so they travel as
//! big-endian chunks of at most 31 bytes each, one byte below the field
//! width so that every chunk fits without reduction. Short ASCII
//! identifiers (proof layout, hasher names and friends) travel as Cairo
//! short strings. Values that originate outside the field (256-bit hashes)
//! are reduced modulo the Stark prime, and the caller is told whether
//! reduction actually happened so it can log the loss of fidelity.

use num_bigint::BigUint;
use starknet::core::types::FieldElement;
use starknet::core::utils::{
    cairo_short_string_to_felt, parse_cairo_short_string, CairoShortStringToFeltError,
    ParseCairoShortStringError,
};
use thiserror::Error;

/// Maximum number of payload bytes packed into a single felt.
pub const CHUNK_BYTES: usize = 31;

/// The Stark field prime, `2^251 + 17 * 2^192 + 1`, in decimal.
const STARK_PRIME_DEC: &str =
    "3618502788666131213697322783095070105623107215331596699973092056135872020481";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("short string exceeds 31 characters: {0:?}")]
    ShortStringTooLong(String),
    #[error("short string contains non-ASCII characters: {0:?}")]
    ShortStringNotAscii(String),
    #[error("felt does not decode to a printable short string")]
    ShortStringUnprintable,
    #[error("invalid hex value {value:?}: {reason}")]
    InvalidHex { value: String, reason: String },
}

/// Packs an opaque byte payload into big-endian felt chunks.
///
/// The first `CHUNK_BYTES` bytes become the first felt and so on; a final
/// partial chunk occupies the low-order end of its felt. The mapping is not
/// length-prefixed, so callers that need to recover the exact byte length
/// must carry it separately.
pub fn bytes_to_felts(data: &[u8]) -> Vec<FieldElement> {
    data.chunks(CHUNK_BYTES)
        .map(|chunk| {
            let mut buf = [0u8; 32];
            buf[32 - chunk.len()..].copy_from_slice(chunk);
            // A chunk is at most 31 bytes, so the value is below 2^248 and
            // always within the field.
            FieldElement::from_bytes_be(&buf).expect("31-byte chunk fits the field")
        })
        .collect()
}

/// Encodes an ASCII identifier of at most 31 characters as a felt.
pub fn encode_short_string(s: &str) -> Result<FieldElement, CodecError> {
    cairo_short_string_to_felt(s).map_err(|e| match e {
        CairoShortStringToFeltError::StringTooLong => CodecError::ShortStringTooLong(s.to_owned()),
        CairoShortStringToFeltError::NonAsciiCharacter => {
            CodecError::ShortStringNotAscii(s.to_owned())
        }
    })
}

/// Decodes a felt back into the ASCII identifier it encodes.
pub fn decode_short_string(felt: &FieldElement) -> Result<String, CodecError> {
    parse_cairo_short_string(felt).map_err(|e| match e {
        ParseCairoShortStringError::ValueOutOfRange
        | ParseCairoShortStringError::UnexpectedNullTerminator => {
            CodecError::ShortStringUnprintable
        }
    })
}

/// Interprets 32 big-endian bytes as a felt, reducing modulo the field prime
/// when the value lies outside it.
///
/// Returns the felt together with a flag that is `true` when reduction was
/// necessary. Reduction is deterministic but lossy; callers surface the flag
/// as a diagnostic.
pub fn reduce_bytes_to_felt(bytes: &[u8; 32]) -> (FieldElement, bool) {
    if let Ok(felt) = FieldElement::from_bytes_be(bytes) {
        return (felt, false);
    }
    let prime = BigUint::parse_bytes(STARK_PRIME_DEC.as_bytes(), 10)
        .expect("prime constant is valid decimal");
    let reduced = BigUint::from_bytes_be(bytes) % prime;
    let digits = reduced.to_bytes_be();
    let mut buf = [0u8; 32];
    buf[32 - digits.len()..].copy_from_slice(&digits);
    let felt = FieldElement::from_bytes_be(&buf).expect("reduced value fits the field");
    (felt, true)
}

/// Parses a hex string (with or without `0x`, any length up to 64 nibbles)
/// into a felt, reducing modulo the field prime if needed.
pub fn hex_to_felt(s: &str) -> Result<(FieldElement, bool), CodecError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() || digits.len() > 64 {
        return Err(CodecError::InvalidHex {
            value: s.to_owned(),
            reason: format!("expected 1..=64 hex digits, got {}", digits.len()),
        });
    }
    let mut bytes = [0u8; 32];
    let mut nibbles = [0u8; 64];
    let offset = 64 - digits.len();
    for (i, c) in digits.chars().enumerate() {
        nibbles[offset + i] = c.to_digit(16).ok_or_else(|| CodecError::InvalidHex {
            value: s.to_owned(),
            reason: format!("invalid hex digit {c:?}"),
        })? as u8;
    }
    for (i, pair) in nibbles.chunks(2).enumerate() {
        bytes[i] = (pair[0] << 4) | pair[1];
    }
    Ok(reduce_bytes_to_felt(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_yields_no_felts() {
        assert!(bytes_to_felts(&[]).is_empty());
    }

    #[test]
    fn chunk_boundary_at_31_bytes() {
        let payload = vec![0xab; CHUNK_BYTES];
        let felts = bytes_to_felts(&payload);
        assert_eq!(felts.len(), 1);

        let payload = vec![0xab; CHUNK_BYTES + 1];
        let felts = bytes_to_felts(&payload);
        assert_eq!(felts.len(), 2);
        // The trailing byte is the low-order end of the second felt.
        assert_eq!(felts[1], FieldElement::from(0xabu8));
    }

    #[test]
    fn chunks_preserve_big_endian_order() {
        let mut payload = vec![0u8; CHUNK_BYTES];
        payload[0] = 0x01; // most significant byte of the first chunk
        payload.push(0x02);
        let felts = bytes_to_felts(&payload);
        let expected_first = {
            let mut buf = [0u8; 32];
            buf[1] = 0x01;
            FieldElement::from_bytes_be(&buf).unwrap()
        };
        assert_eq!(felts[0], expected_first);
        assert_eq!(felts[1], FieldElement::from(0x02u8));
    }

    #[test]
    fn short_string_round_trip() {
        for s in ["small", "keccak", "6", "cairo1"] {
            let felt = encode_short_string(s).unwrap();
            assert_eq!(decode_short_string(&felt).unwrap(), s);
        }
        // "small" is the ASCII bytes 73 6d 61 6c 6c read big-endian.
        assert_eq!(
            encode_short_string("small").unwrap(),
            FieldElement::from(0x736d616c6cu64)
        );
    }

    #[test]
    fn short_string_length_limit() {
        let long = "a".repeat(32);
        assert!(matches!(
            encode_short_string(&long),
            Err(CodecError::ShortStringTooLong(_))
        ));
    }

    #[test]
    fn reduction_flags_out_of_field_values() {
        let in_range = {
            let mut b = [0u8; 32];
            b[31] = 7;
            b
        };
        let (felt, reduced) = reduce_bytes_to_felt(&in_range);
        assert_eq!(felt, FieldElement::from(7u8));
        assert!(!reduced);

        let out_of_range = [0xffu8; 32];
        let (felt, reduced) = reduce_bytes_to_felt(&out_of_range);
        assert!(reduced);
        // Cross-check against plain big-integer arithmetic.
        let prime = BigUint::parse_bytes(STARK_PRIME_DEC.as_bytes(), 10).unwrap();
        let expected = BigUint::from_bytes_be(&out_of_range) % prime;
        assert_eq!(BigUint::from_bytes_be(&felt.to_bytes_be()), expected);
    }

    #[test]
    fn hex_parsing_accepts_short_and_prefixed_forms() {
        let (felt, reduced) = hex_to_felt("0xabc").unwrap();
        assert_eq!(felt, FieldElement::from(0xabcu16));
        assert!(!reduced);

        let (_, reduced) = hex_to_felt(&"f".repeat(64)).unwrap();
        assert!(reduced);

        assert!(hex_to_felt("0xzz").is_err());
        assert!(hex_to_felt("").is_err());
    }
}
