//! Fixed-schema binary codec for signatures.
//!
//! Layout (little-endian):
//!
//! ```text
//! +--------+---------+-------+-----------+---------------------+
//! | "FGSG" | version | width | count u32 | count x f64 payload |
//! +--------+---------+-------+-----------+---------------------+
//! ```
//!
//! Decoding never pads or truncates: the byte length must equal the header
//! plus exactly `count` components.

use thiserror::Error;

use crate::types::Signature;

const MAGIC: &[u8; 4] = b"FGSG";
const VERSION: u8 = 1;
const ELEMENT_WIDTH: u8 = 8;
pub const HEADER_LEN: usize = MAGIC.len() + 2 + 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
}

fn malformed(msg: impl Into<String>) -> CodecError {
    CodecError::MalformedSignature(msg.into())
}

/// Size in bytes of an encoded signature with `dimension` components.
pub fn encoded_len(dimension: usize) -> usize {
    HEADER_LEN + dimension * usize::from(ELEMENT_WIDTH)
}

pub fn encode(signature: &Signature) -> Vec<u8> {
    let values = signature.values();
    let mut out = Vec::with_capacity(encoded_len(values.len()));
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.push(ELEMENT_WIDTH);
    // Signature dimensions come from a face model; they never approach u32::MAX.
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<Signature, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(malformed(format!(
            "{} bytes is shorter than the {HEADER_LEN}-byte header",
            bytes.len()
        )));
    }

    let (header, payload) = bytes.split_at(HEADER_LEN);
    if &header[..4] != MAGIC {
        return Err(malformed("bad magic"));
    }
    if header[4] != VERSION {
        return Err(malformed(format!("unsupported version {}", header[4])));
    }
    if header[5] != ELEMENT_WIDTH {
        return Err(malformed(format!("unsupported element width {}", header[5])));
    }

    let count = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
    if count == 0 {
        return Err(malformed("zero components"));
    }
    let expected = count
        .checked_mul(usize::from(ELEMENT_WIDTH))
        .ok_or_else(|| malformed("component count overflows"))?;
    if payload.len() != expected {
        return Err(malformed(format!(
            "header declares {count} components ({expected} bytes), payload has {} bytes",
            payload.len()
        )));
    }

    let values: Vec<f64> = payload
        .chunks_exact(usize::from(ELEMENT_WIDTH))
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect();

    Signature::new(values).map_err(|e| malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(values: Vec<f64>) -> Signature {
        Signature::new(values).unwrap()
    }

    fn assert_bit_identical(a: &Signature, b: &Signature) {
        assert_eq!(a.dimension(), b.dimension());
        for (x, y) in a.values().iter().zip(b.values()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn test_round_trip_is_bit_exact() {
        let values: Vec<f64> = (0..128).map(|i| ((i as f64) * 0.731).sin() / 7.0).collect();
        let original = sig(values);
        let decoded = decode(&encode(&original)).unwrap();
        assert_bit_identical(&original, &decoded);
    }

    #[test]
    fn test_round_trip_preserves_signed_zero_and_subnormals() {
        let original = sig(vec![-0.0, 0.0, f64::MIN_POSITIVE / 4.0, f64::MAX, f64::MIN, -1e-300]);
        let decoded = decode(&encode(&original)).unwrap();
        assert_bit_identical(&original, &decoded);
        assert!(decoded.values()[0].is_sign_negative());
    }

    #[test]
    fn test_encoded_length() {
        let bytes = encode(&sig(vec![1.0; 128]));
        assert_eq!(bytes.len(), encoded_len(128));
        assert_eq!(bytes.len(), 10 + 128 * 8);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let bytes = encode(&sig(vec![0.5; 128]));
        let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::MalformedSignature(_)));

        let err = decode(&bytes[..bytes.len() - 8]).unwrap_err();
        assert!(matches!(err, CodecError::MalformedSignature(_)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&sig(vec![0.5; 4]));
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(decode(b"").is_err());
        assert!(decode(b"FGSG\x01").is_err());
    }

    #[test]
    fn test_bad_magic_and_version_rejected() {
        let good = encode(&sig(vec![0.1, 0.2]));

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        assert!(decode(&bad_magic).is_err());

        let mut bad_version = good.clone();
        bad_version[4] = 9;
        assert!(decode(&bad_version).is_err());

        let mut bad_width = good;
        bad_width[5] = 4;
        assert!(decode(&bad_width).is_err());
    }

    #[test]
    fn test_non_finite_payload_rejected() {
        let mut bytes = encode(&sig(vec![0.1, 0.2]));
        bytes[HEADER_LEN..HEADER_LEN + 8].copy_from_slice(&f64::NAN.to_le_bytes());
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("not a finite number"));
    }

    #[test]
    fn test_textual_list_rejected() {
        // Stringified float lists are not a valid encoding.
        assert!(decode(b"[0.1, 0.2, 0.3]").is_err());
    }

    #[test]
    fn test_zero_count_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&[VERSION, ELEMENT_WIDTH, 0, 0, 0, 0]);
        assert!(decode(&bytes).is_err());
    }
}
