//! Length-prefixed packing of opaque byte blobs.
//!
//! Format: for each segment, a 2-byte big-endian length followed by the
//! segment bytes, concatenated in order.
//!
//! ```text
//! [len_0 (2)][seg_0 (len_0)][len_1 (2)][seg_1 (len_1)]...
//! ```
//!
//! Zero-length segments cannot be represented: `pack` refuses them and a
//! zero length field is rejected on unpack.

use thiserror::Error;

use crate::ecies::AsymmetricCiphertext;

/// Segments must be strictly smaller than this.
pub const MAX_SEGMENT_LEN: usize = 1 << 16;

/// Size of the length field in front of every segment.
const LEN_FIELD: usize = 2;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PackError {
    #[error("Malformed packed data: {0}")]
    MalformedData(String),
    #[error("Segment too large: {0} bytes (limit {MAX_SEGMENT_LEN})")]
    SegmentTooLarge(usize),
}

/// Pack segments into one buffer.
pub fn pack<S: AsRef<[u8]>>(segments: &[S]) -> Result<Vec<u8>, PackError> {
    let mut total = 0usize;
    for segment in segments {
        let len = segment.as_ref().len();
        if len == 0 {
            return Err(PackError::MalformedData("zero-length segment".into()));
        }
        if len >= MAX_SEGMENT_LEN {
            return Err(PackError::SegmentTooLarge(len));
        }
        total += LEN_FIELD + len;
    }

    let mut out = Vec::with_capacity(total);
    for segment in segments {
        let bytes = segment.as_ref();
        out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(bytes);
    }
    Ok(out)
}

/// Unpack a buffer produced by [`pack`].
pub fn unpack(buffer: &[u8]) -> Result<Vec<Vec<u8>>, PackError> {
    let mut segments = Vec::new();
    let mut rest = buffer;

    while !rest.is_empty() {
        if rest.len() < LEN_FIELD {
            return Err(PackError::MalformedData(format!(
                "{} trailing byte(s), need {} for a length field",
                rest.len(),
                LEN_FIELD
            )));
        }
        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        rest = &rest[LEN_FIELD..];

        if len == 0 {
            return Err(PackError::MalformedData("zero-length segment".into()));
        }
        if len > rest.len() {
            return Err(PackError::MalformedData(format!(
                "declared length {} exceeds remaining {} byte(s)",
                len,
                rest.len()
            )));
        }

        segments.push(rest[..len].to_vec());
        rest = &rest[len..];
    }

    Ok(segments)
}

/// Pack the fixed 4-tuple of an [`AsymmetricCiphertext`]:
/// iv, ephemeral public key, ciphertext, mac.
pub fn pack_elliptic(ct: &AsymmetricCiphertext) -> Result<Vec<u8>, PackError> {
    pack(&[
        ct.iv.as_slice(),
        ct.ephemeral_public_key.as_slice(),
        ct.ciphertext.as_slice(),
        ct.mac.as_slice(),
    ])
}

/// Inverse of [`pack_elliptic`]. Exactly four segments are required.
pub fn unpack_elliptic(buffer: &[u8]) -> Result<AsymmetricCiphertext, PackError> {
    let segments = unpack(buffer)?;
    let [iv, ephemeral_public_key, ciphertext, mac]: [Vec<u8>; 4] =
        segments.try_into().map_err(|s: Vec<Vec<u8>>| {
            PackError::MalformedData(format!("expected 4 segments, got {}", s.len()))
        })?;

    Ok(AsymmetricCiphertext {
        iv,
        ephemeral_public_key,
        ciphertext,
        mac,
    })
}

/// Pack whole segments greedily into several buffers of at most
/// `max_chunk_len` bytes each.
///
/// The ledger bounds the size of a single stored value, so the per-keeper
/// ciphertexts are stored as a list of such chunks. A segment that does not
/// fit in `max_chunk_len` on its own gets a chunk to itself.
pub fn pack_chunked<S: AsRef<[u8]>>(
    segments: &[S],
    max_chunk_len: usize,
) -> Result<Vec<Vec<u8>>, PackError> {
    let mut chunks = Vec::new();
    let mut current: Vec<&[u8]> = Vec::new();
    let mut current_len = 0usize;

    for segment in segments {
        let bytes = segment.as_ref();
        let packed_len = LEN_FIELD + bytes.len();
        if !current.is_empty() && current_len + packed_len > max_chunk_len {
            chunks.push(pack(&current)?);
            current.clear();
            current_len = 0;
        }
        current.push(bytes);
        current_len += packed_len;
    }
    if !current.is_empty() {
        chunks.push(pack(&current)?);
    }

    Ok(chunks)
}

/// Unpack every chunk and concatenate the segment lists.
pub fn unpack_chunks<C: AsRef<[u8]>>(chunks: &[C]) -> Result<Vec<Vec<u8>>, PackError> {
    let mut segments = Vec::new();
    for chunk in chunks {
        segments.extend(unpack(chunk.as_ref())?);
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_layout() {
        let packed = pack(&[b"ab".as_slice(), b"c".as_slice()]).unwrap();
        assert_eq!(packed, vec![0x00, 0x02, b'a', b'b', 0x00, 0x01, b'c']);
    }

    #[test]
    fn test_roundtrip_mixed_sizes() {
        let segments: Vec<Vec<u8>> = vec![
            vec![0x42],
            vec![0u8; 255],
            vec![0xFF; 256],
            (0..=255u8).cycle().take(MAX_SEGMENT_LEN - 1).collect(),
        ];
        let packed = pack(&segments).unwrap();
        assert_eq!(unpack(&packed).unwrap(), segments);
    }

    #[test]
    fn test_empty_sequence() {
        let empty: Vec<Vec<u8>> = Vec::new();
        assert!(pack(&empty).unwrap().is_empty());
        assert!(unpack(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_segment_too_large() {
        let big = vec![0u8; MAX_SEGMENT_LEN];
        assert_eq!(
            pack(&[big]),
            Err(PackError::SegmentTooLarge(MAX_SEGMENT_LEN))
        );
    }

    #[test]
    fn test_truncated_length_field() {
        let mut packed = pack(&[b"abc"]).unwrap();
        packed.push(0x00);
        assert!(matches!(unpack(&packed), Err(PackError::MalformedData(_))));
    }

    #[test]
    fn test_pack_rejects_empty_segment() {
        assert!(matches!(
            pack(&[b"".as_slice()]),
            Err(PackError::MalformedData(_))
        ));
        assert!(matches!(
            pack(&[vec![1u8], vec![]]),
            Err(PackError::MalformedData(_))
        ));
        assert!(matches!(
            pack_chunked(&[vec![1u8; 4], vec![]], 64),
            Err(PackError::MalformedData(_))
        ));
    }

    #[test]
    fn test_elliptic_empty_ciphertext_rejected() {
        let ct = AsymmetricCiphertext {
            iv: vec![1; 16],
            ephemeral_public_key: vec![2; 33],
            ciphertext: Vec::new(),
            mac: vec![4; 32],
        };
        assert!(matches!(
            pack_elliptic(&ct),
            Err(PackError::MalformedData(_))
        ));
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(matches!(
            unpack(&[0x00, 0x00]),
            Err(PackError::MalformedData(_))
        ));
    }

    #[test]
    fn test_declared_length_overflows() {
        assert!(matches!(
            unpack(&[0x00, 0x05, 1, 2, 3]),
            Err(PackError::MalformedData(_))
        ));
    }

    #[test]
    fn test_elliptic_roundtrip() {
        let ct = AsymmetricCiphertext {
            iv: vec![1; 16],
            ephemeral_public_key: vec![2; 33],
            ciphertext: vec![3; 40],
            mac: vec![4; 32],
        };
        let packed = pack_elliptic(&ct).unwrap();
        assert_eq!(unpack_elliptic(&packed).unwrap(), ct);
    }

    #[test]
    fn test_elliptic_wrong_arity() {
        let packed = pack(&[b"iv", b"ek", b"ct"]).unwrap();
        assert!(matches!(
            unpack_elliptic(&packed),
            Err(PackError::MalformedData(_))
        ));
    }

    #[test]
    fn test_chunked_respects_limit() {
        let segments: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 30]).collect();
        let chunks = pack_chunked(&segments, 100).unwrap();

        // 32 bytes per packed segment, 3 per chunk
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.len() <= 100));
        assert_eq!(unpack_chunks(&chunks).unwrap(), segments);
    }

    #[test]
    fn test_chunked_oversized_segment_alone() {
        let segments = vec![vec![1u8; 10], vec![2u8; 500], vec![3u8; 10]];
        let chunks = pack_chunked(&segments, 64).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(unpack_chunks(&chunks).unwrap(), segments);
    }
}
