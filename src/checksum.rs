//! Payload integrity digest
//!
//! CRC-16-CCITT: polynomial 0x1021, register initialised to 0xFFFF, MSB-first,
//! no reflection and no final XOR. The same digest is used on the encode and
//! verify paths.

use crc::{Crc, CRC_16_IBM_3740};

/// Digest value carried in every frame header
pub type Digest = u16;

/// Digest width on the wire (bytes)
pub const DIGEST_LEN: usize = 2;

const CRC16_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the digest of `payload`
pub fn digest(payload: &[u8]) -> Digest {
    CRC16_CCITT.checksum(payload)
}

/// Check a payload against a received digest
pub fn verify(payload: &[u8], expected: Digest) -> bool {
    digest(payload) == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    /// Bit-at-a-time register walk used to cross-check the table implementation.
    fn reference_crc(bytes: &[u8]) -> u16 {
        let mut crc: u32 = 0xFFFF;
        for &b in bytes {
            crc ^= (b as u32) << 8;
            for _ in 0..8 {
                if crc & 0x8000 != 0 {
                    crc = (crc << 1) ^ 0x1021;
                } else {
                    crc <<= 1;
                }
            }
        }
        (crc & 0xFFFF) as u16
    }

    #[test]
    fn test_check_value() {
        assert_eq!(digest(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_empty_payload_is_initial_register() {
        assert_eq!(digest(b""), 0xFFFF);
    }

    #[test]
    fn test_matches_bitwise_reference() {
        let mut rng = rand::thread_rng();
        for len in [1usize, 2, 5, 64, 1023] {
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            assert_eq!(digest(&payload), reference_crc(&payload), "len={}", len);
        }
    }

    #[test]
    fn test_deterministic() {
        let payload = b"hello";
        assert_eq!(digest(payload), digest(payload));
        assert!(verify(payload, digest(payload)));
    }

    #[test]
    fn test_single_bit_corruption_detected() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let len = rng.gen_range(1..256);
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let mut corrupted = payload.clone();
            let bit = rng.gen_range(0..len * 8);
            corrupted[bit / 8] ^= 1 << (bit % 8);

            // a CRC detects every single-bit error
            assert_ne!(digest(&payload), digest(&corrupted));
        }
    }
}
