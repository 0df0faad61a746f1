//! Seed Hashing
//!
//! Domain-separated SHA-256 digests used to turn arbitrary seed strings
//! into fixed-width integers. Every peer must derive identical values,
//! so the byte layout fed to the hasher is part of the protocol.

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type SeedHash = [u8; 32];

/// Domain separator for platform seed material.
pub const SEED_DOMAIN: &[u8] = b"JUMPY_SEED_V1";

/// Domain separator for cosmetic (sprite variant) draws.
pub const VARIANT_DOMAIN: &[u8] = b"JUMPY_VARIANT_V1";

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> SeedHash {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Fold a digest into a u64 (first 8 bytes, little-endian).
#[inline]
pub fn digest_to_u64(hash: &SeedHash) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(bytes)
}

/// Short hex fingerprint of a seed, for logs.
pub fn seed_fingerprint(seed: &str) -> String {
    let hash = hash_with_domain(SEED_DOMAIN, seed.as_bytes());
    hex::encode(&hash[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_separation() {
        let data = b"12345";

        let hash1 = hash_with_domain(SEED_DOMAIN, data);
        let hash2 = hash_with_domain(VARIANT_DOMAIN, data);

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_digest_to_u64_uses_little_endian_prefix() {
        let mut hash = [0u8; 32];
        hash[0] = 0x01;
        hash[7] = 0x80;
        hash[8] = 0xFF;

        assert_eq!(digest_to_u64(&hash), 0x8000_0000_0000_0001);
    }

    #[test]
    fn test_seed_fingerprint_is_short_hex() {
        let fp = seed_fingerprint("12345");
        assert_eq!(fp.len(), 8);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, seed_fingerprint("12345"));
    }
}
