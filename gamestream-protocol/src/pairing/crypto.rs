//! Pairing Cryptography Primitives
//!
//! The pairing handshake derives a shared AES-128 key from a random salt
//! and the user-entered PIN, exchanges challenges under AES-128-ECB, and
//! authenticates both sides with RSA-SHA256 signatures over their secrets.
//!
//! ECB here carries single random blocks, not bulk data: every plaintext is
//! either one 16-byte challenge or one 32-byte hash, padded with trailing
//! zero bytes to the block boundary. Both peers round to the block size the
//! same way, so the transform is deterministic in both directions.

use crate::Result;
use openssl::hash::MessageDigest;
use openssl::pkey::{HasPublic, PKeyRef};
use openssl::sign::Verifier;
use openssl::symm::{Cipher, Crypter, Mode};
use sha2::{Digest, Sha256};

/// AES block size, also the derived key length
pub const BLOCK_SIZE: usize = 16;

/// Fill a buffer with cryptographically secure random bytes
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    openssl::rand::rand_bytes(&mut buf)?;
    Ok(buf)
}

/// Derive the pairing AES-128 key: first 16 bytes of SHA-256(salt ‖ PIN)
pub fn derive_pairing_key(salt: &[u8], pin: &str) -> [u8; BLOCK_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(pin.as_bytes());
    let hash = hasher.finalize();

    let mut key = [0u8; BLOCK_SIZE];
    key.copy_from_slice(&hash[..BLOCK_SIZE]);
    key
}

/// SHA-256 over a sequence of byte slices
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// AES-128-ECB encrypt, zero-padding the input to the block boundary
pub fn encrypt_blocks(key: &[u8; BLOCK_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    ecb_transform(key, data, Mode::Encrypt)
}

/// AES-128-ECB decrypt
///
/// Non-block-aligned ciphertext is zero-rounded to the next block, the
/// same rounding encryption applies to plaintext.
pub fn decrypt_blocks(key: &[u8; BLOCK_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    ecb_transform(key, data, Mode::Decrypt)
}

fn ecb_transform(key: &[u8; BLOCK_SIZE], data: &[u8], mode: Mode) -> Result<Vec<u8>> {
    let cipher = Cipher::aes_128_ecb();

    // Round up to the block size, padding with trailing zeros
    let rounded = data.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    let mut input = vec![0u8; rounded];
    input[..data.len()].copy_from_slice(data);

    let mut crypter = Crypter::new(cipher, mode, key, None)?;
    crypter.pad(false);

    let mut output = vec![0u8; rounded + cipher.block_size()];
    let mut written = crypter.update(&input, &mut output)?;
    written += crypter.finalize(&mut output[written..])?;
    output.truncate(written);

    Ok(output)
}

/// Verify an RSA PKCS#1 v1.5 SHA-256 signature
pub fn verify_signature<T: HasPublic>(
    public_key: &PKeyRef<T>,
    data: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let mut verifier = Verifier::new(MessageDigest::sha256(), public_key)?;
    verifier.update(data)?;
    Ok(verifier.verify(signature)?)
}

/// Length-checked constant-time comparison for secret material
pub fn secure_compare(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && openssl::memcmp::eq(a, b)
}
