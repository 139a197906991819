//! Symmetric primitives for the license record.
//!
//! AES-256-GCM with a detached tag for confidentiality, HMAC-SHA256 for the
//! outer seal over the whole record.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};

use rand::rngs::OsRng;
use rand::TryRngCore;

use ring::hmac;

use crate::errors::{CorruptionKind, WardenError, WardenResult};

/// AES-256 key size in bytes. Also the HMAC key size.
pub const KEY_SIZE: usize = 32;

/// GCM nonce size in bytes (96-bit).
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// HMAC-SHA256 output size in bytes.
pub const MAC_SIZE: usize = 32;

/// Output of [`seal`]: the three segments written to disk ahead of the MAC.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

/// Generate a fresh random nonce from the OS RNG.
pub fn generate_nonce() -> WardenResult<[u8; NONCE_SIZE]> {
    let mut nonce = [0u8; NONCE_SIZE];
    let mut rng = OsRng;
    rng.try_fill_bytes(&mut nonce)
        .map_err(|e| WardenError::EncryptionError(format!("OS RNG failed: {e}")))?;
    Ok(nonce)
}

/// Encrypt `plaintext` under a fresh nonce.
pub fn seal(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> WardenResult<Sealed> {
    let nonce = generate_nonce()?;
    seal_with_nonce(plaintext, key, nonce)
}

fn seal_with_nonce(
    plaintext: &[u8],
    key: &[u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
) -> WardenResult<Sealed> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
        .map_err(|e| WardenError::EncryptionError(format!("encryption failed: {e}")))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(Sealed {
        nonce,
        tag: tag_bytes,
        ciphertext: buffer,
    })
}

/// Authenticated decryption of a detached-tag ciphertext.
///
/// Any failure (wrong key, modified nonce, tag or ciphertext) is reported as
/// [`CorruptionKind::DecryptionFailed`].
pub fn open(
    nonce: &[u8],
    tag: &[u8],
    ciphertext: &[u8],
    key: &[u8; KEY_SIZE],
) -> WardenResult<Vec<u8>> {
    if nonce.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
        return Err(WardenError::RecordCorrupt(CorruptionKind::DecryptionFailed));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| WardenError::RecordCorrupt(CorruptionKind::DecryptionFailed))?;

    Ok(buffer)
}

/// HMAC-SHA256 over `data`.
pub fn sign(data: &[u8], key: &[u8; KEY_SIZE]) -> [u8; MAC_SIZE] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let tag = hmac::sign(&key, data);

    let mut mac = [0u8; MAC_SIZE];
    mac.copy_from_slice(tag.as_ref());
    mac
}

/// Constant-time check of `mac` against a freshly computed HMAC over `data`.
pub fn verify(data: &[u8], mac: &[u8], key: &[u8; KEY_SIZE]) -> bool {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::verify(&key, data, mac).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_SIZE] = [7u8; KEY_SIZE];

    #[test]
    fn seal_then_open_returns_plaintext() {
        let data = b"warden encryption";

        let sealed = seal(data, &KEY).expect("seal should succeed");
        assert_ne!(sealed.ciphertext, data, "ciphertext must differ from plaintext");
        assert_eq!(sealed.ciphertext.len(), data.len());

        let opened = open(&sealed.nonce, &sealed.tag, &sealed.ciphertext, &KEY)
            .expect("open should succeed");
        assert_eq!(opened, data);
    }

    #[test]
    fn fresh_nonce_per_seal() {
        let a = seal(b"same", &KEY).unwrap();
        let b = seal(b"same", &KEY).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn open_rejects_modified_tag() {
        let mut sealed = seal_with_nonce(b"payload", &KEY, [1u8; NONCE_SIZE]).unwrap();
        sealed.tag[0] ^= 0x01;

        let result = open(&sealed.nonce, &sealed.tag, &sealed.ciphertext, &KEY);
        assert!(matches!(
            result,
            Err(WardenError::RecordCorrupt(CorruptionKind::DecryptionFailed))
        ));
    }

    #[test]
    fn open_rejects_wrong_key() {
        let sealed = seal(b"payload", &KEY).unwrap();
        let other = [8u8; KEY_SIZE];
        assert!(open(&sealed.nonce, &sealed.tag, &sealed.ciphertext, &other).is_err());
    }

    #[test]
    fn open_rejects_bad_segment_lengths() {
        assert!(open(&[0u8; 4], &[0u8; TAG_SIZE], b"x", &KEY).is_err());
        assert!(open(&[0u8; NONCE_SIZE], &[0u8; 3], b"x", &KEY).is_err());
    }

    #[test]
    fn mac_verifies_and_detects_changes() {
        let mac = sign(b"record bytes", &KEY);
        assert!(verify(b"record bytes", &mac, &KEY));
        assert!(!verify(b"record bytez", &mac, &KEY));
        assert!(!verify(b"record bytes", &mac[..MAC_SIZE - 1], &KEY));
    }
}
