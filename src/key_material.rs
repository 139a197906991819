//! Compiled-in key material for the license record.
//!
//! Each 32-byte key is stored as four 8-byte hex fragments that are only
//! assembled at runtime, then passed through a repeating-salt XOR mask twice.
//! The two mask passes cancel out. They exist so that the assembled key never
//! appears as a contiguous literal in the binary and a plain string search for
//! the key bytes finds nothing.
//!
//! This is deterrence against naive extraction, not secrecy: anyone able to
//! step through `derive_key` recovers both keys.

use crate::encryption::KEY_SIZE;

/// Bytes per fragment.
const FRAGMENT_LEN: usize = 8;

/// Fragments per key.
const FRAGMENT_COUNT: usize = KEY_SIZE / FRAGMENT_LEN;

const ENCRYPTION_FRAGMENTS: [[u8; FRAGMENT_LEN]; FRAGMENT_COUNT] = [
    fragment("62ecfebf40e853cf"),
    fragment("b921fd1dc74e69a2"),
    fragment("ea106855e24fa73a"),
    fragment("f35643d46cc603a1"),
];

const SIGNING_FRAGMENTS: [[u8; FRAGMENT_LEN]; FRAGMENT_COUNT] = [
    fragment("fc14f93816169cb6"),
    fragment("5d7978c27f3a17b6"),
    fragment("9ff3095697632e9f"),
    fragment("e1c10df672920362"),
];

const MASK_SALT: [u8; FRAGMENT_LEN] = fragment("efde163738ed0560");

/// Which compiled-in secret to reconstruct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    /// AES-256-GCM key protecting the license payload.
    Encryption,
    /// HMAC-SHA256 key sealing the whole license record.
    Signing,
}

/// Reconstruct the 32-byte secret for `role`.
///
/// Pure and deterministic; cannot fail.
pub fn derive_key(role: KeyRole) -> [u8; KEY_SIZE] {
    let fragments = match role {
        KeyRole::Encryption => &ENCRYPTION_FRAGMENTS,
        KeyRole::Signing => &SIGNING_FRAGMENTS,
    };

    let mut key = [0u8; KEY_SIZE];
    for (chunk, fragment) in key.chunks_exact_mut(FRAGMENT_LEN).zip(fragments.iter()) {
        chunk.copy_from_slice(fragment);
    }

    // Two passes on purpose, see module docs. black_box keeps the compiler
    // from folding the masks into a constant.
    let salt = std::hint::black_box(MASK_SALT);
    apply_mask(&mut key, &salt);
    apply_mask(&mut key, &salt);

    key
}

fn apply_mask(key: &mut [u8], salt: &[u8]) {
    for (byte, s) in key.iter_mut().zip(salt.iter().cycle()) {
        *byte ^= s;
    }
}

const fn nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => panic!("invalid hex digit in key fragment"),
    }
}

/// Decode a 16-character hex fragment at compile time.
const fn fragment(hex: &str) -> [u8; FRAGMENT_LEN] {
    let bytes = hex.as_bytes();
    assert!(bytes.len() == FRAGMENT_LEN * 2, "key fragment must be 16 hex digits");

    let mut out = [0u8; FRAGMENT_LEN];
    let mut i = 0;
    while i < FRAGMENT_LEN {
        out[i] = (nibble(bytes[2 * i]) << 4) | nibble(bytes[2 * i + 1]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_are_deterministic() {
        assert_eq!(derive_key(KeyRole::Encryption), derive_key(KeyRole::Encryption));
        assert_eq!(derive_key(KeyRole::Signing), derive_key(KeyRole::Signing));
    }

    #[test]
    fn roles_yield_distinct_keys() {
        assert_ne!(derive_key(KeyRole::Encryption), derive_key(KeyRole::Signing));
    }

    #[test]
    fn double_mask_preserves_fragments() {
        let key = derive_key(KeyRole::Encryption);
        assert_eq!(
            hex::encode(key),
            "62ecfebf40e853cfb921fd1dc74e69a2ea106855e24fa73af35643d46cc603a1"
        );
    }

    #[test]
    fn single_mask_pass_changes_key() {
        let mut key = derive_key(KeyRole::Signing);
        let original = key;
        apply_mask(&mut key, &MASK_SALT);
        assert_ne!(key, original);
        apply_mask(&mut key, &MASK_SALT);
        assert_eq!(key, original);
    }

    #[test]
    fn fragment_decodes_mixed_case() {
        assert_eq!(
            fragment("00ff10AbCdEf0102"),
            [0x00, 0xff, 0x10, 0xab, 0xcd, 0xef, 0x01, 0x02]
        );
    }
}
