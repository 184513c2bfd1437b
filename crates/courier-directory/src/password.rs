//! Salted password digests.

use sha2::{Digest, Sha256};

/// A salt and the SHA-256 digest of `salt || password`, both hex-encoded.
pub(crate) struct PasswordHash {
    pub(crate) salt: String,
    pub(crate) digest: String,
}

impl PasswordHash {
    /// Hash a password with a fresh random salt.
    pub(crate) fn generate(password: &str) -> Self {
        let salt = hex(&rand::random::<[u8; 16]>());
        let digest = digest(&salt, password);
        Self { salt, digest }
    }
}

/// Check `password` against a stored salt and digest.
pub(crate) fn verify(password: &str, salt: &str, expected: &str) -> bool {
    let actual = digest(salt, password);
    actual.len() == expected.len()
        && actual
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
