//! Cryptographic primitives used by the access point protocol.
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha1::{Digest, Sha1};

pub mod dh;
pub mod shannon;

pub const SHA1_SIZE: usize = 20;
pub const RSA_BITS: usize = 1024;
pub const RSA_MODULUS_SIZE: usize = RSA_BITS / 8;

type HmacSha1 = Hmac<Sha1>;

/// Fills the provided buffer with cryptographically secure random bytes
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    OsRng.fill_bytes(out);
}

/// SHA-1 digest over the concatenation of the supplied parts.
pub fn sha1(parts: &[&[u8]]) -> [u8; SHA1_SIZE] {
    let mut hasher = Sha1::new();

    for part in parts {
        hasher.update(part);
    }

    let mut digest = [0u8; SHA1_SIZE];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// HMAC-SHA1 over the concatenation of the supplied parts.
pub fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> [u8; SHA1_SIZE] {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");

    for part in parts {
        mac.update(part);
    }

    let mut digest = [0u8; SHA1_SIZE];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    digest
}

/// Copies a big endian integer into a fixed size buffer, left padding with zeroes. Integers wider than
/// the buffer keep their least significant bytes.
pub(crate) fn left_pad<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];

    match bytes.len() > N {
        true => out.copy_from_slice(&bytes[bytes.len() - N..]),
        _ => out[N - bytes.len()..].copy_from_slice(bytes),
    }

    out
}

/// Ephemeral RSA key pair. Only the modulus ever leaves the client.
pub struct RsaKeyPair {
    key: RsaPrivateKey,
}

impl RsaKeyPair {
    /// Generates a fresh 1024 bit key pair.
    pub fn generate() -> Result<RsaKeyPair, rsa::Error> {
        Ok(RsaKeyPair {
            key: RsaPrivateKey::new(&mut OsRng, RSA_BITS)?,
        })
    }

    /// Big endian public modulus, left padded to the key size.
    #[inline]
    pub fn modulus(&self) -> [u8; RSA_MODULUS_SIZE] {
        left_pad(&self.key.n().to_bytes_be())
    }
}
