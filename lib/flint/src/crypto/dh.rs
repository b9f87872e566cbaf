//! Diffie-Hellman over the well-known 768 bit MODP group (RFC 2409, group 1).
use crate::crypto::{left_pad, random_bytes};
use rsa::BigUint;

pub const DH_SIZE: usize = 96;

const GENERATOR: u32 = 2;

const PRIME: [u8; DH_SIZE] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc9, 0x0f, 0xda, 0xa2, 0x21, 0x68, 0xc2, 0x34,
    0xc4, 0xc6, 0x62, 0x8b, 0x80, 0xdc, 0x1c, 0xd1, 0x29, 0x02, 0x4e, 0x08, 0x8a, 0x67, 0xcc, 0x74,
    0x02, 0x0b, 0xbe, 0xa6, 0x3b, 0x13, 0x9b, 0x22, 0x51, 0x4a, 0x08, 0x79, 0x8e, 0x34, 0x04, 0xdd,
    0xef, 0x95, 0x19, 0xb3, 0xcd, 0x3a, 0x43, 0x1b, 0x30, 0x2b, 0x0a, 0x6d, 0xf2, 0x5f, 0x14, 0x37,
    0x4f, 0xe1, 0x35, 0x6d, 0x6d, 0x51, 0xc2, 0x45, 0xe4, 0x85, 0xb5, 0x76, 0x62, 0x5e, 0x7e, 0xc6,
    0xf4, 0x4c, 0x42, 0xe9, 0xa6, 0x3a, 0x36, 0x20, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

pub struct DhKeyPair {
    private: BigUint,
    public: [u8; DH_SIZE],
}

impl DhKeyPair {
    /// Generates a key pair with a random private exponent.
    pub fn generate() -> DhKeyPair {
        let mut private = [0u8; DH_SIZE - 1];
        random_bytes(&mut private);
        Self::from_private(&private)
    }

    /// Derives the key pair belonging to the supplied big endian private exponent.
    pub fn from_private(private: &[u8]) -> DhKeyPair {
        let private = BigUint::from_bytes_be(private);
        let public = BigUint::from(GENERATOR).modpow(&private, &Self::prime());

        DhKeyPair {
            private,
            public: left_pad(&public.to_bytes_be()),
        }
    }

    /// Public value, big endian and left padded to the group size.
    #[inline]
    pub fn public(&self) -> &[u8; DH_SIZE] {
        &self.public
    }

    /// Computes the shared secret with the remote public value.
    pub fn shared_secret(&self, remote_public: &[u8]) -> [u8; DH_SIZE] {
        let remote = BigUint::from_bytes_be(remote_public);
        left_pad(&remote.modpow(&self.private, &Self::prime()).to_bytes_be())
    }

    #[inline]
    fn prime() -> BigUint {
        BigUint::from_bytes_be(&PRIME)
    }
}
