//! Session key derivation from the Diffie-Hellman shared secret.
use flint::crypto;
use flint::crypto::SHA1_SIZE;

pub const RANDOM_SIZE: usize = 16;
pub const SALT_SIZE: usize = 10;
pub const CIPHER_KEY_SIZE: usize = 32;

const ROUNDS: u8 = 5;

/// Keys produced by a successful key agreement.
#[derive(Clone, Eq, PartialEq)]
pub struct SessionKeys {
    /// Authenticates the client's second login message.
    pub hmac: [u8; SHA1_SIZE],
    /// Client to server cipher key.
    pub send: [u8; CIPHER_KEY_SIZE],
    /// Server to client cipher key.
    pub recv: [u8; CIPHER_KEY_SIZE],
}

/// `SHA1(salt || " " || password)`
pub fn auth_hash(salt: &[u8], password: &str) -> [u8; SHA1_SIZE] {
    crypto::sha1(&[salt, &b" "[..], password.as_bytes()])
}

/// Runs the five HMAC rounds keyed with the shared secret. The message is the auth hash followed by
/// both randoms and the round number, each round's output replacing the auth hash for the next one.
pub fn derive_keys(
    shared_secret: &[u8],
    auth_hash: &[u8; SHA1_SIZE],
    client_random: &[u8; RANDOM_SIZE],
    server_random: &[u8; RANDOM_SIZE],
) -> SessionKeys {
    let mut message = [0u8; SHA1_SIZE + 2 * RANDOM_SIZE + 1];
    message[..SHA1_SIZE].copy_from_slice(auth_hash);
    message[SHA1_SIZE..SHA1_SIZE + RANDOM_SIZE].copy_from_slice(client_random);
    message[SHA1_SIZE + RANDOM_SIZE..SHA1_SIZE + 2 * RANDOM_SIZE].copy_from_slice(server_random);

    let mut output = [0u8; SHA1_SIZE * ROUNDS as usize];

    for round in 1..=ROUNDS {
        message[SHA1_SIZE + 2 * RANDOM_SIZE] = round;

        let digest = crypto::hmac_sha1(shared_secret, &[&message[..]]);

        let offset = (round - 1) as usize * SHA1_SIZE;
        output[offset..offset + SHA1_SIZE].copy_from_slice(&digest);
        message[..SHA1_SIZE].copy_from_slice(&digest);
    }

    let mut keys = SessionKeys {
        hmac: [0u8; SHA1_SIZE],
        send: [0u8; CIPHER_KEY_SIZE],
        recv: [0u8; CIPHER_KEY_SIZE],
    };

    keys.hmac.copy_from_slice(&output[..SHA1_SIZE]);
    keys.send.copy_from_slice(&output[SHA1_SIZE..SHA1_SIZE + CIPHER_KEY_SIZE]);
    keys.recv
        .copy_from_slice(&output[SHA1_SIZE + CIPHER_KEY_SIZE..SHA1_SIZE + 2 * CIPHER_KEY_SIZE]);

    keys
}

/// HMAC over every byte exchanged so far plus the auth trailer.
pub fn auth_hmac(
    hmac_key: &[u8],
    client_hello: &[u8],
    server_hello: &[u8],
    trailer: &[u8],
) -> [u8; SHA1_SIZE] {
    crypto::hmac_sha1(hmac_key, &[client_hello, server_hello, trailer])
}
