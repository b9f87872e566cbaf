//! Wire layout of the four login messages. Both directions are implemented so the server side can be
//! scripted in tests.
use crate::login::keys::{RANDOM_SIZE, SALT_SIZE};
use crate::login::puzzle::{Puzzle, PUZZLE_TYPE_HASH, SOLUTION_SIZE};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use flint::crypto::dh::DH_SIZE;
use flint::crypto::{RSA_MODULUS_SIZE, SHA1_SIZE};
use std::io;
use std::io::{Read, Write};

pub const PROTOCOL_VERSION: u16 = 3;
pub const BLOB_SIZE: usize = 256;

#[inline]
fn invalid(reason: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}

/// Reasons carried in the low byte of a failed server hello status.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Rejection {
    UpgradeRequired,
    UserNotFound,
    Banned,
    NeedsDetails,
    CountryMismatch,
    Other(u8),
}

impl From<u8> for Rejection {
    fn from(reason: u8) -> Self {
        match reason {
            0x01 => Rejection::UpgradeRequired,
            0x03 => Rejection::UserNotFound,
            0x04 => Rejection::Banned,
            0x06 => Rejection::NeedsDetails,
            0x09 => Rejection::CountryMismatch,
            other => Rejection::Other(other),
        }
    }
}

impl Rejection {
    /// The rejection a hello status stands for, `None` on success.
    #[inline]
    pub fn from_status(status: u16) -> Option<Rejection> {
        match status {
            0 => None,
            status => Some(Rejection::from(status as u8)),
        }
    }

    /// Wire status for the rejection.
    pub fn status(self) -> u16 {
        match self {
            Rejection::UpgradeRequired => 0x01,
            Rejection::UserNotFound => 0x03,
            Rejection::Banned => 0x04,
            Rejection::NeedsDetails => 0x06,
            Rejection::CountryMismatch => 0x09,
            Rejection::Other(reason) => reason as u16,
        }
    }
}

/// First message of the handshake.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClientHello {
    pub client_revision: u32,
    pub client_id: [u8; 4],
    pub random: [u8; RANDOM_SIZE],
    pub dh_public: [u8; DH_SIZE],
    pub rsa_modulus: [u8; RSA_MODULUS_SIZE],
    pub username: String,
}

impl ClientHello {
    /// Size without the username.
    pub const FIXED_SIZE: usize = 32 + RANDOM_SIZE + DH_SIZE + RSA_MODULUS_SIZE + 5;

    #[inline]
    pub fn size(&self) -> usize {
        Self::FIXED_SIZE + self.username.len()
    }

    pub fn write<W: Write>(&self, stream: &mut W) -> io::Result<()> {
        if self.username.len() > u8::MAX as usize {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "Username too long"));
        }

        stream.write_u16::<BigEndian>(PROTOCOL_VERSION)?;
        stream.write_u16::<BigEndian>(self.size() as u16)?;
        stream.write_u32::<BigEndian>(0x0000_0300)?;
        stream.write_u32::<BigEndian>(0x0003_0c00)?;
        stream.write_u32::<BigEndian>(self.client_revision)?;
        stream.write_u32::<BigEndian>(0)?;
        stream.write_u32::<BigEndian>(0x0100_0000)?;
        stream.write_all(&self.client_id)?;
        stream.write_u32::<BigEndian>(0)?;
        stream.write_all(&self.random)?;
        stream.write_all(&self.dh_public)?;
        stream.write_all(&self.rsa_modulus)?;
        stream.write_u8(0)?;
        stream.write_u8(self.username.len() as u8)?;
        stream.write_u16::<BigEndian>(0x0100)?;
        stream.write_all(self.username.as_bytes())?;
        stream.write_u8(0x40)?;

        Ok(())
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.size());
        self.write(&mut bytes)?;
        Ok(bytes)
    }

    /// Total message length announced in the first four bytes.
    #[inline]
    pub fn declared_len(prefix: &[u8; 4]) -> usize {
        BigEndian::read_u16(&prefix[2..]) as usize
    }

    pub fn read(mut stream: &[u8]) -> io::Result<ClientHello> {
        if stream.read_u16::<BigEndian>()? != PROTOCOL_VERSION {
            return Err(invalid("Unsupported protocol version"));
        }

        let _total = stream.read_u16::<BigEndian>()?;
        let mut skip = [0u8; 8];
        stream.read_exact(&mut skip)?;

        let client_revision = stream.read_u32::<BigEndian>()?;
        stream.read_exact(&mut skip)?;

        let mut instance = ClientHello {
            client_revision,
            client_id: [0; 4],
            random: [0; RANDOM_SIZE],
            dh_public: [0; DH_SIZE],
            rsa_modulus: [0; RSA_MODULUS_SIZE],
            username: String::new(),
        };

        stream.read_exact(&mut instance.client_id)?;
        stream.read_u32::<BigEndian>()?;
        stream.read_exact(&mut instance.random)?;
        stream.read_exact(&mut instance.dh_public)?;
        stream.read_exact(&mut instance.rsa_modulus)?;

        let random_len = stream.read_u8()? as usize;
        let username_len = stream.read_u8()? as usize;
        stream.read_u16::<BigEndian>()?;

        let mut random_data = vec![0u8; random_len];
        stream.read_exact(&mut random_data)?;

        let mut username = vec![0u8; username_len];
        stream.read_exact(&mut username)?;
        instance.username = String::from_utf8(username).map_err(|_| invalid("Username is not UTF-8"))?;

        Ok(instance)
    }
}

/// The access point's answer to the client hello.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServerHello {
    pub status: u16,
    pub random: [u8; RANDOM_SIZE],
    pub dh_public: [u8; DH_SIZE],
    pub blob: [u8; BLOB_SIZE],
    pub salt: [u8; SALT_SIZE],
    pub padding: Vec<u8>,
    pub username: String,
    pub puzzle: Vec<u8>,
}

impl ServerHello {
    pub const STATUS_SIZE: usize = 2;
    /// Size up to and including the three variable section lengths.
    pub const FIXED_SIZE: usize = Self::STATUS_SIZE + RANDOM_SIZE + DH_SIZE + BLOB_SIZE + SALT_SIZE + 4;

    /// Length of the variable section announced at the end of the fixed part.
    #[inline]
    pub fn variable_len(fixed: &[u8]) -> usize {
        let lengths = &fixed[Self::FIXED_SIZE - 4..Self::FIXED_SIZE];
        lengths[0] as usize + lengths[1] as usize + BigEndian::read_u16(&lengths[2..]) as usize
    }

    /// Parses a complete server hello.
    pub fn parse(mut stream: &[u8]) -> io::Result<ServerHello> {
        let mut instance = ServerHello {
            status: stream.read_u16::<BigEndian>()?,
            random: [0; RANDOM_SIZE],
            dh_public: [0; DH_SIZE],
            blob: [0; BLOB_SIZE],
            salt: [0; SALT_SIZE],
            padding: Vec::new(),
            username: String::new(),
            puzzle: Vec::new(),
        };

        stream.read_exact(&mut instance.random)?;
        stream.read_exact(&mut instance.dh_public)?;
        stream.read_exact(&mut instance.blob)?;
        stream.read_exact(&mut instance.salt)?;

        let padding_len = stream.read_u8()? as usize;
        let username_len = stream.read_u8()? as usize;
        let puzzle_len = stream.read_u16::<BigEndian>()? as usize;

        instance.padding = vec![0u8; padding_len];
        stream.read_exact(&mut instance.padding)?;

        let mut username = vec![0u8; username_len];
        stream.read_exact(&mut username)?;
        instance.username = String::from_utf8_lossy(&username).into_owned();

        instance.puzzle = vec![0u8; puzzle_len];
        stream.read_exact(&mut instance.puzzle)?;

        Ok(instance)
    }

    pub fn write<W: Write>(&self, stream: &mut W) -> io::Result<()> {
        if self.padding.len() > u8::MAX as usize || self.username.len() > u8::MAX as usize {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "Section too long"));
        }

        stream.write_u16::<BigEndian>(self.status)?;
        stream.write_all(&self.random)?;
        stream.write_all(&self.dh_public)?;
        stream.write_all(&self.blob)?;
        stream.write_all(&self.salt)?;
        stream.write_u8(self.padding.len() as u8)?;
        stream.write_u8(self.username.len() as u8)?;
        stream.write_u16::<BigEndian>(self.puzzle.len() as u16)?;
        stream.write_all(&self.padding)?;
        stream.write_all(self.username.as_bytes())?;
        stream.write_all(&self.puzzle)?;

        Ok(())
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write(&mut bytes)?;
        Ok(bytes)
    }

    /// Encodes a hash puzzle section.
    pub fn encode_puzzle(puzzle: &Puzzle) -> Vec<u8> {
        let mut section = vec![PUZZLE_TYPE_HASH, puzzle.denominator, 0, 0, 0, 0];
        BigEndian::write_u32(&mut section[2..], puzzle.magic);
        section
    }

    /// Decodes the puzzle section. Returns the type byte of puzzles that cannot be solved.
    pub fn decode_puzzle(&self) -> Result<Puzzle, u8> {
        match self.puzzle.first() {
            Some(&PUZZLE_TYPE_HASH) if self.puzzle.len() >= 6 => Ok(Puzzle {
                denominator: self.puzzle[1],
                magic: BigEndian::read_u32(&self.puzzle[2..6]),
            }),
            Some(&other) => Err(other),
            None => Err(0),
        }
    }
}

/// Second client message: proof of the password and the puzzle solution.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClientAuth {
    pub hmac: [u8; SHA1_SIZE],
    pub solution: [u8; SOLUTION_SIZE],
}

impl ClientAuth {
    pub const TRAILER_SIZE: usize = 8 + SOLUTION_SIZE;
    pub const SIZE: usize = SHA1_SIZE + Self::TRAILER_SIZE;

    /// Bytes following the HMAC, which are also covered by it.
    pub fn trailer(solution: &[u8; SOLUTION_SIZE]) -> [u8; Self::TRAILER_SIZE] {
        let mut trailer = [0u8; Self::TRAILER_SIZE];
        BigEndian::write_u16(&mut trailer[2..4], SOLUTION_SIZE as u16);
        trailer[8..].copy_from_slice(solution);
        trailer
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..SHA1_SIZE].copy_from_slice(&self.hmac);
        bytes[SHA1_SIZE..].copy_from_slice(&Self::trailer(&self.solution));
        bytes
    }

    pub fn read(mut stream: &[u8]) -> io::Result<ClientAuth> {
        let mut instance = ClientAuth {
            hmac: [0; SHA1_SIZE],
            solution: [0; SOLUTION_SIZE],
        };

        stream.read_exact(&mut instance.hmac)?;

        let mut fields = [0u8; 8];
        stream.read_exact(&mut fields)?;

        if BigEndian::read_u16(&fields[2..4]) as usize != SOLUTION_SIZE {
            return Err(invalid("Unexpected puzzle solution length"));
        }

        stream.read_exact(&mut instance.solution)?;

        Ok(instance)
    }
}

/// Final verdict of the access point.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AuthResponse {
    pub status: u8,
    pub payload: Vec<u8>,
}

impl AuthResponse {
    pub const HEADER_SIZE: usize = 2;

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        if self.payload.len() > u8::MAX as usize {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "Payload too long"));
        }

        let mut bytes = vec![self.status, self.payload.len() as u8];
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_hello() -> ClientHello {
        ClientHello {
            client_revision: 99999,
            client_id: [1, 2, 3, 4],
            random: [5; RANDOM_SIZE],
            dh_public: [6; DH_SIZE],
            rsa_modulus: [7; RSA_MODULUS_SIZE],
            username: "listener".to_string(),
        }
    }

    fn server_hello() -> ServerHello {
        ServerHello {
            status: 0,
            random: [1; RANDOM_SIZE],
            dh_public: [2; DH_SIZE],
            blob: [3; BLOB_SIZE],
            salt: [4; SALT_SIZE],
            padding: vec![0x30; 7],
            username: "Listener".to_string(),
            puzzle: ServerHello::encode_puzzle(&Puzzle {
                denominator: 8,
                magic: 0xcafe_babe,
            }),
        }
    }

    #[test]
    fn test_client_hello_layout() {
        let hello = client_hello();
        let bytes = hello.to_bytes().unwrap();

        assert_eq!(bytes.len(), hello.size());
        assert_eq!(&bytes[..2], &[0, 3]);

        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&bytes[..4]);
        assert_eq!(ClientHello::declared_len(&prefix), bytes.len());

        // Username sits right before the trailing marker
        assert_eq!(&bytes[bytes.len() - 9..bytes.len() - 1], b"listener");
        assert_eq!(bytes[bytes.len() - 1], 0x40);
        assert_eq!(&bytes[48..48 + DH_SIZE], &[6u8; DH_SIZE][..]);

        assert_eq!(ClientHello::read(&bytes).unwrap(), hello);
    }

    #[test]
    fn test_client_hello_username_too_long() {
        let mut hello = client_hello();
        hello.username = "x".repeat(256);

        assert_eq!(
            hello.to_bytes().err().unwrap().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_server_hello_parse() {
        let hello = server_hello();
        let bytes = hello.to_bytes().unwrap();

        assert_eq!(
            ServerHello::variable_len(&bytes[..ServerHello::FIXED_SIZE]),
            7 + 8 + 6
        );
        assert_eq!(bytes.len(), ServerHello::FIXED_SIZE + 21);

        let parsed = ServerHello::parse(&bytes).unwrap();

        assert_eq!(parsed, hello);
        assert_eq!(Rejection::from_status(parsed.status), None);
        assert_eq!(
            parsed.decode_puzzle(),
            Ok(Puzzle {
                denominator: 8,
                magic: 0xcafe_babe
            })
        );
    }

    #[test]
    fn test_server_hello_truncated() {
        let bytes = server_hello().to_bytes().unwrap();

        assert!(ServerHello::parse(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_unknown_puzzle() {
        let mut hello = server_hello();

        hello.puzzle = vec![0x02, 1, 0, 0, 0, 0];
        assert_eq!(hello.decode_puzzle(), Err(0x02));

        hello.puzzle.clear();
        assert_eq!(hello.decode_puzzle(), Err(0));
    }

    #[test]
    fn test_rejections() {
        assert_eq!(Rejection::from_status(0), None);
        assert_eq!(Rejection::from_status(0x0003), Some(Rejection::UserNotFound));
        assert_eq!(Rejection::from_status(0x0109), Some(Rejection::CountryMismatch));

        assert_eq!(Rejection::from(0x01), Rejection::UpgradeRequired);
        assert_eq!(Rejection::from(0x04), Rejection::Banned);
        assert_eq!(Rejection::from(0x06), Rejection::NeedsDetails);
        assert_eq!(Rejection::from(0x0b), Rejection::Other(0x0b));
        assert_eq!(Rejection::from(0x0b).status(), 0x0b);
    }

    #[test]
    fn test_client_auth_layout() {
        let auth = ClientAuth {
            hmac: [9; SHA1_SIZE],
            solution: [1, 2, 3, 4, 5, 6, 7, 8],
        };

        let bytes = auth.to_bytes();

        assert_eq!(
            &bytes[SHA1_SIZE..],
            &[0, 0, 0, 8, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8]
        );
        assert_eq!(ClientAuth::read(&bytes).unwrap(), auth);
    }

    #[test]
    fn test_auth_response() {
        let response = AuthResponse {
            status: 0,
            payload: vec![1, 2, 3],
        };

        assert_eq!(response.to_bytes().unwrap(), vec![0, 3, 1, 2, 3]);
        assert!(response.is_success());
    }
}
