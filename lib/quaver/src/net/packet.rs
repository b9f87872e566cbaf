//! Framing and encryption of the packets exchanged once the login handshake completed.
//!
//! Every packet is `[cmd][u16 length][payload][mac]`. Header and payload are encrypted with the
//! direction's Shannon context re-synchronised on the packet's sequence number, the trailing four
//! bytes are the cipher's MAC.
use crate::net::buffer::Buffer;
use crate::net::shared::{ErrorType, NetworkError, NetworkResult};
use byteorder::{BigEndian, ByteOrder};
use flint::crypto::shannon::Shannon;

pub const HEADER_SIZE: usize = 3;
pub const MAC_SIZE: usize = 4;
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + MAC_SIZE;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PacketHeader {
    pub cmd: u8,
    pub len: u16,
}

impl PacketHeader {
    #[inline]
    pub fn read(raw: &[u8; HEADER_SIZE]) -> PacketHeader {
        PacketHeader {
            cmd: raw[0],
            len: BigEndian::read_u16(&raw[1..]),
        }
    }

    #[inline]
    pub fn write(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [self.cmd, 0, 0];
        BigEndian::write_u16(&mut raw[1..], self.len);
        raw
    }

    /// Size of the whole packet on the wire.
    #[inline]
    pub fn packet_size(&self) -> usize {
        HEADER_SIZE + self.len as usize + MAC_SIZE
    }
}

/// A decrypted and authenticated packet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Packet {
    pub cmd: u8,
    pub payload: Vec<u8>,
}

/// Packet level cipher state for both directions of a session.
pub struct PacketCodec {
    send_cipher: Shannon,
    recv_cipher: Shannon,
    // Sequence numbers are 32 bits on the wire, the extra room flags exhaustion
    send_iv: u64,
    recv_iv: u64,
    // Header of the packet being received, already decrypted
    pending: Option<PacketHeader>,
}

impl PacketCodec {
    pub fn new(send_key: &[u8], recv_key: &[u8]) -> PacketCodec {
        PacketCodec {
            send_cipher: Shannon::new(send_key),
            recv_cipher: Shannon::new(recv_key),
            send_iv: 0,
            recv_iv: 0,
            pending: None,
        }
    }

    /// Number of packets sent so far.
    #[inline]
    pub fn send_iv(&self) -> u64 {
        self.send_iv
    }

    /// Number of packets received so far.
    #[inline]
    pub fn recv_iv(&self) -> u64 {
        self.recv_iv
    }

    /// Encrypts the packet into the supplied buffer. The buffer is left untouched on error.
    pub fn encode(&mut self, cmd: u8, payload: &[u8], out: &mut Buffer) -> NetworkResult<()> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }

        let header = PacketHeader {
            cmd,
            len: payload.len() as u16,
        };

        if header.packet_size() > out.free_capacity() {
            return Err(NetworkError::Wait);
        }

        let sequence = Self::sequence(self.send_iv)?;

        let mut frame = Vec::with_capacity(header.packet_size());
        frame.extend_from_slice(&header.write());
        frame.extend_from_slice(payload);

        self.send_cipher.nonce_u32(sequence);
        self.send_cipher.encrypt(&mut frame);

        let mut mac = [0u8; MAC_SIZE];
        self.send_cipher.finish(&mut mac);
        frame.extend_from_slice(&mac);

        out.extend(&frame);
        self.send_iv += 1;

        Ok(())
    }

    /// Decodes the next packet off the buffer. Returns `Wait` until the whole packet is buffered; a
    /// header decrypted by an earlier call is remembered so it is never decrypted twice.
    pub fn decode(&mut self, buffer: &mut Buffer) -> NetworkResult<Packet> {
        let header = match self.pending {
            Some(header) => header,
            None => {
                if buffer.len() < HEADER_SIZE {
                    return Err(NetworkError::Wait);
                }

                let sequence = Self::sequence(self.recv_iv)?;

                let mut raw = [0u8; HEADER_SIZE];
                raw.copy_from_slice(&buffer.read_slice()[..HEADER_SIZE]);

                self.recv_cipher.nonce_u32(sequence);
                self.recv_cipher.decrypt(&mut raw);

                let header = PacketHeader::read(&raw);
                self.pending = Some(header);
                header
            }
        };

        let total = header.packet_size();

        if buffer.len() < total {
            return Err(NetworkError::Wait);
        }

        let payload_end = HEADER_SIZE + header.len as usize;
        let data = buffer.read_slice();

        let mut payload = data[HEADER_SIZE..payload_end].to_vec();
        self.recv_cipher.decrypt(&mut payload);

        if !self.recv_cipher.verify(&data[payload_end..total]) {
            return Err(NetworkError::Fatal(ErrorType::Crypto));
        }

        buffer.move_head(total);
        self.pending = None;
        self.recv_iv += 1;

        Ok(Packet {
            cmd: header.cmd,
            payload,
        })
    }

    #[inline]
    fn sequence(iv: u64) -> NetworkResult<u32> {
        match iv > u32::MAX as u64 {
            true => Err(NetworkError::Fatal(ErrorType::SequenceExhausted)),
            _ => Ok(iv as u32),
        }
    }
}
