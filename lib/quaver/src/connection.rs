//! An authenticated connection: the link, both cipher directions and the open channels.
use crate::channel::ChannelSet;
use crate::command::Command;
use crate::config::SessionConfig;
use crate::login::LoginOutcome;
use crate::net::buffer::Buffer;
use crate::net::packet::{Packet, PacketCodec, MAX_PACKET_SIZE};
use crate::net::shared::{ErrorUtils, NetworkError, NetworkResult};
use crate::net::stream::Link;
use flint::choose;
use flint::logging;
use std::mem;
use std::time::{Duration, Instant};

const READ_BUFFER_SIZE: usize = 4 * MAX_PACKET_SIZE;
const WRITE_BUFFER_SIZE: usize = 4 * MAX_PACKET_SIZE;

pub struct Connection {
    log: logging::Logger,
    link: Link,
    codec: PacketCodec,
    read_buffer: Buffer,
    write_buffer: Buffer,
    channels: ChannelSet,
    username: String,
    write_timeout: Duration,
    // The last read stopped on a full buffer, more data is waiting on the socket
    backlog: bool,
}

impl Connection {
    pub fn new(outcome: LoginOutcome, config: &SessionConfig, log: &logging::Logger) -> Connection {
        let log = log.new(logging::o!("peer" => outcome.link.peer().to_string()));

        logging::info!(log, "connection established");

        Connection {
            channels: ChannelSet::new(config.max_channels, &log),
            log,
            codec: PacketCodec::new(&outcome.send_key, &outcome.recv_key),
            link: outcome.link,
            read_buffer: Buffer::new(READ_BUFFER_SIZE),
            write_buffer: Buffer::new(WRITE_BUFFER_SIZE),
            username: outcome.username,
            write_timeout: config.handshake_timeout(),
            backlog: false,
        }
    }

    /// Canonical username the server assigned during login.
    #[inline]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[inline]
    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    #[inline]
    pub fn channels_mut(&mut self) -> &mut ChannelSet {
        &mut self.channels
    }

    /// Encrypts a packet and pushes it out, waiting for the socket to drain up to the write timeout.
    pub fn send(&mut self, cmd: Command, payload: &[u8]) -> NetworkResult<()> {
        let deadline = Instant::now() + self.write_timeout;

        match self.codec.encode(cmd.into(), payload, &mut self.write_buffer) {
            Ok(()) => (),
            Err(NetworkError::Wait) => {
                // Make room, then try once more
                self.link.flush(&mut self.write_buffer, deadline)?;
                self.codec.encode(cmd.into(), payload, &mut self.write_buffer)?;
            }
            Err(err) => return Err(err),
        }

        logging::trace!(self.log, "packet sent"; "cmd" => ?cmd, "len" => payload.len(), "iv" => self.codec.send_iv());

        self.link.flush(&mut self.write_buffer, deadline)
    }

    /// Waits up to `timeout` for the socket, then decodes every complete packet into `packets`.
    /// Packets that arrived ahead of a link failure are still decoded before the failure is returned.
    /// A read that fills the buffer leaves the rest on the socket for the next call, which then
    /// skips the wait.
    pub fn receive(&mut self, timeout: Duration, packets: &mut Vec<Packet>) -> NetworkResult<()> {
        if !mem::take(&mut self.backlog) {
            self.link.wait(timeout)?;
        }

        let ingress = self.link.ingress(&mut self.read_buffer);
        self.backlog = self.read_buffer.is_full();

        loop {
            match self.codec.decode(&mut self.read_buffer) {
                Ok(packet) => {
                    logging::trace!(self.log, "packet received"; "cmd" => packet.cmd, "len" => packet.payload.len());
                    packets.push(packet);
                }
                Err(NetworkError::Wait) => break,
                Err(err) => return Err(err),
            }
        }

        choose!(ingress.has_failed() => ingress.map(|_| ()), Ok(()))
    }

    /// Fails every open channel and closes the link. Returns the number of channels failed.
    pub fn close(&mut self) -> usize {
        let failed = self.channels.fail_all();
        self.link.shutdown();

        logging::info!(self.log, "connection closed"; "channels_failed" => failed);
        failed
    }
}
