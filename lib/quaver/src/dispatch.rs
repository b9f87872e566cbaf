//! Routes incoming packets by command: channel traffic to the channel set, session level commands
//! to their handlers. Unknown commands are dropped.
use crate::command::{Command, AES_KEY_SIZE, CACHE_HASH_SIZE};
use crate::connection::Connection;
use crate::net::packet::Packet;
use crate::net::shared::NetworkResult;
use crate::request::{RequestInput, RequestQueue};
use crate::session::SharedInfo;
use byteorder::{BigEndian, ByteOrder};
use flint::logging;
use flint::time;

pub const SECRET_BLOCK_SIZE: usize = 336;

// Two byte prefix, then the channel id
const KEY_REPLY_HEADER_SIZE: usize = 4;

pub struct Dispatcher {
    log: logging::Logger,
    queue: RequestQueue,
    info: SharedInfo,
    cache_hash: [u8; CACHE_HASH_SIZE],
}

impl Dispatcher {
    pub fn new(queue: RequestQueue, info: SharedInfo, cache_hash: [u8; CACHE_HASH_SIZE], log: &logging::Logger) -> Dispatcher {
        Dispatcher {
            log: log.new(logging::o!("component" => "dispatch")),
            queue,
            info,
            cache_hash,
        }
    }

    /// Handles a single packet. Only failures to send a reply are returned.
    pub fn dispatch(&mut self, conn: &mut Connection, packet: &Packet) -> NetworkResult<()> {
        let cmd = match Command::try_from(packet.cmd) {
            Ok(cmd) => cmd,
            Err(raw) => {
                logging::debug!(self.log, "unknown command ignored"; "cmd" => raw, "len" => packet.payload.len());
                return Ok(());
            }
        };

        let payload = &packet.payload[..];

        match cmd {
            Command::ChannelData => {
                conn.channels_mut().process(payload, false);
            }
            Command::ChannelError | Command::ChannelAbort => {
                conn.channels_mut().process(payload, true);
            }
            Command::AesKey => self.handle_aes_key(conn, payload),
            Command::AesKeyError => self.handle_aes_key_error(conn, payload),
            Command::SecretBlock => return self.handle_secret_block(conn, payload),
            Command::Ping => return self.handle_ping(conn, payload),
            Command::CountryCode => self.handle_country(payload),
            Command::Welcome => self.handle_welcome(),
            _ => {
                logging::debug!(self.log, "command ignored"; "cmd" => ?cmd, "len" => payload.len());
            }
        }

        Ok(())
    }

    fn handle_aes_key(&mut self, conn: &mut Connection, payload: &[u8]) {
        if payload.len() < KEY_REPLY_HEADER_SIZE + AES_KEY_SIZE {
            logging::warn!(self.log, "short aes key reply"; "len" => payload.len());
            return;
        }

        let channel = BigEndian::read_u16(&payload[2..]);
        let key = &payload[KEY_REPLY_HEADER_SIZE..KEY_REPLY_HEADER_SIZE + AES_KEY_SIZE];

        conn.channels_mut().deliver(channel, key);
    }

    fn handle_aes_key_error(&mut self, conn: &mut Connection, payload: &[u8]) {
        if payload.len() < KEY_REPLY_HEADER_SIZE {
            logging::warn!(self.log, "short aes key error"; "len" => payload.len());
            return;
        }

        let channel = BigEndian::read_u16(&payload[2..]);
        logging::info!(self.log, "aes key refused"; "channel" => channel);

        conn.channels_mut().fail(channel);
    }

    fn handle_secret_block(&mut self, conn: &mut Connection, payload: &[u8]) -> NetworkResult<()> {
        if payload.len() != SECRET_BLOCK_SIZE {
            logging::warn!(self.log, "unexpected secret block size"; "len" => payload.len());
        }

        conn.cache_hash(&self.cache_hash)
    }

    fn handle_ping(&mut self, conn: &mut Connection, payload: &[u8]) -> NetworkResult<()> {
        if payload.len() >= 4 {
            let remote = BigEndian::read_u32(payload) as u64;
            logging::debug!(self.log, "ping"; "timestamp" => remote, "skew" => time::skew_secs(remote));
        }

        conn.pong()
    }

    fn handle_country(&mut self, payload: &[u8]) {
        let country = String::from_utf8_lossy(payload).into_owned();
        logging::info!(self.log, "country received"; "country" => &country);

        self.info.lock().country = Some(country);
    }

    fn handle_welcome(&mut self) {
        logging::info!(self.log, "welcome received");

        self.queue.post_internal(RequestInput::DisplayName);
        self.queue.post_internal(RequestInput::PlaylistContainer);
    }
}
