//! Logical sub-streams multiplexed over the session's packets.
//!
//! Every channel bound packet starts with the two byte channel id. A channel first receives a header
//! section made of length prefixed records terminated by an empty record, then raw data chunks until
//! an empty chunk ends the stream. Channels that reach `End` or `Error` are unregistered right after
//! their handler saw the final event, so handlers never observe a channel past its terminal state.
use crate::net::shared::{ErrorType, NetworkError, NetworkResult};
use byteorder::{BigEndian, ByteOrder};
use flint::logging;
use indexmap::IndexSet;

pub type ChannelId = u16;

pub const CHANNEL_ID_SIZE: usize = 2;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelState {
    Header,
    Data,
    End,
    Error,
}

impl ChannelState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::End | ChannelState::Error)
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum ChannelEvent<'a> {
    /// A single header record.
    Header(&'a [u8]),
    /// A chunk of payload data.
    Data(&'a [u8]),
    End,
    Error,
}

/// Bookkeeping visible to handlers.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub state: ChannelState,
    pub header_bytes: usize,
    pub data_bytes: usize,
}

/// Receiver of a channel's events. Closures taking the same arguments implement it.
pub trait ChannelHandler: Send {
    fn handle(&mut self, info: &ChannelInfo, event: ChannelEvent);
}

impl<F> ChannelHandler for F
where
    F: FnMut(&ChannelInfo, ChannelEvent) + Send,
{
    #[inline]
    fn handle(&mut self, info: &ChannelInfo, event: ChannelEvent) {
        self(info, event)
    }
}

/// Outcome of routing a packet to a channel.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelStatus {
    /// No channel is registered under the id, the packet was dropped.
    Unknown,
    Open(ChannelState),
    /// The channel reached the state and was unregistered.
    Closed(ChannelState),
}

struct Channel {
    info: ChannelInfo,
    handler: Box<dyn ChannelHandler>,
}

impl Channel {
    #[inline]
    fn emit(&mut self, event: ChannelEvent) {
        self.handler.handle(&self.info, event)
    }

    /// Walks the header records of a packet. Returns the data following the header terminator, if
    /// the terminator was part of this packet.
    fn read_header<'a>(&mut self, mut body: &'a [u8]) -> Result<Option<&'a [u8]>, ()> {
        while !body.is_empty() {
            if body.len() < 2 {
                return Err(());
            }

            let len = BigEndian::read_u16(body) as usize;
            body = &body[2..];

            if len == 0 {
                self.info.state = ChannelState::Data;
                return Ok(Some(body));
            }

            if body.len() < len {
                return Err(());
            }

            self.info.header_bytes += len;
            self.emit(ChannelEvent::Header(&body[..len]));
            body = &body[len..];
        }

        Ok(None)
    }

    fn read_data(&mut self, body: &[u8]) {
        if body.is_empty() {
            self.info.state = ChannelState::End;
            self.emit(ChannelEvent::End);
        } else {
            self.info.data_bytes += body.len();
            self.emit(ChannelEvent::Data(body));
        }
    }

    fn fail(&mut self) {
        self.info.state = ChannelState::Error;
        self.emit(ChannelEvent::Error);
    }
}

/// The registered channels of a session.
pub struct ChannelSet {
    log: logging::Logger,
    slots: Vec<Option<Channel>>,
    live: IndexSet<ChannelId>,
    // Lowest id that may be free
    next_id: usize,
    max_channels: usize,
}

impl ChannelSet {
    pub fn new(max_channels: usize, log: &logging::Logger) -> ChannelSet {
        ChannelSet {
            log: log.new(logging::o!("component" => "channels")),
            slots: Vec::new(),
            live: IndexSet::new(),
            next_id: 0,
            max_channels,
        }
    }

    /// Number of open channels.
    #[inline]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.live.len() >= self.max_channels
    }

    #[inline]
    pub fn contains(&self, id: ChannelId) -> bool {
        self.live.contains(&id)
    }

    /// Snapshot of a channel's bookkeeping.
    pub fn info(&self, id: ChannelId) -> Option<&ChannelInfo> {
        self.slot(id).map(|channel| &channel.info)
    }

    /// Registers a channel under the lowest free id.
    pub fn register<H: ChannelHandler + 'static>(&mut self, name: &str, handler: H) -> NetworkResult<ChannelId> {
        if self.is_full() {
            return Err(NetworkError::Fatal(ErrorType::ChannelLimit));
        }

        let index = (self.next_id..)
            .find(|&index| self.slots.get(index).map_or(true, Option::is_none))
            .unwrap_or(self.slots.len());

        if index > ChannelId::MAX as usize {
            return Err(NetworkError::Fatal(ErrorType::ChannelLimit));
        }

        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }

        let id = index as ChannelId;

        self.slots[index] = Some(Channel {
            info: ChannelInfo {
                id,
                name: name.to_string(),
                state: ChannelState::Header,
                header_bytes: 0,
                data_bytes: 0,
            },
            handler: Box::new(handler),
        });

        self.live.insert(id);
        self.next_id = index + 1;

        logging::trace!(self.log, "channel registered"; "id" => id, "name" => name);
        Ok(id)
    }

    /// Drops a channel without notifying its handler.
    pub fn unregister(&mut self, id: ChannelId) -> Option<ChannelInfo> {
        let channel = self.slots.get_mut(id as usize)?.take()?;

        self.live.shift_remove(&id);
        self.next_id = self.next_id.min(id as usize);

        // Release trailing slots so the storage tracks the highest live id
        while let Some(None) = self.slots.last() {
            self.slots.pop();
        }

        logging::trace!(
            self.log,
            "channel unregistered";
            "id" => id,
            "name" => &channel.info.name,
            "state" => ?channel.info.state,
            "header_bytes" => channel.info.header_bytes,
            "data_bytes" => channel.info.data_bytes
        );

        Some(channel.info)
    }

    /// Routes a channel bound packet payload. `error` forces the channel into its error state.
    pub fn process(&mut self, payload: &[u8], error: bool) -> ChannelStatus {
        if payload.len() < CHANNEL_ID_SIZE {
            logging::debug!(self.log, "channel packet too short"; "len" => payload.len());
            return ChannelStatus::Unknown;
        }

        let id = BigEndian::read_u16(payload);
        let body = &payload[CHANNEL_ID_SIZE..];

        // Borrow the slot directly, the logger is still needed below
        let channel = match self.slots.get_mut(id as usize).and_then(Option::as_mut) {
            Some(channel) => channel,
            None => {
                logging::debug!(self.log, "packet for unknown channel dropped"; "id" => id, "len" => body.len());
                return ChannelStatus::Unknown;
            }
        };

        if error {
            channel.fail();
        } else {
            match channel.info.state {
                ChannelState::Header => match channel.read_header(body) {
                    Ok(Some(rest)) if !rest.is_empty() => channel.read_data(rest),
                    Ok(_) => (),
                    Err(()) => {
                        logging::warn!(self.log, "malformed channel header"; "id" => id);
                        channel.fail();
                    }
                },
                ChannelState::Data => channel.read_data(body),
                ChannelState::End | ChannelState::Error => (),
            }
        }

        self.settle(id)
    }

    /// Delivers a complete reply received outside the channel framing: one data event, then the end.
    pub fn deliver(&mut self, id: ChannelId, data: &[u8]) -> ChannelStatus {
        let channel = match self.slot_mut(id) {
            Some(channel) => channel,
            None => return ChannelStatus::Unknown,
        };

        channel.info.state = ChannelState::Data;
        channel.read_data(data);

        if !data.is_empty() {
            channel.read_data(&[]);
        }

        self.settle(id)
    }

    /// Drives a single channel into its error state.
    pub fn fail(&mut self, id: ChannelId) -> ChannelStatus {
        match self.slot_mut(id) {
            Some(channel) => channel.fail(),
            None => return ChannelStatus::Unknown,
        }

        self.settle(id)
    }

    /// Drives every open channel into its error state. Returns the number of channels failed.
    pub fn fail_all(&mut self) -> usize {
        let ids: Vec<_> = self.live.iter().copied().collect();

        for &id in ids.iter() {
            self.fail(id);
        }

        if !ids.is_empty() {
            logging::debug!(self.log, "all channels failed"; "count" => ids.len());
        }

        ids.len()
    }

    /// Unregisters the channel if it reached a terminal state.
    fn settle(&mut self, id: ChannelId) -> ChannelStatus {
        let state = match self.slot(id) {
            Some(channel) => channel.info.state,
            None => return ChannelStatus::Unknown,
        };

        match state.is_terminal() {
            true => {
                self.unregister(id);
                ChannelStatus::Closed(state)
            }
            _ => ChannelStatus::Open(state),
        }
    }

    #[inline]
    fn slot(&self, id: ChannelId) -> Option<&Channel> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    #[inline]
    fn slot_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.slots.get_mut(id as usize).and_then(Option::as_mut)
    }
}

/// Encodes a header section, used to script channel traffic.
pub fn encode_header(records: &[&[u8]]) -> Vec<u8> {
    let mut section = Vec::new();

    for record in records {
        section.extend_from_slice(&(record.len() as u16).to_be_bytes());
        section.extend_from_slice(record);
    }

    section.extend_from_slice(&[0, 0]);
    section
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Clone, Eq, PartialEq)]
    enum Seen {
        Header(Vec<u8>),
        Data(Vec<u8>),
        End,
        Error,
    }

    type Journal = Arc<Mutex<Vec<(ChannelId, ChannelState, Seen)>>>;

    fn recorder(journal: &Journal) -> impl FnMut(&ChannelInfo, ChannelEvent) + Send + 'static {
        let journal = journal.clone();

        move |info: &ChannelInfo, event: ChannelEvent| {
            let seen = match event {
                ChannelEvent::Header(data) => Seen::Header(data.to_vec()),
                ChannelEvent::Data(data) => Seen::Data(data.to_vec()),
                ChannelEvent::End => Seen::End,
                ChannelEvent::Error => Seen::Error,
            };

            journal.lock().push((info.id, info.state, seen));
        }
    }

    fn packet(id: ChannelId, body: &[u8]) -> Vec<u8> {
        let mut packet = id.to_be_bytes().to_vec();
        packet.extend_from_slice(body);
        packet
    }

    fn noop(_: &ChannelInfo, _: ChannelEvent) {}

    fn channels(max: usize) -> ChannelSet {
        ChannelSet::new(max, &logging::discard())
    }

    #[test]
    fn test_full_lifecycle() {
        let journal = Journal::default();
        let mut set = channels(16);

        let id = set.register("browse", recorder(&journal)).unwrap();

        // Header record, then the terminator in its own packet
        assert_eq!(
            set.process(&packet(id, &[0, 3, b'a', b'b', b'c']), false),
            ChannelStatus::Open(ChannelState::Header)
        );
        assert_eq!(
            set.process(&packet(id, &[0, 0]), false),
            ChannelStatus::Open(ChannelState::Data)
        );
        assert_eq!(
            set.process(&packet(id, b"payload"), false),
            ChannelStatus::Open(ChannelState::Data)
        );
        assert_eq!(
            set.process(&packet(id, &[]), false),
            ChannelStatus::Closed(ChannelState::End)
        );

        assert_eq!(
            *journal.lock(),
            vec![
                (id, ChannelState::Header, Seen::Header(b"abc".to_vec())),
                (id, ChannelState::Data, Seen::Data(b"payload".to_vec())),
                (id, ChannelState::End, Seen::End),
            ]
        );

        assert!(set.is_empty());
        assert!(!set.contains(id));
    }

    #[test]
    fn test_no_event_after_end() {
        let journal = Journal::default();
        let mut set = channels(16);

        let id = set.register("image", recorder(&journal)).unwrap();

        set.process(&packet(id, &encode_header(&[])), false);
        set.process(&packet(id, &[]), false);

        assert_eq!(set.process(&packet(id, b"late"), false), ChannelStatus::Unknown);
        assert_eq!(set.process(&packet(id, &[]), true), ChannelStatus::Unknown);
        assert_eq!(journal.lock().len(), 1);
    }

    #[test]
    fn test_header_and_data_in_one_packet() {
        let journal = Journal::default();
        let mut set = channels(16);

        let id = set.register("search", recorder(&journal)).unwrap();

        let mut body = encode_header(&[b"first", b"second"]);
        body.extend_from_slice(b"data");

        set.process(&packet(id, &body), false);

        let info = set.info(id).unwrap().clone();

        assert_eq!(info.state, ChannelState::Data);
        assert_eq!(info.header_bytes, 11);
        assert_eq!(info.data_bytes, 4);
        assert_eq!(
            journal
                .lock()
                .iter()
                .map(|(_, _, seen)| seen.clone())
                .collect::<Vec<_>>(),
            vec![
                Seen::Header(b"first".to_vec()),
                Seen::Header(b"second".to_vec()),
                Seen::Data(b"data".to_vec()),
            ]
        );
    }

    #[test]
    fn test_malformed_header() {
        let journal = Journal::default();
        let mut set = channels(16);

        let id = set.register("toplist", recorder(&journal)).unwrap();

        // Record claims 9 bytes, only 2 follow
        assert_eq!(
            set.process(&packet(id, &[0, 9, 1, 2]), false),
            ChannelStatus::Closed(ChannelState::Error)
        );
        assert_eq!(
            journal.lock().last().unwrap(),
            &(id, ChannelState::Error, Seen::Error)
        );
    }

    #[test]
    fn test_error_flag() {
        let journal = Journal::default();
        let mut set = channels(16);

        let id = set.register("playlist", recorder(&journal)).unwrap();

        assert_eq!(
            set.process(&packet(id, &[0, 1]), true),
            ChannelStatus::Closed(ChannelState::Error)
        );
        assert_eq!(*journal.lock(), vec![(id, ChannelState::Error, Seen::Error)]);
    }

    #[test]
    fn test_unknown_channel() {
        let mut set = channels(16);

        assert_eq!(set.process(&packet(7, b"stray"), false), ChannelStatus::Unknown);
        assert_eq!(set.process(&[1], false), ChannelStatus::Unknown);
    }

    #[test]
    fn test_deliver() {
        let journal = Journal::default();
        let mut set = channels(16);

        let id = set.register("aes key", recorder(&journal)).unwrap();

        assert_eq!(set.deliver(id, &[7; 16]), ChannelStatus::Closed(ChannelState::End));
        assert_eq!(
            *journal.lock(),
            vec![
                (id, ChannelState::Data, Seen::Data(vec![7; 16])),
                (id, ChannelState::End, Seen::End),
            ]
        );
    }

    #[test]
    fn test_lowest_free_id() {
        let mut set = channels(16);

        let ids: Vec<_> = (0..4).map(|_| set.register("c", noop).unwrap()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        set.unregister(2);
        set.unregister(1);

        assert_eq!(set.register("c", noop).unwrap(), 1);
        assert_eq!(set.register("c", noop).unwrap(), 2);
        assert_eq!(set.register("c", noop).unwrap(), 4);
    }

    #[test]
    fn test_channel_limit() {
        let mut set = channels(2);

        set.register("a", noop).unwrap();
        set.register("b", noop).unwrap();

        assert!(set.is_full());
        assert_eq!(
            set.register("c", noop).err().unwrap(),
            NetworkError::Fatal(ErrorType::ChannelLimit)
        );
    }

    #[test]
    fn test_ids_unique_among_live() {
        let mut rng = rand::thread_rng();
        let mut set = channels(64);
        let mut live = HashSet::new();

        for _ in 0..5000 {
            if !live.is_empty() && (set.is_full() || rng.gen_bool(0.45)) {
                let victim = *live.iter().nth(rng.gen_range(0..live.len())).unwrap();
                assert!(set.unregister(victim).is_some());
                live.remove(&victim);
            } else {
                let id = set.register("prop", noop).unwrap();

                assert!(live.insert(id), "Id {} handed out twice", id);

                // The allocator always picks the lowest free id
                assert!((0..id).all(|lower| live.contains(&lower)));
            }

            assert_eq!(set.len(), live.len());
        }
    }

    #[test]
    fn test_fail_all() {
        let journal = Journal::default();
        let mut set = channels(16);

        let first = set.register("one", recorder(&journal)).unwrap();
        let second = set.register("two", recorder(&journal)).unwrap();
        let third = set.register("three", recorder(&journal)).unwrap();

        // One of them already streams data
        set.process(&packet(second, &encode_header(&[b"h"])), false);
        journal.lock().clear();

        assert_eq!(set.fail_all(), 3);
        assert!(set.is_empty());

        assert_eq!(
            *journal.lock(),
            vec![
                (first, ChannelState::Error, Seen::Error),
                (second, ChannelState::Error, Seen::Error),
                (third, ChannelState::Error, Seen::Error),
            ]
        );

        assert_eq!(set.fail_all(), 0);
    }
}
