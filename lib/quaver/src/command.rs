//! Command ids and the bodies of every request the client sends.
//!
//! Channel bound requests register their channel first and put the id at the front of the body. When
//! the body cannot be built or the packet cannot be queued, the channel is dropped again without its
//! handler ever hearing about it.
use crate::channel::{ChannelHandler, ChannelId};
use crate::connection::Connection;
use crate::net::shared::{ErrorType, NetworkError, NetworkResult};
use byteorder::{BigEndian, WriteBytesExt};
use std::io;
use std::io::Write;

/// Size of a track, album or artist id.
pub const ID_SIZE: usize = 16;
/// Playlist ids carry a trailing type byte.
pub const PLAYLIST_ID_SIZE: usize = 17;
/// Size of a file id, also used for image ids.
pub const FILE_ID_SIZE: usize = 20;
pub const CACHE_HASH_SIZE: usize = 20;
pub const AES_KEY_SIZE: usize = 16;

/// Revision requesting the latest version of a playlist.
pub const LATEST_REVISION: u32 = 0xffff_ffff;

const MAX_SHORT_STRING: usize = u8::MAX as usize;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Command {
    SecretBlock = 0x02,
    Ping = 0x04,
    GetSubstream = 0x08,
    ChannelData = 0x09,
    ChannelError = 0x0a,
    ChannelAbort = 0x0b,
    RequestKey = 0x0c,
    AesKey = 0x0d,
    AesKeyError = 0x0e,
    CacheHash = 0x0f,
    ShaHash = 0x10,
    Image = 0x19,
    CountryCode = 0x1b,
    P2pSetup = 0x20,
    P2pInitBlock = 0x21,
    Browse = 0x30,
    Search = 0x31,
    GetPlaylist = 0x35,
    ChangePlaylist = 0x36,
    Toplist = 0x38,
    Notify = 0x42,
    Log = 0x48,
    Pong = 0x49,
    PongAck = 0x4a,
    Pause = 0x4b,
    RequestAd = 0x4e,
    TokenNotify = 0x4f,
    ProductInfo = 0x50,
    UserInfo = 0x57,
    Welcome = 0x69,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x02 => Command::SecretBlock,
            0x04 => Command::Ping,
            0x08 => Command::GetSubstream,
            0x09 => Command::ChannelData,
            0x0a => Command::ChannelError,
            0x0b => Command::ChannelAbort,
            0x0c => Command::RequestKey,
            0x0d => Command::AesKey,
            0x0e => Command::AesKeyError,
            0x0f => Command::CacheHash,
            0x10 => Command::ShaHash,
            0x19 => Command::Image,
            0x1b => Command::CountryCode,
            0x20 => Command::P2pSetup,
            0x21 => Command::P2pInitBlock,
            0x30 => Command::Browse,
            0x31 => Command::Search,
            0x35 => Command::GetPlaylist,
            0x36 => Command::ChangePlaylist,
            0x38 => Command::Toplist,
            0x42 => Command::Notify,
            0x48 => Command::Log,
            0x49 => Command::Pong,
            0x4a => Command::PongAck,
            0x4b => Command::Pause,
            0x4e => Command::RequestAd,
            0x4f => Command::TokenNotify,
            0x50 => Command::ProductInfo,
            0x57 => Command::UserInfo,
            0x69 => Command::Welcome,
            other => return Err(other),
        })
    }
}

impl From<Command> for u8 {
    #[inline]
    fn from(cmd: Command) -> u8 {
        cmd as u8
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum BrowseKind {
    Artist = 1,
    Album = 2,
    Track = 3,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum ToplistKind {
    Artists = 0,
    Albums = 1,
    Tracks = 2,
}

fn invalid(reason: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, reason)
}

fn write_short_string(body: &mut Vec<u8>, text: &str) -> io::Result<()> {
    if text.len() > MAX_SHORT_STRING {
        return Err(invalid("string longer than 255 bytes"));
    }

    body.write_u8(text.len() as u8)?;
    body.write_all(text.as_bytes())
}

pub fn search_body(channel: ChannelId, query: &str, offset: u32, limit: u32) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(13 + query.len());
    body.write_u16::<BigEndian>(channel)?;
    body.write_u32::<BigEndian>(offset)?;
    body.write_u32::<BigEndian>(limit)?;
    body.write_u16::<BigEndian>(0)?;
    write_short_string(&mut body, query)?;
    Ok(body)
}

pub fn toplist_body(channel: ChannelId, kind: ToplistKind, region: &str, username: &str) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    body.write_u16::<BigEndian>(channel)?;
    body.write_u16::<BigEndian>(0)?;
    body.write_u8(kind as u8)?;
    write_short_string(&mut body, region)?;
    write_short_string(&mut body, username)?;
    Ok(body)
}

/// Artists and albums are browsed one at a time, tracks in batches.
pub fn browse_body(channel: ChannelId, kind: BrowseKind, ids: &[[u8; ID_SIZE]]) -> io::Result<Vec<u8>> {
    match (kind, ids.len()) {
        (_, 0) => return Err(invalid("nothing to browse")),
        (BrowseKind::Artist, 1) | (BrowseKind::Album, 1) | (BrowseKind::Track, _) => (),
        _ => return Err(invalid("artists and albums are browsed one at a time")),
    }

    let mut body = Vec::with_capacity(3 + ids.len() * ID_SIZE + 4);
    body.write_u16::<BigEndian>(channel)?;
    body.write_u8(kind as u8)?;

    for id in ids {
        body.write_all(id)?;
    }

    if kind != BrowseKind::Track {
        body.write_u32::<BigEndian>(0)?;
    }

    Ok(body)
}

/// The container listing the user's playlists is fetched under the all zero id.
pub fn playlist_body(channel: ChannelId, id: &[u8; PLAYLIST_ID_SIZE], revision: u32) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(2 + PLAYLIST_ID_SIZE + 13);
    body.write_u16::<BigEndian>(channel)?;
    body.write_all(id)?;
    body.write_u32::<BigEndian>(revision)?;
    body.write_u32::<BigEndian>(0)?;
    body.write_u32::<BigEndian>(0xffff_ffff)?;
    body.write_u8(1)?;
    Ok(body)
}

/// Parameters of a playlist change.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PlaylistChange {
    pub id: [u8; PLAYLIST_ID_SIZE],
    pub revision: u32,
    pub track_count: u32,
    pub checksum: u32,
    pub collaborative: bool,
    /// Change document, sent verbatim.
    pub xml: String,
}

pub fn change_playlist_body(channel: ChannelId, change: &PlaylistChange) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(2 + PLAYLIST_ID_SIZE + 14 + change.xml.len());
    body.write_u16::<BigEndian>(channel)?;
    body.write_all(&change.id)?;
    body.write_u32::<BigEndian>(change.revision)?;
    body.write_u32::<BigEndian>(change.track_count)?;
    body.write_u32::<BigEndian>(change.checksum)?;
    body.write_u8(change.collaborative as u8)?;
    body.write_u8(3)?;
    body.write_all(change.xml.as_bytes())?;
    Ok(body)
}

pub fn image_body(channel: ChannelId, id: &[u8; FILE_ID_SIZE]) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(2 + FILE_ID_SIZE);
    body.write_u16::<BigEndian>(channel)?;
    body.write_all(id)?;
    Ok(body)
}

/// The key request carries the channel id at the end, the reply echoes it after a two byte prefix.
pub fn aes_key_body(channel: ChannelId, file_id: &[u8; FILE_ID_SIZE], track_id: &[u8; ID_SIZE]) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(FILE_ID_SIZE + ID_SIZE + 4);
    body.write_all(file_id)?;
    body.write_all(track_id)?;
    body.write_u16::<BigEndian>(0)?;
    body.write_u16::<BigEndian>(channel)?;
    Ok(body)
}

/// Offsets and lengths are in bytes and go out as 32 bit word counts.
pub fn substream_body(channel: ChannelId, file_id: &[u8; FILE_ID_SIZE], offset: u32, length: u32) -> io::Result<Vec<u8>> {
    let end = offset.checked_add(length).ok_or_else(|| invalid("substream range overflows"))?;

    let mut body = Vec::with_capacity(18 + FILE_ID_SIZE + 8);
    body.write_u16::<BigEndian>(channel)?;
    body.write_u16::<BigEndian>(0x0800)?;
    body.write_u16::<BigEndian>(0)?;
    body.write_u16::<BigEndian>(0)?;
    body.write_u16::<BigEndian>(0)?;
    body.write_u16::<BigEndian>(0x4e20)?;
    body.write_u32::<BigEndian>(200_000)?;
    body.write_all(file_id)?;
    body.write_u32::<BigEndian>(offset / 4)?;
    body.write_u32::<BigEndian>(end / 4)?;
    Ok(body)
}

pub fn user_info_body(channel: ChannelId, username: &str) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(3 + username.len());
    body.write_u16::<BigEndian>(channel)?;
    write_short_string(&mut body, username)?;
    Ok(body)
}

pub fn ad_body(channel: ChannelId, kind: u8) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(3);
    body.write_u16::<BigEndian>(channel)?;
    body.write_u8(kind)?;
    Ok(body)
}

impl Connection {
    /// Registers a channel, builds the body around its id and sends it.
    fn channel_request<H, F>(&mut self, cmd: Command, name: &str, handler: H, body: F) -> NetworkResult<ChannelId>
    where
        H: ChannelHandler + 'static,
        F: FnOnce(ChannelId) -> io::Result<Vec<u8>>,
    {
        let id = self.channels_mut().register(name, handler)?;

        let payload = match body(id) {
            Ok(payload) => payload,
            Err(_) => {
                self.channels_mut().unregister(id);
                return Err(NetworkError::Fatal(ErrorType::Encoding));
            }
        };

        if let Err(err) = self.send(cmd, &payload) {
            self.channels_mut().unregister(id);
            return Err(err);
        }

        Ok(id)
    }

    pub fn search<H>(&mut self, query: &str, offset: u32, limit: u32, handler: H) -> NetworkResult<ChannelId>
    where
        H: ChannelHandler + 'static,
    {
        self.channel_request(Command::Search, "search", handler, |id| search_body(id, query, offset, limit))
    }

    pub fn toplist<H>(&mut self, kind: ToplistKind, region: &str, username: &str, handler: H) -> NetworkResult<ChannelId>
    where
        H: ChannelHandler + 'static,
    {
        self.channel_request(Command::Toplist, "toplist", handler, |id| {
            toplist_body(id, kind, region, username)
        })
    }

    pub fn browse<H>(&mut self, kind: BrowseKind, ids: &[[u8; ID_SIZE]], handler: H) -> NetworkResult<ChannelId>
    where
        H: ChannelHandler + 'static,
    {
        self.channel_request(Command::Browse, "browse", handler, |id| browse_body(id, kind, ids))
    }

    pub fn playlist<H>(&mut self, playlist: &[u8; PLAYLIST_ID_SIZE], revision: u32, handler: H) -> NetworkResult<ChannelId>
    where
        H: ChannelHandler + 'static,
    {
        self.channel_request(Command::GetPlaylist, "playlist", handler, |id| {
            playlist_body(id, playlist, revision)
        })
    }

    pub fn playlist_container<H>(&mut self, handler: H) -> NetworkResult<ChannelId>
    where
        H: ChannelHandler + 'static,
    {
        self.channel_request(Command::GetPlaylist, "playlist-container", handler, |id| {
            playlist_body(id, &[0; PLAYLIST_ID_SIZE], LATEST_REVISION)
        })
    }

    pub fn change_playlist<H>(&mut self, change: &PlaylistChange, handler: H) -> NetworkResult<ChannelId>
    where
        H: ChannelHandler + 'static,
    {
        self.channel_request(Command::ChangePlaylist, "change-playlist", handler, |id| {
            change_playlist_body(id, change)
        })
    }

    pub fn image<H>(&mut self, image: &[u8; FILE_ID_SIZE], handler: H) -> NetworkResult<ChannelId>
    where
        H: ChannelHandler + 'static,
    {
        self.channel_request(Command::Image, "image", handler, |id| image_body(id, image))
    }

    /// The key arrives as an `AesKey` packet and is handed to the channel as a single data event.
    pub fn aes_key<H>(&mut self, file_id: &[u8; FILE_ID_SIZE], track_id: &[u8; ID_SIZE], handler: H) -> NetworkResult<ChannelId>
    where
        H: ChannelHandler + 'static,
    {
        self.channel_request(Command::RequestKey, "aes-key", handler, |id| {
            aes_key_body(id, file_id, track_id)
        })
    }

    pub fn substream<H>(&mut self, file_id: &[u8; FILE_ID_SIZE], offset: u32, length: u32, handler: H) -> NetworkResult<ChannelId>
    where
        H: ChannelHandler + 'static,
    {
        self.channel_request(Command::GetSubstream, "substream", handler, |id| {
            substream_body(id, file_id, offset, length)
        })
    }

    pub fn user_info<H>(&mut self, username: &str, handler: H) -> NetworkResult<ChannelId>
    where
        H: ChannelHandler + 'static,
    {
        self.channel_request(Command::UserInfo, "user-info", handler, |id| user_info_body(id, username))
    }

    pub fn request_ad<H>(&mut self, kind: u8, handler: H) -> NetworkResult<ChannelId>
    where
        H: ChannelHandler + 'static,
    {
        self.channel_request(Command::RequestAd, "ad", handler, |id| ad_body(id, kind))
    }

    #[inline]
    pub fn cache_hash(&mut self, hash: &[u8; CACHE_HASH_SIZE]) -> NetworkResult<()> {
        self.send(Command::CacheHash, hash)
    }

    #[inline]
    pub fn pong(&mut self) -> NetworkResult<()> {
        self.send(Command::Pong, &[0; 4])
    }

    /// Asks the server to hand the play token to this session.
    #[inline]
    pub fn token_notify(&mut self) -> NetworkResult<()> {
        self.send(Command::TokenNotify, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ByteOrder;

    #[test]
    fn test_command_ids() {
        for raw in 0..=u8::MAX {
            if let Ok(cmd) = Command::try_from(raw) {
                assert_eq!(u8::from(cmd), raw);
            }
        }

        assert_eq!(Command::try_from(0x57), Ok(Command::UserInfo));
        assert_eq!(Command::try_from(0x69), Ok(Command::Welcome));
        assert_eq!(Command::try_from(0xff), Err(0xff));
    }

    #[test]
    fn test_search_body() {
        let body = search_body(3, "abba", 10, 25).unwrap();

        assert_eq!(body.len(), 13 + 4);
        assert_eq!(BigEndian::read_u16(&body[0..]), 3);
        assert_eq!(BigEndian::read_u32(&body[2..]), 10);
        assert_eq!(BigEndian::read_u32(&body[6..]), 25);
        assert_eq!(BigEndian::read_u16(&body[10..]), 0);
        assert_eq!(body[12], 4);
        assert_eq!(&body[13..], b"abba");
    }

    #[test]
    fn test_search_query_too_long() {
        let query = "q".repeat(256);
        assert_eq!(
            search_body(0, &query, 0, 1).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
        assert!(search_body(0, &query[..255], 0, 1).is_ok());
    }

    #[test]
    fn test_toplist_body() {
        let body = toplist_body(1, ToplistKind::Tracks, "SE", "").unwrap();
        assert_eq!(body, vec![0, 1, 0, 0, 2, 2, b'S', b'E', 0]);
    }

    #[test]
    fn test_browse_body() {
        let artist = browse_body(2, BrowseKind::Artist, &[[0xaa; ID_SIZE]]).unwrap();
        assert_eq!(artist.len(), 3 + ID_SIZE + 4);
        assert_eq!(artist[2], 1);
        assert_eq!(&artist[3..3 + ID_SIZE], &[0xaa; ID_SIZE]);
        assert_eq!(&artist[3 + ID_SIZE..], &[0, 0, 0, 0]);

        let tracks = browse_body(2, BrowseKind::Track, &[[1; ID_SIZE], [2; ID_SIZE], [3; ID_SIZE]]).unwrap();
        assert_eq!(tracks.len(), 3 + 3 * ID_SIZE);
        assert_eq!(tracks[2], 3);
        assert_eq!(tracks[3 + 2 * ID_SIZE], 3);
    }

    #[test]
    fn test_browse_rejects_bad_id_counts() {
        assert!(browse_body(0, BrowseKind::Track, &[]).is_err());
        assert!(browse_body(0, BrowseKind::Album, &[[0; ID_SIZE], [1; ID_SIZE]]).is_err());
    }

    #[test]
    fn test_playlist_body() {
        let body = playlist_body(5, &[0; PLAYLIST_ID_SIZE], LATEST_REVISION).unwrap();

        assert_eq!(body.len(), 2 + PLAYLIST_ID_SIZE + 13);
        assert_eq!(BigEndian::read_u16(&body), 5);
        assert!(body[2..2 + PLAYLIST_ID_SIZE].iter().all(|&byte| byte == 0));

        let tail = &body[2 + PLAYLIST_ID_SIZE..];
        assert_eq!(BigEndian::read_u32(&tail[0..]), LATEST_REVISION);
        assert_eq!(BigEndian::read_u32(&tail[4..]), 0);
        assert_eq!(BigEndian::read_u32(&tail[8..]), 0xffff_ffff);
        assert_eq!(tail[12], 1);
    }

    #[test]
    fn test_change_playlist_body() {
        let change = PlaylistChange {
            id: [9; PLAYLIST_ID_SIZE],
            revision: 7,
            track_count: 12,
            checksum: 0xdead_beef,
            collaborative: true,
            xml: "<change/>".to_string(),
        };

        let body = change_playlist_body(1, &change).unwrap();
        let tail = &body[2 + PLAYLIST_ID_SIZE..];

        assert_eq!(BigEndian::read_u32(&tail[0..]), 7);
        assert_eq!(BigEndian::read_u32(&tail[4..]), 12);
        assert_eq!(BigEndian::read_u32(&tail[8..]), 0xdead_beef);
        assert_eq!(tail[12], 1);
        assert_eq!(tail[13], 3);
        assert_eq!(&tail[14..], b"<change/>");
    }

    #[test]
    fn test_aes_key_body() {
        let body = aes_key_body(0x0102, &[4; FILE_ID_SIZE], &[5; ID_SIZE]).unwrap();

        assert_eq!(body.len(), FILE_ID_SIZE + ID_SIZE + 4);
        assert_eq!(&body[..FILE_ID_SIZE], &[4; FILE_ID_SIZE]);
        assert_eq!(&body[FILE_ID_SIZE..FILE_ID_SIZE + ID_SIZE], &[5; ID_SIZE]);
        assert_eq!(&body[FILE_ID_SIZE + ID_SIZE..], &[0, 0, 1, 2]);
    }

    #[test]
    fn test_substream_body() {
        let body = substream_body(6, &[8; FILE_ID_SIZE], 4096, 8192).unwrap();

        assert_eq!(body.len(), 18 + FILE_ID_SIZE + 8);
        assert_eq!(BigEndian::read_u16(&body[0..]), 6);
        assert_eq!(BigEndian::read_u16(&body[2..]), 0x0800);
        assert_eq!(BigEndian::read_u16(&body[10..]), 0x4e20);
        assert_eq!(BigEndian::read_u32(&body[12..]), 200_000);
        assert_eq!(&body[16..16 + FILE_ID_SIZE], &[8; FILE_ID_SIZE]);
        assert_eq!(BigEndian::read_u32(&body[36..]), 1024);
        assert_eq!(BigEndian::read_u32(&body[40..]), 3072);

        assert!(substream_body(6, &[8; FILE_ID_SIZE], u32::MAX, 1).is_err());
    }

    #[test]
    fn test_short_bodies() {
        assert_eq!(user_info_body(1, "bob").unwrap(), vec![0, 1, 3, b'b', b'o', b'b']);
        assert_eq!(ad_body(0x0a0b, 1).unwrap(), vec![0x0a, 0x0b, 1]);
        assert_eq!(image_body(0, &[3; FILE_ID_SIZE]).unwrap().len(), 2 + FILE_ID_SIZE);
    }
}
