//! A scripted access point on a loopback socket. It speaks the server side of the handshake and the
//! packet codec using the crate's own message and key code.
#![allow(dead_code)]

use flint::crypto;
use flint::crypto::dh::DhKeyPair;
use flint::logging;
use quaver::channel::{encode_header, ChannelId};
use quaver::command::Command;
use quaver::login::keys::{self, RANDOM_SIZE, SALT_SIZE};
use quaver::login::message::{AuthResponse, ClientAuth, ClientHello, Rejection, ServerHello, BLOB_SIZE};
use quaver::login::puzzle::Puzzle;
use quaver::net::buffer::Buffer;
use quaver::net::packet::{Packet, PacketCodec};
use quaver::net::resolve::{Resolve, ServiceRecord};
use quaver::net::shared::NetworkError;
use quaver::{Completion, RequestKind, Session, SessionConfig};
use std::io;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

pub const USERNAME: &str = "someuser";
pub const PASSWORD: &str = "hunter2";
/// Canonical username the mock reports back.
pub const CANONICAL: &str = "SomeUser";

pub const TIMEOUT: Duration = Duration::from_secs(30);

/// Puzzle the mock hands out unless a test asks for another.
pub const PUZZLE: Puzzle = Puzzle {
    denominator: 6,
    magic: 0x1234_5678,
};

const BUFFER_LIMIT: usize = 1 << 20;

/// Resolves every name to the mock server.
pub struct StaticResolver {
    pub address: SocketAddr,
}

impl Resolve for StaticResolver {
    fn service_records(&self, _name: &str) -> io::Result<Vec<ServiceRecord>> {
        Ok(vec![ServiceRecord {
            priority: 0,
            weight: 0,
            host: "ap.mock".to_string(),
            port: self.address.port(),
        }])
    }

    fn addresses(&self, _host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(vec![self.address])
    }
}

pub fn config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.poll_interval_ms = 20;
    config.backoff_ms = 50;
    config
}

pub struct MockServer {
    listener: TcpListener,
}

impl MockServer {
    pub fn bind() -> MockServer {
        MockServer {
            listener: TcpListener::bind("127.0.0.1:0").unwrap(),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.listener.local_addr().unwrap()
    }

    /// A session that reaches this server whatever it looks up.
    pub fn session(&self) -> Session {
        let resolver = StaticResolver {
            address: self.address(),
        };

        Session::with_resolver(config(), Box::new(resolver), &logging::discard()).unwrap()
    }

    /// Accepts one client on a background thread and hands the stream to the script.
    pub fn serve<F>(self, script: F) -> thread::JoinHandle<()>
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        thread::spawn(move || {
            let (stream, _) = self.listener.accept().unwrap();
            stream.set_read_timeout(Some(TIMEOUT)).unwrap();
            script(stream)
        })
    }

    /// Accepts one client, completes the handshake and runs the script on the encrypted link.
    pub fn serve_session<F>(self, script: F) -> thread::JoinHandle<()>
    where
        F: FnOnce(ServerLink) + Send + 'static,
    {
        self.serve(move |stream| {
            let link = authenticate(stream, PASSWORD).expect("Client failed to authenticate");
            script(link)
        })
    }

    /// Accepts `count` clients one after the other. Each one is authenticated and handed to the
    /// script together with its index.
    pub fn serve_sessions<F>(self, count: usize, mut script: F) -> thread::JoinHandle<()>
    where
        F: FnMut(usize, ServerLink) + Send + 'static,
    {
        thread::spawn(move || {
            for index in 0..count {
                let (stream, _) = self.listener.accept().unwrap();
                stream.set_read_timeout(Some(TIMEOUT)).unwrap();

                let link = authenticate(stream, PASSWORD).expect("Client failed to authenticate");
                script(index, link);
            }
        })
    }
}

/// Reads a complete client hello. Returns the raw bytes along with the parsed message.
pub fn read_client_hello(stream: &mut TcpStream) -> (Vec<u8>, ClientHello) {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).unwrap();

    let mut raw = prefix.to_vec();
    raw.resize(ClientHello::declared_len(&prefix), 0);
    stream.read_exact(&mut raw[4..]).unwrap();

    let hello = ClientHello::read(&raw).unwrap();
    (raw, hello)
}

/// Answers the client hello with a failed status and hangs up.
pub fn reject(mut stream: TcpStream, rejection: Rejection) {
    read_client_hello(&mut stream);
    stream.write_all(&rejection.status().to_be_bytes()).unwrap();
}

/// Server side of the handshake up to the server hello.
pub struct Greeting {
    pub client_raw: Vec<u8>,
    pub client: ClientHello,
    pub dh: DhKeyPair,
    pub server: ServerHello,
    pub server_raw: Vec<u8>,
}

/// Reads the client hello and answers it with a server hello carrying the puzzle.
pub fn greet(stream: &mut TcpStream, puzzle: &Puzzle) -> Greeting {
    let (client_raw, client) = read_client_hello(stream);
    assert_eq!(client.username, USERNAME);

    let dh = DhKeyPair::generate();

    let mut server = ServerHello {
        status: 0,
        random: [0; RANDOM_SIZE],
        dh_public: *dh.public(),
        blob: [0; BLOB_SIZE],
        salt: [0; SALT_SIZE],
        padding: vec![0x30; 3],
        username: CANONICAL.to_string(),
        puzzle: ServerHello::encode_puzzle(puzzle),
    };

    crypto::random_bytes(&mut server.random);
    crypto::random_bytes(&mut server.salt);

    let server_raw = server.to_bytes().unwrap();
    stream.write_all(&server_raw).unwrap();

    Greeting {
        client_raw,
        client,
        dh,
        server,
        server_raw,
    }
}

/// Runs the server side of the handshake. Returns `None` after telling the client its proof of the
/// password was wrong.
pub fn authenticate(mut stream: TcpStream, password: &str) -> Option<ServerLink> {
    let Greeting {
        client_raw,
        client,
        dh,
        server,
        server_raw,
    } = greet(&mut stream, &PUZZLE);

    let mut auth_raw = [0u8; ClientAuth::SIZE];
    stream.read_exact(&mut auth_raw).unwrap();
    let auth = ClientAuth::read(&auth_raw).unwrap();

    assert!(PUZZLE.verify(&server.random, &auth.solution));

    let session_keys = keys::derive_keys(
        &dh.shared_secret(&client.dh_public),
        &keys::auth_hash(&server.salt, password),
        &client.random,
        &server.random,
    );

    let expected = keys::auth_hmac(
        &session_keys.hmac,
        &client_raw,
        &server_raw,
        &ClientAuth::trailer(&auth.solution),
    );

    if expected != auth.hmac {
        let response = AuthResponse {
            status: 1,
            payload: Vec::new(),
        };
        stream.write_all(&response.to_bytes().unwrap()).unwrap();
        return None;
    }

    let response = AuthResponse {
        status: 0,
        payload: vec![0; 4],
    };
    stream.write_all(&response.to_bytes().unwrap()).unwrap();

    Some(ServerLink {
        stream,
        // The server sends with the client's receive key
        codec: PacketCodec::new(&session_keys.recv, &session_keys.send),
        inbound: Buffer::new(BUFFER_LIMIT),
        outbound: Buffer::new(BUFFER_LIMIT),
    })
}

/// The server end of an authenticated connection.
pub struct ServerLink {
    stream: TcpStream,
    codec: PacketCodec,
    inbound: Buffer,
    outbound: Buffer,
}

impl ServerLink {
    pub fn send(&mut self, cmd: Command, payload: &[u8]) {
        self.codec.encode(cmd.into(), payload, &mut self.outbound).unwrap();
        self.stream.write_all(self.outbound.read_slice()).unwrap();
        self.outbound.clear();
    }

    pub fn receive(&mut self) -> Packet {
        let mut chunk = [0u8; 4096];

        loop {
            match self.codec.decode(&mut self.inbound) {
                Ok(packet) => return packet,
                Err(NetworkError::Wait) => {
                    let count = self.stream.read(&mut chunk).unwrap();
                    assert!(count > 0, "Client hung up");
                    self.inbound.extend(&chunk[..count]);
                }
                Err(err) => panic!("Undecodable packet: {:?}", err),
            }
        }
    }

    /// Receives the next packet and checks its command.
    pub fn expect(&mut self, cmd: Command) -> Packet {
        let packet = self.receive();
        assert_eq!(packet.cmd, u8::from(cmd), "Unexpected command {:#04x}", packet.cmd);
        packet
    }

    /// Receives a channel bound request and returns its channel id.
    pub fn expect_channel(&mut self, cmd: Command) -> (ChannelId, Packet) {
        let packet = self.expect(cmd);
        let channel = u16::from_be_bytes([packet.payload[0], packet.payload[1]]);
        (channel, packet)
    }

    /// Sends a complete channel: the header records, the data in one chunk and the end marker.
    pub fn reply(&mut self, channel: ChannelId, headers: &[&[u8]], data: &[u8]) {
        let chunks = match data.is_empty() {
            true => Vec::new(),
            false => vec![data.to_vec()],
        };

        self.reply_chunks(channel, headers, chunks);
    }

    /// Sends a complete channel with the data split over one packet per chunk.
    pub fn reply_chunks<I>(&mut self, channel: ChannelId, headers: &[&[u8]], chunks: I)
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut header = channel.to_be_bytes().to_vec();
        header.extend_from_slice(&encode_header(headers));
        self.send(Command::ChannelData, &header);

        for data in chunks {
            let mut chunk = channel.to_be_bytes().to_vec();
            chunk.extend_from_slice(&data);
            self.send(Command::ChannelData, &chunk);
        }

        self.send(Command::ChannelData, &channel.to_be_bytes());
    }

    /// Waits until the client closes its end.
    pub fn expect_hangup(&mut self) {
        wait_for_hangup(&mut self.stream);
    }
}

/// Drains the stream until the client closes its end.
pub fn wait_for_hangup(stream: &mut TcpStream) {
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(_) => continue,
            Err(ref err) if err.kind() == io::ErrorKind::ConnectionReset => return,
            Err(err) => panic!("Client did not hang up: {}", err),
        }
    }
}

/// Waits for the result of a specific request, consuming it.
pub fn wait_for(session: &Session, kind: RequestKind) -> Completion {
    let deadline = Instant::now() + TIMEOUT;

    while Instant::now() < deadline {
        if let Some(completion) = session.next_result(Duration::from_millis(100)) {
            session.mark_processed(completion.id);

            if completion.kind == kind {
                return completion;
            }
        }
    }

    panic!("No {:?} result within {:?}", kind, TIMEOUT);
}

/// Polls the session until the condition holds.
pub fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + TIMEOUT;

    while !condition() {
        assert!(Instant::now() < deadline, "Condition not met within {:?}", TIMEOUT);
        thread::sleep(Duration::from_millis(10));
    }
}
