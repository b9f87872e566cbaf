//! The login handshake. A `LoginContext` is advanced one step per `process` call by the network
//! thread until it either completes, handing over the connected link and the session keys, or fails.
use crate::config::SessionConfig;
use crate::login::keys::{SessionKeys, CIPHER_KEY_SIZE, RANDOM_SIZE};
use crate::login::message::{AuthResponse, ClientAuth, ClientHello, Rejection, ServerHello};
use crate::login::puzzle::{Puzzle, SOLUTION_SIZE};
use crate::net::resolve::{self, Resolve, ServiceRecord};
use crate::net::shared::{ErrorType, NetworkError};
use crate::net::stream::Link;
use flint::crypto;
use flint::crypto::dh::DhKeyPair;
use flint::crypto::RsaKeyPair;
use flint::logging;
use flint::util::protect;
use std::fmt;
use std::mem;
use std::net::SocketAddr;
use std::time::Instant;
use thiserror::Error;

pub mod keys;
pub mod message;
pub mod puzzle;

/// Trailing characters of the username left readable in the logs.
const VISIBLE_USERNAME_CHARS: usize = 3;

#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Credentials {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &protect(&self.username, VISIBLE_USERNAME_CHARS))
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("access point lookup failed: {0}")]
    Dns(String),
    #[error("no access point could be reached")]
    NoServersLeft,
    #[error("transport failure: {0:?}")]
    Network(ErrorType),
    #[error("malformed message from access point")]
    Malformed,
    #[error("login rejected: {0:?}")]
    Rejected(Rejection),
    #[error("bad password")]
    BadPassword,
    #[error("unsupported puzzle type {0}")]
    UnsupportedPuzzle(u8),
    #[error("puzzle too hard, denominator {0}")]
    PuzzleTooHard(u8),
    #[error("username does not fit the client hello")]
    InvalidUsername,
    #[error("key generation failed")]
    KeyGeneration,
    #[error("login aborted")]
    Aborted,
}

impl From<NetworkError> for LoginError {
    #[inline]
    fn from(error: NetworkError) -> Self {
        match error {
            NetworkError::Wait => LoginError::Network(ErrorType::Timeout),
            NetworkError::Fatal(kind) => LoginError::Network(kind),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoginProgress {
    /// The handshake needs more `process` calls.
    Retry,
    Done,
}

enum LoginState {
    ResolveService,
    SelectServer,
    SelectAddress,
    Connecting { link: Link, started: Instant },
    SendHello { link: Link },
    ReceiveHello { link: Link },
    Authenticate { link: Link },
    SendAuth { link: Link },
    ReceiveAuth { link: Link },
    Complete { link: Link },
    Failed,
}

impl LoginState {
    /// Position of the state in the handshake, terminal states have none.
    fn step(&self) -> Option<u8> {
        match self {
            LoginState::ResolveService => Some(0),
            LoginState::SelectServer => Some(1),
            LoginState::SelectAddress => Some(2),
            LoginState::Connecting { .. } => Some(3),
            LoginState::SendHello { .. } => Some(4),
            LoginState::ReceiveHello { .. } => Some(5),
            LoginState::Authenticate { .. } => Some(6),
            LoginState::SendAuth { .. } => Some(7),
            LoginState::ReceiveAuth { .. } => Some(8),
            LoginState::Complete { .. } | LoginState::Failed => None,
        }
    }
}

/// Everything a successful handshake hands over to the session.
pub struct LoginOutcome {
    pub link: Link,
    pub send_key: [u8; CIPHER_KEY_SIZE],
    pub recv_key: [u8; CIPHER_KEY_SIZE],
    /// Canonical username reported by the access point.
    pub username: String,
}

pub struct LoginContext {
    log: logging::Logger,
    credentials: Credentials,
    config: SessionConfig,
    state: LoginState,

    // Access point candidates
    records: Vec<ServiceRecord>,
    next_record: usize,
    addresses: Vec<SocketAddr>,
    next_address: usize,

    dh: DhKeyPair,
    client_random: [u8; RANDOM_SIZE],
    handshake_deadline: Instant,

    // Every byte exchanged so far, covered by the auth HMAC
    client_hello: Vec<u8>,
    server_hello: Vec<u8>,
    server: Option<ServerHello>,

    keys: Option<SessionKeys>,
    solution: [u8; SOLUTION_SIZE],
}

impl LoginContext {
    pub fn new(credentials: Credentials, config: &SessionConfig, log: &logging::Logger) -> LoginContext {
        let mut client_random = [0u8; RANDOM_SIZE];
        crypto::random_bytes(&mut client_random);

        LoginContext {
            log: log.new(logging::o!("user" => protect(&credentials.username, VISIBLE_USERNAME_CHARS))),
            credentials,
            config: config.clone(),
            state: LoginState::ResolveService,
            records: Vec::new(),
            next_record: 0,
            addresses: Vec::new(),
            next_address: 0,
            dh: DhKeyPair::generate(),
            client_random,
            handshake_deadline: Instant::now(),
            client_hello: Vec::new(),
            server_hello: Vec::new(),
            server: None,
            keys: None,
            solution: [0; SOLUTION_SIZE],
        }
    }

    /// Current handshake step, 0 to 8. `None` once the handshake finished either way.
    #[inline]
    pub fn step(&self) -> Option<u8> {
        self.state.step()
    }

    /// Runs a single step of the handshake. Steps never block for longer than the connect slice or,
    /// once connected, the handshake timeout. Any error is terminal and closes the link.
    pub fn process(&mut self, resolver: &dyn Resolve) -> Result<LoginProgress, LoginError> {
        let state = mem::replace(&mut self.state, LoginState::Failed);

        match self.advance(state, resolver) {
            Ok(next) => {
                let progress = match next {
                    LoginState::Complete { .. } => LoginProgress::Done,
                    _ => LoginProgress::Retry,
                };

                self.state = next;
                Ok(progress)
            }
            Err(err) => {
                // The link was dropped along with the consumed state
                logging::info!(self.log, "login failed"; "error" => %err);
                Err(err)
            }
        }
    }

    /// Aborts an unfinished handshake, closing any open link.
    pub fn abort(&mut self) {
        if let Some(step) = self.step() {
            logging::info!(self.log, "login aborted"; "step" => step);
            self.state = LoginState::Failed;
        }
    }

    /// Hands over the link and keys of a completed handshake.
    pub fn into_outcome(self) -> Option<LoginOutcome> {
        match (self.state, self.keys, self.server) {
            (LoginState::Complete { link }, Some(keys), Some(server)) => Some(LoginOutcome {
                link,
                send_key: keys.send,
                recv_key: keys.recv,
                username: server.username,
            }),
            _ => None,
        }
    }

    fn advance(&mut self, state: LoginState, resolver: &dyn Resolve) -> Result<LoginState, LoginError> {
        Ok(match state {
            LoginState::ResolveService => {
                self.records = self.resolve_service(resolver)?;
                self.next_record = 0;

                logging::debug!(self.log, "access points resolved"; "count" => self.records.len());
                LoginState::SelectServer
            }
            LoginState::SelectServer => {
                let record = match self.records.get(self.next_record) {
                    Some(record) => record.clone(),
                    None => return Err(LoginError::NoServersLeft),
                };

                self.next_record += 1;
                self.next_address = 0;

                match resolver.addresses(&record.host, record.port) {
                    Ok(addresses) => {
                        logging::debug!(self.log, "access point"; "server" => %record, "addresses" => addresses.len());
                        self.addresses = addresses;
                        LoginState::SelectAddress
                    }
                    Err(err) => {
                        logging::debug!(self.log, "access point unresolvable"; "server" => %record, "error" => %err);
                        LoginState::SelectServer
                    }
                }
            }
            LoginState::SelectAddress => {
                let address = match self.addresses.get(self.next_address) {
                    Some(address) => *address,
                    None => return Ok(LoginState::SelectServer),
                };

                self.next_address += 1;

                match Link::connect(address) {
                    Ok(link) => LoginState::Connecting {
                        link,
                        started: Instant::now(),
                    },
                    Err(err) => {
                        logging::debug!(self.log, "connect failed"; "address" => %address, "error" => ?err);
                        LoginState::SelectAddress
                    }
                }
            }
            LoginState::Connecting { mut link, started } => {
                match link.poll_connected(self.config.connect_slice()) {
                    Ok(true) => {
                        logging::debug!(self.log, "connected"; "address" => %link.peer());
                        self.handshake_deadline = Instant::now() + self.config.handshake_timeout();
                        LoginState::SendHello { link }
                    }
                    Ok(false) if started.elapsed() < self.config.connect_timeout() => {
                        LoginState::Connecting { link, started }
                    }
                    Ok(false) => {
                        logging::debug!(self.log, "connect timed out"; "address" => %link.peer());
                        link.shutdown();
                        LoginState::SelectAddress
                    }
                    Err(err) => {
                        logging::debug!(self.log, "connect failed"; "address" => %link.peer(), "error" => ?err);
                        link.shutdown();
                        LoginState::SelectAddress
                    }
                }
            }
            LoginState::SendHello { mut link } => {
                let rsa = RsaKeyPair::generate().map_err(|_| LoginError::KeyGeneration)?;

                let hello = ClientHello {
                    client_revision: self.config.client_revision,
                    client_id: self.config.client_id.to_be_bytes(),
                    random: self.client_random,
                    dh_public: *self.dh.public(),
                    rsa_modulus: rsa.modulus(),
                    username: self.credentials.username.clone(),
                };

                self.client_hello = hello.to_bytes().map_err(|_| LoginError::InvalidUsername)?;
                link.write_all(&self.client_hello, self.handshake_deadline)?;

                logging::debug!(self.log, "client hello sent"; "len" => self.client_hello.len());
                LoginState::ReceiveHello { link }
            }
            LoginState::ReceiveHello { mut link } => {
                let mut received = vec![0u8; ServerHello::STATUS_SIZE];
                link.read_exact(&mut received, self.handshake_deadline)?;

                let status = u16::from_be_bytes([received[0], received[1]]);

                // A failed status is all the access point sends
                if let Some(rejection) = Rejection::from_status(status) {
                    return Err(LoginError::Rejected(rejection));
                }

                received.resize(ServerHello::FIXED_SIZE, 0);
                link.read_exact(&mut received[ServerHello::STATUS_SIZE..], self.handshake_deadline)?;

                let fixed_len = received.len();
                received.resize(fixed_len + ServerHello::variable_len(&received), 0);
                link.read_exact(&mut received[fixed_len..], self.handshake_deadline)?;

                let server = ServerHello::parse(&received).map_err(|_| LoginError::Malformed)?;

                logging::debug!(self.log, "server hello received"; "len" => received.len());
                self.server_hello = received;
                self.server = Some(server);
                LoginState::Authenticate { link }
            }
            LoginState::Authenticate { link } => {
                let server = self.server.as_ref().ok_or(LoginError::Malformed)?;
                let puzzle: Puzzle = server.decode_puzzle().map_err(LoginError::UnsupportedPuzzle)?;

                let auth_hash = keys::auth_hash(&server.salt, &self.credentials.password);
                let shared_secret = self.dh.shared_secret(&server.dh_public);

                self.keys = Some(keys::derive_keys(
                    &shared_secret,
                    &auth_hash,
                    &self.client_random,
                    &server.random,
                ));
                self.solution = puzzle
                    .solve(&server.random)
                    .ok_or(LoginError::PuzzleTooHard(puzzle.denominator))?;

                logging::debug!(self.log, "puzzle solved"; "denominator" => puzzle.denominator);
                LoginState::SendAuth { link }
            }
            LoginState::SendAuth { mut link } => {
                let session_keys = self.keys.as_ref().ok_or(LoginError::Malformed)?;

                let auth = ClientAuth {
                    hmac: keys::auth_hmac(
                        &session_keys.hmac,
                        &self.client_hello,
                        &self.server_hello,
                        &ClientAuth::trailer(&self.solution),
                    ),
                    solution: self.solution,
                };

                link.write_all(&auth.to_bytes(), self.handshake_deadline)?;
                LoginState::ReceiveAuth { link }
            }
            LoginState::ReceiveAuth { mut link } => {
                let mut header = [0u8; AuthResponse::HEADER_SIZE];
                link.read_exact(&mut header, self.handshake_deadline)?;

                let mut response = AuthResponse {
                    status: header[0],
                    payload: vec![0u8; header[1] as usize],
                };
                link.read_exact(&mut response.payload, self.handshake_deadline)?;

                if !response.is_success() {
                    return Err(LoginError::BadPassword);
                }

                logging::info!(self.log, "login complete"; "address" => %link.peer());
                LoginState::Complete { link }
            }
            LoginState::Complete { link } => LoginState::Complete { link },
            LoginState::Failed => return Err(LoginError::Aborted),
        })
    }

    fn resolve_service(&self, resolver: &dyn Resolve) -> Result<Vec<ServiceRecord>, LoginError> {
        if !self.config.servers.is_empty() {
            return Ok(self
                .config
                .servers
                .iter()
                .filter_map(|server| resolve::parse_server(server))
                .collect());
        }

        let records = resolver
            .service_records(&self.config.service)
            .map_err(|err| LoginError::Dns(err.to_string()))?;

        match records.is_empty() {
            true => Err(LoginError::NoServersLeft),
            _ => Ok(resolve::sort_records(records)),
        }
    }
}
