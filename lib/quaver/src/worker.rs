//! The network thread. It owns the login context, the connection and every channel; the only state
//! it shares with the application is the request queue and the published session info.
use crate::channel::{ChannelEvent, ChannelHandler, ChannelId, ChannelInfo};
use crate::command::CACHE_HASH_SIZE;
use crate::config::SessionConfig;
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::error::ErrorCode;
use crate::login::{Credentials, LoginContext, LoginProgress};
use crate::net::packet::Packet;
use crate::net::resolve::Resolve;
use crate::net::shared::{ErrorType, NetworkError, NetworkResult};
use crate::request::{DueRequest, RequestId, RequestInput, RequestOutput, RequestQueue};
use crate::session::{ConnectionState, SharedInfo};
use flint::crypto;
use flint::logging;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a finished channel turns into.
enum Delivery {
    /// The channel contents become the request output.
    Output,
    /// The channel carries the display name of the logged in user.
    DisplayName(SharedInfo),
}

/// Collects a channel's traffic on behalf of a request. A failed channel leaves the request to be
/// retried later.
struct Collector {
    request: RequestId,
    queue: RequestQueue,
    retry: Duration,
    delivery: Delivery,
    headers: Vec<Vec<u8>>,
    data: Vec<u8>,
}

impl Collector {
    fn new(request: RequestId, queue: &RequestQueue, retry: Duration, delivery: Delivery) -> Collector {
        Collector {
            request,
            queue: queue.clone(),
            retry,
            delivery,
            headers: Vec::new(),
            data: Vec::new(),
        }
    }

    fn complete(&mut self) {
        let headers = mem::take(&mut self.headers);
        let data = mem::take(&mut self.data);

        let output = match &self.delivery {
            Delivery::Output => RequestOutput::Channel { headers, data },
            Delivery::DisplayName(info) => {
                let name = String::from_utf8_lossy(&data).trim().to_string();
                info.lock().display_name = Some(name);
                RequestOutput::Empty
            }
        };

        self.queue.set_result(self.request, Ok(Arc::new(output)));
    }
}

impl ChannelHandler for Collector {
    fn handle(&mut self, _info: &ChannelInfo, event: ChannelEvent) {
        match event {
            ChannelEvent::Header(record) => self.headers.push(record.to_vec()),
            ChannelEvent::Data(chunk) => self.data.extend_from_slice(chunk),
            ChannelEvent::End => self.complete(),
            ChannelEvent::Error => {
                self.headers.clear();
                self.data.clear();
                self.queue.reschedule(self.request, Instant::now() + self.retry);
            }
        }
    }
}

struct PendingLogin {
    request: RequestId,
    context: LoginContext,
}

pub struct Worker {
    log: logging::Logger,
    config: SessionConfig,
    resolver: Box<dyn Resolve>,
    queue: RequestQueue,
    info: SharedInfo,
    dispatcher: Dispatcher,
    login: Option<PendingLogin>,
    connection: Option<Connection>,
    packets: Vec<Packet>,
    login_attempts: u64,
}

impl Worker {
    pub fn new(
        config: SessionConfig,
        resolver: Box<dyn Resolve>,
        queue: RequestQueue,
        info: SharedInfo,
        log: &logging::Logger,
    ) -> Worker {
        let log = log.new(logging::o!("thread" => "network"));

        // Stands in for the digest of a local cache
        let mut cache_hash = [0u8; CACHE_HASH_SIZE];
        crypto::random_bytes(&mut cache_hash);

        Worker {
            dispatcher: Dispatcher::new(queue.clone(), info.clone(), cache_hash, &log),
            log,
            config,
            resolver,
            queue,
            info,
            login: None,
            connection: None,
            packets: Vec::new(),
            login_attempts: 0,
        }
    }

    /// Runs until the queue shuts down.
    pub fn run(mut self) {
        logging::info!(self.log, "network thread started");

        while !self.queue.is_shutdown() {
            self.queue.remove_processed();

            for request in self.queue.take_due(Instant::now()) {
                self.route(request);
            }

            if self.login.is_some() {
                self.step_login();
                continue;
            }

            match self.connection {
                Some(_) => self.poll_connection(),
                None => {
                    let timeout = self
                        .queue
                        .next_deadline()
                        .map(|deadline| deadline.saturating_duration_since(Instant::now()));

                    self.queue.wait_for_work(timeout);
                }
            }
        }

        self.stop();
    }

    fn route(&mut self, request: DueRequest) {
        // An earlier request of the same batch may have completed it already
        if !self.queue.start(request.id) {
            return;
        }

        logging::trace!(self.log, "request due"; "id" => request.id, "kind" => ?request.input.kind());

        match request.input {
            RequestInput::Login(credentials) => self.start_login(request.id, credentials),
            RequestInput::Logout => self.logout(request.id),
            input => self.issue(request.id, input),
        }
    }

    fn start_login(&mut self, request: RequestId, credentials: Credentials) {
        if self.login.is_some() || self.connection.is_some() {
            self.queue.set_result(request, Err(ErrorCode::AlreadyLoggedIn));
            return;
        }

        self.login_attempts += 1;
        let log = self.log.new(logging::o!("login" => self.login_attempts));

        self.login = Some(PendingLogin {
            request,
            context: LoginContext::new(credentials, &self.config, &log),
        });
    }

    fn step_login(&mut self) {
        let pending = match self.login.as_mut() {
            Some(pending) => pending,
            None => return,
        };

        match pending.context.process(self.resolver.as_ref()) {
            Ok(LoginProgress::Retry) => (),
            Ok(LoginProgress::Done) => {
                if let Some(pending) = self.login.take() {
                    self.finish_login(pending);
                }
            }
            Err(err) => {
                if let Some(pending) = self.login.take() {
                    self.queue.set_result(pending.request, Err(ErrorCode::from(&err)));
                }

                self.info.lock().state = ConnectionState::LoggedOut;
            }
        }
    }

    fn finish_login(&mut self, pending: PendingLogin) {
        let outcome = match pending.context.into_outcome() {
            Some(outcome) => outcome,
            None => {
                self.queue.set_result(pending.request, Err(ErrorCode::Protocol));
                return;
            }
        };

        let username = outcome.username.clone();
        self.connection = Some(Connection::new(outcome, &self.config, &self.log));

        {
            let mut info = self.info.lock();
            info.state = ConnectionState::LoggedIn;
            info.username = Some(username.clone());
            info.country = None;
            info.display_name = None;
        }

        logging::info!(self.log, "logged in"; "username" => &username);
        self.queue
            .set_result(pending.request, Ok(Arc::new(RequestOutput::LoggedIn { username })));
    }

    /// Tears down the login in progress or the connection. In flight requests fail as not logged in.
    fn logout(&mut self, request: RequestId) {
        if let Some(mut pending) = self.login.take() {
            pending.context.abort();
            self.queue.set_result(pending.request, Err(ErrorCode::LoginAborted));
            self.queue.set_result(request, Ok(Arc::new(RequestOutput::Empty)));
            return;
        }

        let result = match self.connection.take() {
            Some(mut conn) => {
                conn.close();
                self.queue.fail_running(ErrorCode::NotLoggedIn, Some(request));
                logging::info!(self.log, "logged out");
                Ok(Arc::new(RequestOutput::Empty))
            }
            None => Err(ErrorCode::NotLoggedIn),
        };

        *self.info.lock() = Default::default();
        self.queue.set_result(request, result);
    }

    /// Sends a request that needs the connection.
    fn issue(&mut self, request: RequestId, input: RequestInput) {
        let conn = match self.connection.as_mut() {
            Some(conn) => conn,
            None => {
                self.queue.set_result(request, Err(ErrorCode::NotLoggedIn));
                return;
            }
        };

        if let RequestInput::PlayToken = input {
            match conn.token_notify() {
                Ok(()) => {
                    self.queue.set_result(request, Ok(Arc::new(RequestOutput::Empty)));
                }
                Err(err) => self.request_failed(request, err),
            }
            return;
        }

        if conn.channels().is_full() {
            logging::debug!(self.log, "channel limit reached, request deferred"; "id" => request);
            self.queue.reschedule(request, Instant::now() + self.config.backoff());
            return;
        }

        let retry = self.config.retry_interval();
        let collector = Collector::new(request, &self.queue, retry, Delivery::Output);

        let sent: NetworkResult<ChannelId> = match input {
            RequestInput::Search { query, offset, limit } => conn.search(&query, offset, limit, collector),
            RequestInput::Toplist { kind, region, username } => conn.toplist(kind, &region, &username, collector),
            RequestInput::Browse { kind, ids } => conn.browse(kind, &ids, collector),
            RequestInput::Playlist { id, revision } => conn.playlist(&id, revision, collector),
            RequestInput::PlaylistContainer => conn.playlist_container(collector),
            RequestInput::ChangePlaylist(change) => conn.change_playlist(&change, collector),
            RequestInput::Image { id } => conn.image(&id, collector),
            RequestInput::AesKey { file_id, track_id } => conn.aes_key(&file_id, &track_id, collector),
            RequestInput::Substream { file_id, offset, length } => conn.substream(&file_id, offset, length, collector),
            RequestInput::UserInfo { username } => conn.user_info(&username, collector),
            RequestInput::DisplayName => {
                let username = conn.username().to_string();
                let collector = Collector::new(request, &self.queue, retry, Delivery::DisplayName(self.info.clone()));
                conn.user_info(&username, collector)
            }
            RequestInput::Ad { kind } => conn.request_ad(kind, collector),
            RequestInput::Login(_) | RequestInput::Logout | RequestInput::PlayToken => {
                Err(NetworkError::Fatal(ErrorType::Encoding))
            }
        };

        match sent {
            Ok(channel) => logging::trace!(self.log, "request sent"; "id" => request, "channel" => channel),
            Err(err) => self.request_failed(request, err),
        }
    }

    fn request_failed(&mut self, request: RequestId, err: NetworkError) {
        match err {
            NetworkError::Wait | NetworkError::Fatal(ErrorType::ChannelLimit) => {
                self.queue.reschedule(request, Instant::now() + self.config.backoff());
            }
            NetworkError::Fatal(kind) if kind.is_link_failure() => self.disconnect(kind),
            NetworkError::Fatal(kind) => {
                logging::warn!(self.log, "request cannot be encoded"; "id" => request, "error" => ?kind);
                self.queue.set_result(request, Err(ErrorCode::InvalidRequest));
            }
        }
    }

    /// One bounded wait on the socket, then every received packet is dispatched.
    fn poll_connection(&mut self) {
        let conn = match self.connection.as_mut() {
            Some(conn) => conn,
            None => return,
        };

        let mut failure = match conn.receive(self.config.poll_interval(), &mut self.packets) {
            Ok(()) | Err(NetworkError::Wait) => None,
            Err(NetworkError::Fatal(kind)) => Some(kind),
        };

        for packet in self.packets.drain(..) {
            if let Err(NetworkError::Fatal(kind)) = self.dispatcher.dispatch(conn, &packet) {
                failure.get_or_insert(kind);
                break;
            }
        }

        if let Some(kind) = failure {
            self.disconnect(kind);
        }
    }

    /// Drops a failed connection: channels see their error, in flight requests fail and the
    /// application gets an unsolicited logout result.
    fn disconnect(&mut self, kind: ErrorType) {
        logging::warn!(self.log, "connection lost"; "error" => ?kind);

        if let Some(mut conn) = self.connection.take() {
            conn.close();
        }

        let failed = self.queue.fail_running(ErrorCode::Disconnected, None);
        logging::debug!(self.log, "in flight requests failed"; "count" => failed);

        self.info.lock().state = ConnectionState::Disconnected;
        self.queue.post_result(RequestInput::Logout, Err(ErrorCode::Disconnected));
    }

    fn stop(&mut self) {
        if let Some(mut pending) = self.login.take() {
            pending.context.abort();
            self.queue.set_result(pending.request, Err(ErrorCode::LoginAborted));
        }

        if let Some(mut conn) = self.connection.take() {
            conn.close();
        }

        self.queue.fail_running(ErrorCode::NotLoggedIn, None);
        self.info.lock().state = ConnectionState::LoggedOut;

        logging::info!(self.log, "network thread stopped");
    }
}
