//! The application facing handle. It owns the network thread and talks to it through the request
//! queue only.
use crate::config::SessionConfig;
use crate::login::Credentials;
use crate::net::resolve::{DnsResolver, Resolve};
use crate::request::{Completion, RequestId, RequestInput, RequestQueue};
use crate::worker::Worker;
use flint::logging;
use parking_lot::{Mutex, MutexGuard};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    LoggedOut,
    LoggedIn,
    /// The link failed while logged in.
    Disconnected,
}

/// Session details published by the network thread.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub state: ConnectionState,
    pub username: Option<String>,
    pub country: Option<String>,
    pub display_name: Option<String>,
}

impl Default for SessionInfo {
    fn default() -> Self {
        SessionInfo {
            state: ConnectionState::LoggedOut,
            username: None,
            country: None,
            display_name: None,
        }
    }
}

/// Shared, lock protected session details.
#[derive(Clone, Default)]
pub struct SharedInfo(Arc<Mutex<SessionInfo>>);

impl SharedInfo {
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, SessionInfo> {
        self.0.lock()
    }

    #[inline]
    pub fn snapshot(&self) -> SessionInfo {
        self.lock().clone()
    }
}

pub struct Session {
    log: logging::Logger,
    queue: RequestQueue,
    info: SharedInfo,
    thread: Option<thread::JoinHandle<()>>,
}

impl Session {
    /// Starts a session that finds access points through the system's DNS configuration.
    pub fn new(config: SessionConfig, log: &logging::Logger) -> io::Result<Session> {
        let resolver = DnsResolver::from_system_conf()?;
        Session::with_resolver(config, Box::new(resolver), log)
    }

    /// Starts a session with a custom resolver.
    pub fn with_resolver(config: SessionConfig, resolver: Box<dyn Resolve>, log: &logging::Logger) -> io::Result<Session> {
        let queue = RequestQueue::new();
        let info = SharedInfo::default();

        let worker = Worker::new(config, resolver, queue.clone(), info.clone(), log);

        let thread = thread::Builder::new()
            .name("quaver-network".to_string())
            .spawn(move || worker.run())?;

        let log = log.new(logging::o!("thread" => "application"));
        logging::debug!(log, "session started");

        Ok(Session {
            log,
            queue,
            info,
            thread: Some(thread),
        })
    }

    #[inline]
    pub fn post(&self, input: RequestInput) -> RequestId {
        self.queue.post(input)
    }

    pub fn login<U: Into<String>, P: Into<String>>(&self, username: U, password: P) -> RequestId {
        self.post(RequestInput::Login(Credentials::new(username, password)))
    }

    pub fn logout(&self) -> RequestId {
        self.post(RequestInput::Logout)
    }

    pub fn search<Q: Into<String>>(&self, query: Q, offset: u32, limit: u32) -> RequestId {
        self.post(RequestInput::Search {
            query: query.into(),
            offset,
            limit,
        })
    }

    #[inline]
    pub fn try_next_result(&self) -> Option<Completion> {
        self.queue.try_next_result()
    }

    #[inline]
    pub fn next_result(&self, timeout: Duration) -> Option<Completion> {
        self.queue.next_result(timeout)
    }

    #[inline]
    pub fn mark_processed(&self, id: RequestId) -> bool {
        self.queue.mark_processed(id)
    }

    #[inline]
    pub fn next_deadline_hint(&self) -> Option<Duration> {
        self.queue.next_deadline_hint()
    }

    pub fn state(&self) -> ConnectionState {
        self.info.lock().state
    }

    pub fn username(&self) -> Option<String> {
        self.info.lock().username.clone()
    }

    pub fn country(&self) -> Option<String> {
        self.info.lock().country.clone()
    }

    pub fn display_name(&self) -> Option<String> {
        self.info.lock().display_name.clone()
    }

    pub fn info(&self) -> SessionInfo {
        self.info.snapshot()
    }

    /// Logs out, stops the network thread and waits for it.
    pub fn release(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => return,
        };

        self.queue.shutdown();

        if thread.join().is_err() {
            logging::error!(self.log, "network thread panicked");
        } else {
            logging::debug!(self.log, "session released");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
