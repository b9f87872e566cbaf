//! The request queue shared by the application and the network thread.
//!
//! A request moves `New -> Running -> Returned -> Processed`. The application posts requests and
//! consumes results; the network thread takes due requests, starts them one by one, completes or
//! reschedules them, and drops the processed ones on its next pass. A request carries a result only
//! once it was returned.
use crate::command::{BrowseKind, PlaylistChange, ToplistKind, FILE_ID_SIZE, ID_SIZE, PLAYLIST_ID_SIZE};
use crate::error::ErrorCode;
use crate::login::Credentials;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type RequestId = u64;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RequestState {
    New,
    Running,
    Returned,
    Processed,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RequestKind {
    Login,
    Logout,
    Search,
    Toplist,
    Browse,
    Playlist,
    PlaylistContainer,
    ChangePlaylist,
    Image,
    AesKey,
    Substream,
    UserInfo,
    DisplayName,
    Ad,
    PlayToken,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RequestInput {
    Login(Credentials),
    Logout,
    Search {
        query: String,
        offset: u32,
        limit: u32,
    },
    Toplist {
        kind: ToplistKind,
        region: String,
        username: String,
    },
    Browse {
        kind: BrowseKind,
        ids: Vec<[u8; ID_SIZE]>,
    },
    Playlist {
        id: [u8; PLAYLIST_ID_SIZE],
        revision: u32,
    },
    PlaylistContainer,
    ChangePlaylist(PlaylistChange),
    Image {
        id: [u8; FILE_ID_SIZE],
    },
    AesKey {
        file_id: [u8; FILE_ID_SIZE],
        track_id: [u8; ID_SIZE],
    },
    Substream {
        file_id: [u8; FILE_ID_SIZE],
        offset: u32,
        length: u32,
    },
    UserInfo {
        username: String,
    },
    /// Looks up the display name of the logged in user. Posted by the network thread itself.
    DisplayName,
    Ad {
        kind: u8,
    },
    PlayToken,
}

impl RequestInput {
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestInput::Login(_) => RequestKind::Login,
            RequestInput::Logout => RequestKind::Logout,
            RequestInput::Search { .. } => RequestKind::Search,
            RequestInput::Toplist { .. } => RequestKind::Toplist,
            RequestInput::Browse { .. } => RequestKind::Browse,
            RequestInput::Playlist { .. } => RequestKind::Playlist,
            RequestInput::PlaylistContainer => RequestKind::PlaylistContainer,
            RequestInput::ChangePlaylist(_) => RequestKind::ChangePlaylist,
            RequestInput::Image { .. } => RequestKind::Image,
            RequestInput::AesKey { .. } => RequestKind::AesKey,
            RequestInput::Substream { .. } => RequestKind::Substream,
            RequestInput::UserInfo { .. } => RequestKind::UserInfo,
            RequestInput::DisplayName => RequestKind::DisplayName,
            RequestInput::Ad { .. } => RequestKind::Ad,
            RequestInput::PlayToken => RequestKind::PlayToken,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RequestOutput {
    Empty,
    LoggedIn {
        username: String,
    },
    /// Everything a channel received, header records in arrival order.
    Channel {
        headers: Vec<Vec<u8>>,
        data: Vec<u8>,
    },
}

pub type RequestResult = Result<Arc<RequestOutput>, ErrorCode>;

/// A returned request as seen by the application.
#[derive(Debug, Clone)]
pub struct Completion {
    pub id: RequestId,
    pub kind: RequestKind,
    pub result: RequestResult,
}

/// A request due for processing, as seen by the network thread.
#[derive(Debug, Clone)]
pub struct DueRequest {
    pub id: RequestId,
    pub input: RequestInput,
}

struct Request {
    id: RequestId,
    input: RequestInput,
    state: RequestState,
    result: Option<RequestResult>,
    // None means never
    deadline: Option<Instant>,
    // Internal requests skip the application and go straight to processed
    visible: bool,
    fetched: bool,
}

impl Request {
    #[inline]
    fn is_pending(&self) -> bool {
        matches!(self.state, RequestState::New | RequestState::Running)
    }

    #[inline]
    fn is_due(&self, now: Instant) -> bool {
        self.is_pending() && self.deadline.map_or(false, |deadline| deadline <= now)
    }
}

struct Shared {
    requests: Vec<Request>,
    next_id: RequestId,
}

impl Shared {
    #[inline]
    fn find_mut(&mut self, id: RequestId) -> Option<&mut Request> {
        self.requests.iter_mut().find(|request| request.id == id)
    }

    #[inline]
    fn has_due(&self, now: Instant) -> bool {
        self.requests.iter().any(|request| request.is_due(now))
    }

    fn push(&mut self, input: RequestInput, visible: bool) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;

        self.requests.push(Request {
            id,
            input,
            state: RequestState::New,
            result: None,
            deadline: Some(Instant::now()),
            visible,
            fetched: false,
        });

        id
    }
}

struct Inner {
    shared: Mutex<Shared>,
    // Signalled when work is posted or the queue shuts down
    wake: Condvar,
    // Signalled when a visible request is returned
    results: Condvar,
    shutdown: AtomicBool,
}

/// Cheaply cloneable handle, every clone refers to the same queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl Default for RequestQueue {
    fn default() -> Self {
        RequestQueue::new()
    }
}

impl RequestQueue {
    pub fn new() -> RequestQueue {
        RequestQueue {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    requests: Vec::new(),
                    next_id: 1,
                }),
                wake: Condvar::new(),
                results: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Posts a request and wakes the network thread.
    pub fn post(&self, input: RequestInput) -> RequestId {
        let id = self.lock().push(input, true);
        self.inner.wake.notify_all();
        id
    }

    /// Posts a request whose result never reaches the application.
    pub fn post_internal(&self, input: RequestInput) -> RequestId {
        let id = self.lock().push(input, false);
        self.inner.wake.notify_all();
        id
    }

    /// Adds an already returned request, used for results nobody asked for.
    pub fn post_result(&self, input: RequestInput, result: RequestResult) -> RequestId {
        let mut shared = self.lock();
        let id = shared.push(input, true);

        if let Some(request) = shared.find_mut(id) {
            request.state = RequestState::Returned;
            request.result = Some(result);
            request.deadline = None;
        }

        drop(shared);
        self.inner.results.notify_all();
        id
    }

    /// Takes the oldest returned request the application has not seen yet.
    pub fn try_next_result(&self) -> Option<Completion> {
        Self::fetch(&mut self.lock())
    }

    /// Like `try_next_result`, waiting up to `timeout` for a result to arrive.
    pub fn next_result(&self, timeout: Duration) -> Option<Completion> {
        let mut shared = self.lock();

        self.inner.results.wait_while_for(
            &mut shared,
            |shared| !shared.requests.iter().any(Self::is_fetchable),
            timeout,
        );

        Self::fetch(&mut shared)
    }

    /// Marks a returned request as consumed. The network thread drops it on its next pass.
    pub fn mark_processed(&self, id: RequestId) -> bool {
        match self.lock().find_mut(id) {
            Some(request) if request.state == RequestState::Returned => {
                request.state = RequestState::Processed;
                true
            }
            _ => false,
        }
    }

    /// Time until the network thread next picks up a request on its own. `None` if nothing is
    /// scheduled.
    pub fn next_deadline_hint(&self) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn state(&self, id: RequestId) -> Option<RequestState> {
        self.lock().requests.iter().find(|request| request.id == id).map(|request| request.state)
    }

    /// Number of requests in any state.
    pub fn len(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().requests.is_empty()
    }

    /// Drops processed requests. Returns the number dropped.
    pub fn remove_processed(&self) -> usize {
        let mut shared = self.lock();
        let count = shared.requests.len();
        shared.requests.retain(|request| request.state != RequestState::Processed);
        count - shared.requests.len()
    }

    /// Hands out every due request in posting order. A taken request is not due again until it is
    /// rescheduled, and keeps its state until `start` is called for it.
    pub fn take_due(&self, now: Instant) -> Vec<DueRequest> {
        let mut shared = self.lock();

        shared
            .requests
            .iter_mut()
            .filter(|request| request.is_due(now))
            .map(|request| {
                request.deadline = None;

                DueRequest {
                    id: request.id,
                    input: request.input.clone(),
                }
            })
            .collect()
    }

    /// Marks a taken request as running, right before the network thread acts on it. Returns false
    /// if it was completed in the meantime.
    pub fn start(&self, id: RequestId) -> bool {
        match self.lock().find_mut(id) {
            Some(request) if request.is_pending() => {
                request.state = RequestState::Running;
                true
            }
            _ => false,
        }
    }

    /// Completes a pending request. Returns false if the request is gone or already completed.
    pub fn set_result(&self, id: RequestId, result: RequestResult) -> bool {
        let mut shared = self.lock();

        let visible = match shared.find_mut(id) {
            Some(request) if request.is_pending() => {
                request.state = match request.visible {
                    true => RequestState::Returned,
                    false => RequestState::Processed,
                };
                request.result = Some(result);
                request.deadline = None;
                request.visible
            }
            _ => return false,
        };

        drop(shared);

        if visible {
            self.inner.results.notify_all();
        }

        true
    }

    /// Schedules a pending request to be picked up again at `at`.
    pub fn reschedule(&self, id: RequestId, at: Instant) -> bool {
        match self.lock().find_mut(id) {
            Some(request) if request.is_pending() => {
                request.state = RequestState::Running;
                request.deadline = Some(at);
                true
            }
            _ => false,
        }
    }

    /// Completes every running request except `except` with the error. Requests that were taken
    /// but not started yet are left alone. Returns the number failed.
    pub fn fail_running(&self, error: ErrorCode, except: Option<RequestId>) -> usize {
        let mut shared = self.lock();
        let mut failed = 0;
        let mut notify = false;

        for request in shared.requests.iter_mut() {
            if request.state != RequestState::Running || Some(request.id) == except {
                continue;
            }

            request.state = match request.visible {
                true => RequestState::Returned,
                false => RequestState::Processed,
            };
            request.result = Some(Err(error));
            request.deadline = None;

            notify |= request.visible;
            failed += 1;
        }

        drop(shared);

        if notify {
            self.inner.results.notify_all();
        }

        failed
    }

    /// Earliest deadline among the pending requests.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock()
            .requests
            .iter()
            .filter(|request| request.is_pending())
            .filter_map(|request| request.deadline)
            .min()
    }

    /// Blocks until a request is due, the timeout passes or the queue shuts down.
    pub fn wait_for_work(&self, timeout: Option<Duration>) {
        let mut shared = self.lock();
        let shutdown = &self.inner.shutdown;
        let idle = |shared: &mut Shared| !shutdown.load(Ordering::Acquire) && !shared.has_due(Instant::now());

        match timeout {
            Some(timeout) => {
                self.inner.wake.wait_while_for(&mut shared, idle, timeout);
            }
            None => self.inner.wake.wait_while(&mut shared, idle),
        }
    }

    /// Asks the network thread to stop and wakes every waiter.
    pub fn shutdown(&self) {
        {
            let _shared = self.lock();
            self.inner.shutdown.store(true, Ordering::Release);
        }

        self.inner.wake.notify_all();
        self.inner.results.notify_all();
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner.shared.lock()
    }

    #[inline]
    fn is_fetchable(request: &Request) -> bool {
        request.state == RequestState::Returned && request.visible && !request.fetched
    }

    fn fetch(shared: &mut Shared) -> Option<Completion> {
        let request = shared.requests.iter_mut().find(|request| Self::is_fetchable(request))?;
        request.fetched = true;

        Some(Completion {
            id: request.id,
            kind: request.input.kind(),
            result: request.result.clone()?,
        })
    }
}
