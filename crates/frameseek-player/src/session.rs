//! Decoder session: a decode thread with an explicit state machine.
//!
//! The backend runs on its own `std::thread`, fed through a request queue.
//! Every decode request carries a [`PresentationIntent`] and the
//! cancellation token of the activity that submitted it. The decode thread
//! skips requests whose token has fired and drops their late pictures, so
//! cancelling an activity never needs a round trip to the thread.
//!
//! ```text
//! Unconfigured --configure--> Configured --flush--> Draining --> Configured
//!        any state --reset--> Reset --configure--> Configured
//! ```

use crate::decoder::{DecoderConfig, VideoDecoder};
use crate::{Picture, PlayerError, Result};
use frameseek_common::AccessUnit;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Callback receiving pictures decoded with [`PresentationIntent::Present`].
///
/// Runs on the decode thread and must not call back into the session.
pub type OutputFn = Box<dyn FnMut(&Picture) + Send>;

/// What to do with the picture a decode request produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationIntent {
    /// Decode only to rebuild reference state.
    Suppressed,
    /// Forward the picture to the output callback.
    Present,
}

/// Lifecycle of a [`DecoderSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconfigured,
    Configured,
    Draining,
    Reset,
    /// The decode thread is gone.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Draining => "draining",
            Self::Reset => "reset",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound on a single `flush`.
    pub flush_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            flush_timeout: Duration::from_secs(5),
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Decode requests submitted with `Suppressed`.
    pub suppressed: u64,
    /// Decode requests submitted with `Present`.
    pub presented: u64,
    /// Pictures handed to the output callback.
    pub delivered: u64,
    /// Pictures dropped because their request was cancelled after decoding.
    pub stale: u64,
    /// Requests skipped because their token fired before decoding.
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    suppressed: AtomicU64,
    presented: AtomicU64,
    delivered: AtomicU64,
    stale: AtomicU64,
    skipped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            suppressed: self.suppressed.load(Ordering::Relaxed),
            presented: self.presented.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

enum Request {
    Configure {
        config: DecoderConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    Decode {
        unit: AccessUnit,
        intent: PresentationIntent,
        cancel: CancellationToken,
    },
    Flush {
        reply: oneshot::Sender<Option<PlayerError>>,
    },
    Reset,
    Shutdown,
}

/// State owned by the decode thread.
struct DecodeLoop {
    decoder: Box<dyn VideoDecoder>,
    output: OutputFn,
    counters: Arc<Counters>,
    configured: bool,
    /// First error since the last flush.
    failed: Option<PlayerError>,
    /// A skipped request left the reference chain incomplete.
    broken: bool,
    awaiting: VecDeque<(u32, PresentationIntent, CancellationToken)>,
}

impl DecodeLoop {
    fn run(mut self, requests: Receiver<Request>) {
        debug!(backend = self.decoder.name(), "Decode thread started");
        while let Ok(request) = requests.recv() {
            match request {
                Request::Configure { config, reply } => {
                    let result = self.decoder.configure(&config);
                    self.configured = result.is_ok();
                    self.broken = false;
                    let _ = reply.send(result);
                }
                Request::Decode {
                    unit,
                    intent,
                    cancel,
                } => self.decode(unit, intent, cancel),
                Request::Flush { reply } => {
                    match self.decoder.flush() {
                        Ok(pictures) => pictures.into_iter().for_each(|p| self.deliver(p)),
                        Err(e) => self.record(0, e),
                    }
                    self.awaiting.clear();
                    let _ = reply.send(self.failed.take());
                }
                Request::Reset => {
                    self.decoder.reset();
                    self.configured = false;
                    self.broken = false;
                    self.failed = None;
                    self.awaiting.clear();
                }
                Request::Shutdown => break,
            }
        }
        debug!("Decode thread stopped");
    }

    fn decode(&mut self, unit: AccessUnit, intent: PresentationIntent, cancel: CancellationToken) {
        let index = unit.sequence_index;
        if cancel.is_cancelled() {
            trace!(index, "Skipping cancelled decode");
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            self.broken = true;
            return;
        }
        if !self.configured {
            self.record(index, PlayerError::invalid_state("decoder is not configured"));
            return;
        }
        if unit.is_keyframe {
            self.broken = false;
        } else if self.broken {
            self.record(
                index,
                PlayerError::decode(index, "reference chain broken by a skipped request"),
            );
            return;
        }

        trace!(index, ?intent, "Decoding");
        self.awaiting.push_back((index, intent, cancel));
        match self.decoder.decode(&unit) {
            Ok(pictures) => pictures.into_iter().for_each(|p| self.deliver(p)),
            Err(e) => {
                self.awaiting.retain(|(i, _, _)| *i != index);
                // later deltas would decode against a damaged reference
                self.broken = true;
                self.record(index, e);
            }
        }
    }

    fn deliver(&mut self, picture: Picture) {
        let index = picture.sequence_index;
        let Some(pos) = self.awaiting.iter().position(|(i, _, _)| *i == index) else {
            trace!(index, "Dropping picture with no pending request");
            return;
        };
        let Some((_, intent, cancel)) = self.awaiting.remove(pos) else {
            return;
        };

        if cancel.is_cancelled() {
            trace!(index, "Dropping stale picture");
            self.counters.stale.fetch_add(1, Ordering::Relaxed);
        } else if intent == PresentationIntent::Present {
            (self.output)(&picture);
            self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record(&mut self, index: u32, error: PlayerError) {
        let error = match error {
            e @ PlayerError::Decode { .. } => e,
            other => PlayerError::decode(index, other.to_string()),
        };
        warn!(index, error = %error, "Decode failed");
        self.failed.get_or_insert(error);
    }
}

/// Front end of the decode thread.
pub struct DecoderSession {
    requests: Sender<Request>,
    thread: Option<JoinHandle<()>>,
    state: SessionState,
    options: SessionOptions,
    counters: Arc<Counters>,
    backend: &'static str,
    poisoned: bool,
    seen_keyframe: bool,
    continuation: Option<u32>,
    last_token: Option<CancellationToken>,
    pending: usize,
}

impl DecoderSession {
    /// Spawn the decode thread around `decoder`.
    pub fn new(
        decoder: Box<dyn VideoDecoder>,
        output: OutputFn,
        options: SessionOptions,
    ) -> Result<Self> {
        let (requests, receiver) = mpsc::channel();
        let counters = Arc::new(Counters::default());
        let backend = decoder.name();

        let decode_loop = DecodeLoop {
            decoder,
            output,
            counters: counters.clone(),
            configured: false,
            failed: None,
            broken: false,
            awaiting: VecDeque::new(),
        };
        let thread = thread::Builder::new()
            .name(format!("frameseek-decode-{backend}"))
            .spawn(move || decode_loop.run(receiver))?;

        Ok(Self {
            requests,
            thread: Some(thread),
            state: SessionState::Unconfigured,
            options,
            counters,
            backend,
            poisoned: false,
            seen_keyframe: false,
            continuation: None,
            last_token: None,
            pending: 0,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Decode requests submitted since the last flush or reset.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Next index decodable without a replay.
    pub fn continuation(&self) -> Option<u32> {
        if self.state != SessionState::Configured || self.poisoned {
            return None;
        }
        match &self.last_token {
            Some(token) if token.is_cancelled() => None,
            _ => self.continuation,
        }
    }

    fn send(&mut self, request: Request) -> Result<()> {
        self.requests.send(request).map_err(|_| {
            self.state = SessionState::Closed;
            PlayerError::Closed
        })
    }

    /// Configure the backend. Allowed from `Unconfigured` or `Reset`.
    pub async fn configure(&mut self, config: DecoderConfig) -> Result<()> {
        match self.state {
            SessionState::Unconfigured | SessionState::Reset => {}
            SessionState::Closed => return Err(PlayerError::Closed),
            other => {
                return Err(PlayerError::invalid_state(format!(
                    "cannot configure a {other} session"
                )))
            }
        }
        config.validate()?;

        let (reply, response) = oneshot::channel();
        self.send(Request::Configure { config, reply })?;
        response.await.map_err(|_| PlayerError::Closed)??;

        debug!(backend = self.backend, state = %SessionState::Configured, "Session configured");
        self.state = SessionState::Configured;
        self.poisoned = false;
        self.seen_keyframe = false;
        self.continuation = None;
        self.last_token = None;
        self.pending = 0;
        Ok(())
    }

    /// Submit one unit. Returns once the request is queued.
    pub fn decode(
        &mut self,
        unit: AccessUnit,
        intent: PresentationIntent,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let index = unit.sequence_index;
        if self.state != SessionState::Configured {
            return Err(PlayerError::invalid_state(format!(
                "cannot decode in a {} session",
                self.state
            )));
        }
        if self.poisoned {
            return Err(PlayerError::decode(index, "session poisoned; reset required"));
        }
        if cancel.is_cancelled() {
            return Err(PlayerError::Cancelled);
        }
        if unit.is_keyframe {
            self.seen_keyframe = true;
        } else if !self.seen_keyframe {
            self.poisoned = true;
            self.continuation = None;
            return Err(PlayerError::decode(index, "delta frame before any keyframe"));
        }

        let counter = match intent {
            PresentationIntent::Suppressed => &self.counters.suppressed,
            PresentationIntent::Present => &self.counters.presented,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.send(Request::Decode {
            unit,
            intent,
            cancel: cancel.clone(),
        })?;
        self.continuation = Some(index + 1);
        self.last_token = Some(cancel.clone());
        self.pending += 1;
        Ok(())
    }

    /// Wait until every submitted unit has produced its output.
    ///
    /// Returns the first decode error raised since the previous flush; the
    /// session is then poisoned until `reset`.
    pub async fn flush(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.state != SessionState::Configured {
            return Err(PlayerError::invalid_state(format!(
                "cannot flush a {} session",
                self.state
            )));
        }
        let (reply, response) = oneshot::channel();
        self.send(Request::Flush { reply })?;
        self.state = SessionState::Draining;

        let timeout = self.options.flush_timeout;
        let outcome = tokio::select! {
            biased;
            reply = response => reply.map_err(|_| PlayerError::Closed),
            _ = cancel.cancelled() => {
                self.state = SessionState::Configured;
                return Err(PlayerError::Cancelled);
            }
            _ = tokio::time::sleep(timeout) => {
                warn!(?timeout, pending = self.pending, "Flush timed out");
                self.state = SessionState::Configured;
                self.poisoned = true;
                self.continuation = None;
                return Err(PlayerError::FlushTimeout(timeout));
            }
        };

        match outcome {
            Ok(None) => {
                self.state = SessionState::Configured;
                self.pending = 0;
                Ok(())
            }
            Ok(Some(error)) => {
                self.state = SessionState::Configured;
                self.pending = 0;
                self.poisoned = true;
                self.continuation = None;
                Err(error)
            }
            Err(e) => {
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    /// Discard all decode state. A `configure` is required afterwards.
    pub fn reset(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.send(Request::Reset).is_err() {
            return;
        }
        debug!(state = %SessionState::Reset, "Session reset");
        self.state = SessionState::Reset;
        self.poisoned = false;
        self.seen_keyframe = false;
        self.continuation = None;
        self.last_token = None;
        self.pending = 0;
    }
}

impl Drop for DecoderSession {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Decode thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for DecoderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderSession")
            .field("backend", &self.backend)
            .field("state", &self.state)
            .field("continuation", &self.continuation)
            .field("pending", &self.pending)
            .finish()
    }
}
