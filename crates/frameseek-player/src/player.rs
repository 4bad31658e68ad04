//! Player driver and control handle.
//!
//! Two tasks back a player: the ingest task moves worker messages into the
//! [`SharedStore`], and the driver task owns the decoder session and runs one
//! command at a time. The handle cancels the active command's token before
//! queueing a new one, so a superseded seek or playback run stops at its next
//! check and its late pictures are dropped by the decode thread.

use crate::clock::{PlaybackClock, StopReason};
use crate::decoder::{DecoderConfig, VideoDecoder};
use crate::picture::{Picture, PixelSink};
use crate::seek::{SeekEngine, SeekReport};
use crate::session::{DecoderSession, OutputFn, SessionOptions};
use crate::store::{Availability, IngestStatus, SharedStore};
use crate::worker::{spawn_parser_worker, LocalResolver, WorkerHandle, WorkerOptions};
use crate::{PlayerError, Result};
use frameseek_common::{ErrorDescriptor, StreamConfig, WorkerMessage};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Player tuning.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    pub session: SessionOptions,
    /// Presented decodes allowed in flight before playback flushes.
    pub max_decode_queue: usize,
    /// Event broadcast buffer.
    pub event_capacity: usize,
    /// Show frame 0 as soon as it is parsed, unless a command came first.
    pub present_first_frame: bool,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            max_decode_queue: 16,
            event_capacity: 256,
            present_first_frame: true,
        }
    }
}

/// Notifications published by a running player.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StreamReady(StreamConfig),
    ParseComplete { total: u32 },
    ParseFailed(ErrorDescriptor),
    Presented { index: u32 },
    SeekCompleted(SeekReport),
    SeekCancelled { target: u32 },
    PlaybackStarted { from: u32 },
    PlaybackStopped { at: u32, reason: StopReason },
    DecodeWarning { index: u32, reason: String },
}

/// What a finished command did.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Paused { cursor: u32 },
    Seeked(SeekReport),
    Played { reason: StopReason, next: u32 },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Play { from: Option<u32> },
    Pause,
    Seek(u32),
    Next,
    Prev,
    Shutdown,
}

struct Envelope {
    command: Command,
    token: CancellationToken,
    reply: oneshot::Sender<Result<CommandOutcome>>,
}

/// Resolves when the driver has finished the command.
#[must_use = "a ticket does nothing unless awaited"]
#[derive(Debug)]
pub struct CommandTicket {
    rx: oneshot::Receiver<Result<CommandOutcome>>,
}

impl Future for CommandTicket {
    type Output = Result<CommandOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|reply| reply.map_err(|_| PlayerError::Closed).and_then(|r| r))
    }
}

/// Control surface of a running player.
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<Envelope>,
    active: Arc<Mutex<CancellationToken>>,
    events: broadcast::Sender<PlayerEvent>,
    current: Arc<AtomicI64>,
    store: SharedStore,
    driver: Option<JoinHandle<()>>,
    ingest: Option<JoinHandle<()>>,
    worker: Option<WorkerHandle>,
}

impl PlayerHandle {
    fn dispatch(&self, command: Command) -> CommandTicket {
        let token = {
            let mut active = self.active.lock();
            active.cancel();
            let token = CancellationToken::new();
            *active = token.clone();
            token
        };
        let (reply, rx) = oneshot::channel();
        debug!(?command, "Dispatching command");
        // a closed driver drops the reply, resolving the ticket to `Closed`
        let _ = self.commands.send(Envelope {
            command,
            token,
            reply,
        });
        CommandTicket { rx }
    }

    /// Play from the cursor. Resolves when the run ends.
    pub fn play(&self) -> CommandTicket {
        self.dispatch(Command::Play { from: None })
    }

    /// Play starting at frame `index`.
    pub fn play_from(&self, index: u32) -> CommandTicket {
        self.dispatch(Command::Play { from: Some(index) })
    }

    pub fn pause(&self) -> CommandTicket {
        self.dispatch(Command::Pause)
    }

    /// Present exactly frame `index`.
    pub fn seek(&self, index: u32) -> CommandTicket {
        if let Some(worker) = &self.worker {
            worker.seek(index);
        }
        self.dispatch(Command::Seek(index))
    }

    pub fn next(&self) -> CommandTicket {
        self.dispatch(Command::Next)
    }

    pub fn prev(&self) -> CommandTicket {
        self.dispatch(Command::Prev)
    }

    pub fn shutdown(&self) -> CommandTicket {
        if let Some(worker) = &self.worker {
            worker.shutdown();
        }
        self.dispatch(Command::Shutdown)
    }

    /// Last presented frame.
    pub fn current_frame(&self) -> Option<u32> {
        u32::try_from(self.current.load(Ordering::SeqCst)).ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn config(&self) -> Option<StreamConfig> {
        self.store.config()
    }

    pub async fn wait_for_config(&self) -> Result<StreamConfig> {
        self.store.wait_for_config(&CancellationToken::new()).await
    }

    /// Wait until parsing finished; returns the frame count.
    pub async fn wait_for_complete(&self) -> Result<u32> {
        self.store.wait_for_complete(&CancellationToken::new()).await
    }

    /// Shut down and wait for every task to exit.
    pub async fn join(mut self) {
        let _ = self.shutdown().await;
        if let Some(worker) = self.worker.take() {
            worker.join().await;
        }
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!(error = %e, "Player driver panicked");
            }
        }
        if let Some(ingest) = self.ingest.take() {
            ingest.abort();
            let _ = ingest.await;
        }
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        self.active.lock().cancel();
    }
}

impl std::fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerHandle")
            .field("current", &self.current_frame())
            .field("available", &self.store.len())
            .finish()
    }
}

/// Start a player fed by `messages`.
pub fn spawn_player(
    options: PlayerOptions,
    decoder: Box<dyn VideoDecoder>,
    sink: Box<dyn PixelSink>,
    messages: mpsc::Receiver<WorkerMessage>,
) -> Result<PlayerHandle> {
    let store = SharedStore::new();
    let (events, _) = broadcast::channel(options.event_capacity.max(1));
    let current = Arc::new(AtomicI64::new(-1));
    let sink = Arc::new(Mutex::new(sink));

    let output: OutputFn = {
        let sink = sink.clone();
        let current = current.clone();
        let events = events.clone();
        Box::new(move |picture: &Picture| {
            sink.lock().present(picture, picture.rect());
            current.store(picture.sequence_index as i64, Ordering::SeqCst);
            let _ = events.send(PlayerEvent::Presented {
                index: picture.sequence_index,
            });
        })
    };
    let session = DecoderSession::new(decoder, output, options.session.clone())?;
    info!(backend = session.backend(), "Player started");

    let ingest = tokio::spawn(ingest(store.clone(), sink, events.clone(), messages));

    let (commands, command_rx) = mpsc::unbounded_channel();
    let active = Arc::new(Mutex::new(CancellationToken::new()));
    let driver = Driver {
        store: store.clone(),
        session,
        engine: None,
        max_decode_queue: options.max_decode_queue,
        events: events.clone(),
        current: current.clone(),
        active: active.clone(),
    };
    let driver = tokio::spawn(driver.run(command_rx, options.present_first_frame));

    Ok(PlayerHandle {
        commands,
        active,
        events,
        current,
        store,
        driver: Some(driver),
        ingest: Some(ingest),
        worker: None,
    })
}

/// Open a local file (path or `file://` URL) and start a player on it.
pub fn open_player(
    url: &str,
    worker_options: WorkerOptions,
    options: PlayerOptions,
    decoder: Box<dyn VideoDecoder>,
    sink: Box<dyn PixelSink>,
) -> Result<PlayerHandle> {
    let (worker, messages) = spawn_parser_worker(worker_options, Arc::new(LocalResolver));
    if !worker.start(url) {
        return Err(PlayerError::Closed);
    }
    let mut handle = spawn_player(options, decoder, sink, messages)?;
    handle.worker = Some(worker);
    Ok(handle)
}

async fn ingest(
    store: SharedStore,
    sink: Arc<Mutex<Box<dyn PixelSink>>>,
    events: broadcast::Sender<PlayerEvent>,
    mut messages: mpsc::Receiver<WorkerMessage>,
) {
    let fail = |error: ErrorDescriptor| {
        store.fail(error.clone());
        let _ = events.send(PlayerEvent::ParseFailed(error));
    };

    while let Some(message) = messages.recv().await {
        match message {
            WorkerMessage::Config(config) => {
                let (width, height) = (config.width, config.height);
                if let Err(e) = store.set_config(config.clone()) {
                    warn!(error = %e, "Ignoring repeated stream config");
                    continue;
                }
                info!(codec = %config.codec, width, height, fps = config.fps, "Stream ready");
                sink.lock().resize(width, height);
                let _ = events.send(PlayerEvent::StreamReady(config));
            }
            WorkerMessage::Chunk(units) => {
                if let Err(e) = store.append(units) {
                    let error = match e {
                        PlayerError::Parse(desc) => desc,
                        other => ErrorDescriptor::parse(other.to_string()),
                    };
                    fail(error);
                    return;
                }
            }
            WorkerMessage::KeyframeIndex(keyframes) => {
                store.verify_keyframes(&keyframes);
            }
            WorkerMessage::Complete { total } => {
                store.complete(total);
                let _ = events.send(PlayerEvent::ParseComplete { total });
            }
            WorkerMessage::Error(error) => {
                fail(error);
                return;
            }
            WorkerMessage::Seeked(index) => debug!(index, "Worker acknowledged seek"),
        }
    }

    if matches!(
        store.progress().status,
        IngestStatus::Pending | IngestStatus::Parsing
    ) {
        fail(ErrorDescriptor::io("parser worker disconnected"));
    }
}

struct Driver {
    store: SharedStore,
    session: DecoderSession,
    engine: Option<SeekEngine>,
    max_decode_queue: usize,
    events: broadcast::Sender<PlayerEvent>,
    current: Arc<AtomicI64>,
    /// Token of the latest dispatched command, shared with the handle.
    active: Arc<Mutex<CancellationToken>>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Envelope>,
        mut first_frame_pending: bool,
    ) {
        loop {
            let envelope = if first_frame_pending {
                let store = self.store.clone();
                let token = self.active.lock().clone();
                tokio::select! {
                    biased;
                    envelope = commands.recv() => envelope,
                    availability = store.wait_for(0, &token) => {
                        first_frame_pending = false;
                        if availability == Availability::Ready {
                            self.present_first_frame(&token).await;
                        }
                        continue;
                    }
                }
            } else {
                commands.recv().await
            };
            // a command from the caller takes over the display
            first_frame_pending = false;
            let Some(Envelope {
                command,
                token,
                reply,
            }) = envelope
            else {
                break;
            };

            if command == Command::Shutdown {
                let _ = reply.send(Ok(CommandOutcome::Shutdown));
                break;
            }
            let result = if token.is_cancelled() {
                debug!(?command, "Command superseded before it started");
                if let Command::Seek(target) = command {
                    self.emit(PlayerEvent::SeekCancelled { target });
                }
                Err(PlayerError::Cancelled)
            } else {
                self.execute(command, &token).await
            };
            let _ = reply.send(result);
        }
        info!("Player stopped");
    }

    /// Present frame 0 without a command; a dispatched command cancels it.
    async fn present_first_frame(&mut self, token: &CancellationToken) {
        let engine = match self.engine(token).await {
            Ok(engine) => engine,
            Err(e) => {
                debug!(error = %e, "First frame skipped");
                return;
            }
        };
        match engine.seek_to(&mut self.session, 0, token).await {
            Ok(_) => debug!("First frame presented"),
            Err(PlayerError::Cancelled) => debug!("First frame superseded"),
            Err(e) => {
                warn!(error = %e, "First frame failed");
                let index = match &e {
                    PlayerError::Decode { index, .. } => *index,
                    _ => 0,
                };
                self.emit(PlayerEvent::DecodeWarning {
                    index,
                    reason: e.to_string(),
                });
                self.session.reset();
            }
        }
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn last_presented(&self) -> i64 {
        self.current.load(Ordering::SeqCst)
    }

    fn cursor(&self) -> u32 {
        u32::try_from(self.last_presented() + 1).unwrap_or(0)
    }

    async fn engine(&mut self, token: &CancellationToken) -> Result<SeekEngine> {
        if let Some(engine) = &self.engine {
            return Ok(engine.clone());
        }
        let config = self.store.wait_for_config(token).await?;
        let engine = SeekEngine::new(self.store.clone(), DecoderConfig::from_stream(&config));
        self.engine = Some(engine.clone());
        Ok(engine)
    }

    async fn execute(&mut self, command: Command, token: &CancellationToken) -> Result<CommandOutcome> {
        match command {
            Command::Pause => Ok(CommandOutcome::Paused {
                cursor: self.cursor(),
            }),
            Command::Play { from } => self.play(from, token).await,
            Command::Seek(target) => self.seek(target, token, false).await,
            Command::Next => {
                let target = self.cursor();
                self.seek(target, token, true).await
            }
            Command::Prev => {
                let target = self.last_presented().max(0) - 1;
                match u32::try_from(target) {
                    Ok(target) => self.seek(target, token, false).await,
                    Err(_) => Err(PlayerError::out_of_range(target, self.store.len())),
                }
            }
            Command::Shutdown => Ok(CommandOutcome::Shutdown),
        }
    }

    async fn seek(
        &mut self,
        target: u32,
        token: &CancellationToken,
        step: bool,
    ) -> Result<CommandOutcome> {
        let engine = self.engine(token).await?;
        let result = if step {
            engine.step_forward(&mut self.session, target, token).await
        } else {
            engine.seek_to(&mut self.session, target, token).await
        };
        match result {
            Ok(report) => {
                self.emit(PlayerEvent::SeekCompleted(report));
                Ok(CommandOutcome::Seeked(report))
            }
            Err(PlayerError::Cancelled) => {
                debug!(target, "Seek cancelled");
                self.emit(PlayerEvent::SeekCancelled { target });
                Err(PlayerError::Cancelled)
            }
            Err(e @ PlayerError::OutOfRange { .. }) => Err(e),
            Err(e) => {
                warn!(target, error = %e, "Seek failed");
                let index = match &e {
                    PlayerError::Decode { index, .. } => *index,
                    _ => target,
                };
                self.emit(PlayerEvent::DecodeWarning {
                    index,
                    reason: e.to_string(),
                });
                self.session.reset();
                Err(e)
            }
        }
    }

    async fn play(
        &mut self,
        from: Option<u32>,
        token: &CancellationToken,
    ) -> Result<CommandOutcome> {
        let engine = self.engine(token).await?;
        let config = self.store.wait_for_config(token).await?;
        let clock = PlaybackClock::for_stream(&config, self.max_decode_queue);
        if let Some(index) = from.filter(|&i| i >= config.total_frames) {
            return Err(PlayerError::out_of_range(index, config.total_frames));
        }
        let from = from.unwrap_or_else(|| self.cursor());

        self.emit(PlayerEvent::PlaybackStarted { from });
        let outcome = clock.run(&engine, &mut self.session, from, token).await;
        for (index, reason) in &outcome.recovered {
            self.emit(PlayerEvent::DecodeWarning {
                index: *index,
                reason: reason.clone(),
            });
        }
        if let StopReason::DecodeError { index, reason } = &outcome.reason {
            self.emit(PlayerEvent::DecodeWarning {
                index: *index,
                reason: reason.clone(),
            });
            self.session.reset();
        }
        self.emit(PlayerEvent::PlaybackStopped {
            at: outcome.next,
            reason: outcome.reason.clone(),
        });
        Ok(CommandOutcome::Played {
            reason: outcome.reason,
            next: outcome.next,
        })
    }
}
