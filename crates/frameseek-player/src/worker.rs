//! Background container parsing.
//!
//! The worker owns the byte source and the demuxer and talks to the rest of
//! the player only through [`WorkerCommand`] and [`WorkerMessage`].

use async_trait::async_trait;
use bytes::Bytes;
use frameseek_common::{ErrorDescriptor, WorkerCommand, WorkerMessage};
use frameseek_media::{DemuxEvent, DemuxOptions, Mp4Demuxer};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An ordered stream of container bytes.
#[async_trait]
pub trait ByteSource: Send {
    /// Next piece of the container, `None` at end of input.
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>>;

    /// Total length, when known.
    fn size_hint(&self) -> Option<u64> {
        None
    }
}

/// Reads a local file in fixed-size pieces.
pub struct FileSource {
    file: tokio::fs::File,
    chunk_size: usize,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>, chunk_size: usize) -> io::Result<Self> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            file,
            chunk_size: chunk_size.max(1),
            len,
        })
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let mut buf = vec![0u8; self.chunk_size];
        let n = self.file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.len)
    }
}

/// Serves an in-memory buffer in fixed-size pieces.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
    chunk_size: usize,
    pos: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>, chunk_size: usize) -> Self {
        Self {
            data: data.into(),
            chunk_size: chunk_size.max(1),
            pos: 0,
        }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let end = (self.pos + self.chunk_size).min(self.data.len());
        let chunk = self.data.slice(self.pos..end);
        self.pos = end;
        Ok(Some(chunk))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// Turns a source URL into a [`ByteSource`].
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn open(&self, url: &str, chunk_size: usize) -> io::Result<Box<dyn ByteSource>>;
}

/// Resolves local paths and `file://` URLs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalResolver;

impl LocalResolver {
    fn path_of(url: &str) -> io::Result<PathBuf> {
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        if let Some((scheme, _)) = url.split_once("://") {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported source scheme: {scheme}"),
            ));
        }
        Ok(PathBuf::from(url))
    }
}

#[async_trait]
impl SourceResolver for LocalResolver {
    async fn open(&self, url: &str, chunk_size: usize) -> io::Result<Box<dyn ByteSource>> {
        let path = Self::path_of(url)?;
        Ok(Box::new(FileSource::open(path, chunk_size).await?))
    }
}

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub read_chunk_size: usize,
    pub demux: DemuxOptions,
    /// Outbound message queue depth.
    pub channel_capacity: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            read_chunk_size: 64 * 1024,
            demux: DemuxOptions::default(),
            channel_capacity: 64,
        }
    }
}

/// Control side of a running parser worker.
#[derive(Debug)]
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn send(&self, command: WorkerCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Open `url` and start parsing.
    pub fn start(&self, url: impl Into<String>) -> bool {
        self.send(WorkerCommand::Start { url: url.into() })
    }

    pub fn seek(&self, frame_index: u32) -> bool {
        self.send(WorkerCommand::Seek { frame_index })
    }

    /// Stop the worker without waiting for it.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the worker and wait for it to exit.
    pub async fn join(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Parser worker panicked");
        }
    }
}

/// Spawn a parser worker on the current runtime.
pub fn spawn_parser_worker(
    options: WorkerOptions,
    resolver: Arc<dyn SourceResolver>,
) -> (WorkerHandle, mpsc::Receiver<WorkerMessage>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (messages_tx, messages_rx) = mpsc::channel(options.channel_capacity.max(1));
    let cancel = CancellationToken::new();

    let worker = ParserWorker {
        options,
        resolver,
        commands: commands_rx,
        messages: messages_tx,
        cancel: cancel.clone(),
        started: false,
    };
    let task = tokio::spawn(worker.run());

    (
        WorkerHandle {
            commands: commands_tx,
            cancel,
            task,
        },
        messages_rx,
    )
}

/// Outbound channel closed; nobody is listening.
struct Disconnected;

struct ParserWorker {
    options: WorkerOptions,
    resolver: Arc<dyn SourceResolver>,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    messages: mpsc::Sender<WorkerMessage>,
    cancel: CancellationToken,
    started: bool,
}

impl ParserWorker {
    async fn run(mut self) {
        loop {
            let command = tokio::select! {
                command = self.commands.recv() => command,
                _ = self.cancel.cancelled() => break,
            };
            let Some(command) = command else { break };
            if self.handle(command).await.is_err() {
                break;
            }
        }
        debug!("Parser worker stopped");
    }

    async fn handle(&mut self, command: WorkerCommand) -> Result<(), Disconnected> {
        match command {
            WorkerCommand::Start { url } if !self.started => {
                self.started = true;
                self.parse(&url).await
            }
            WorkerCommand::Start { url } => {
                warn!(url = %url, "Parser worker already started, ignoring");
                Ok(())
            }
            WorkerCommand::Seek { frame_index } => {
                self.emit(WorkerMessage::Seeked(frame_index)).await
            }
        }
    }

    async fn emit(&self, message: WorkerMessage) -> Result<(), Disconnected> {
        self.messages.send(message).await.map_err(|_| Disconnected)
    }

    async fn fail(&self, error: ErrorDescriptor) -> Result<(), Disconnected> {
        warn!(error = %error, "Parsing failed");
        self.emit(WorkerMessage::Error(error)).await
    }

    async fn parse(&mut self, url: &str) -> Result<(), Disconnected> {
        let mut source = match self
            .resolver
            .open(url, self.options.read_chunk_size)
            .await
        {
            Ok(source) => source,
            Err(e) => return self.fail(ErrorDescriptor::io(format!("{url}: {e}"))).await,
        };
        info!(url = %url, size = ?source.size_hint(), "Parsing started");

        let mut demuxer = Mp4Demuxer::new(self.options.demux.clone());
        loop {
            while let Ok(command) = self.commands.try_recv() {
                match command {
                    WorkerCommand::Seek { frame_index } => {
                        self.emit(WorkerMessage::Seeked(frame_index)).await?
                    }
                    WorkerCommand::Start { url } => {
                        warn!(url = %url, "Parser worker already started, ignoring")
                    }
                }
            }

            let chunk = tokio::select! {
                chunk = source.next_chunk() => chunk,
                _ = self.cancel.cancelled() => return Ok(()),
            };
            let (events, at_end) = match chunk {
                Ok(Some(bytes)) => (demuxer.push(&bytes), false),
                Ok(None) => (demuxer.finish(), true),
                Err(e) => return self.fail(ErrorDescriptor::io(e.to_string())).await,
            };
            let events = match events {
                Ok(events) => events,
                Err(e) => return self.fail(e.descriptor()).await,
            };

            for event in events {
                let message = match event {
                    DemuxEvent::Config(config) => {
                        info!(
                            codec = %config.codec,
                            width = config.width,
                            height = config.height,
                            frames = config.total_frames,
                            "Stream config parsed"
                        );
                        WorkerMessage::Config(config)
                    }
                    DemuxEvent::Units(units) => WorkerMessage::Chunk(units),
                };
                self.emit(message).await?;
            }

            if at_end {
                let total = demuxer.emitted();
                self.emit(WorkerMessage::KeyframeIndex(demuxer.keyframe_index()))
                    .await?;
                self.emit(WorkerMessage::Complete { total }).await?;
                info!(total, "Parsing complete");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use frameseek_common::ErrorKind;
    use frameseek_media::synth::SyntheticStream;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(data: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    fn options(chunk: usize) -> WorkerOptions {
        WorkerOptions {
            read_chunk_size: chunk,
            demux: DemuxOptions {
                batch_size: 16,
                ..DemuxOptions::default()
            },
            channel_capacity: 4,
        }
    }

    async fn collect_until_terminal(rx: &mut mpsc::Receiver<WorkerMessage>) -> Vec<WorkerMessage> {
        let mut out = Vec::new();
        while let Some(message) = rx.recv().await {
            let terminal = message.is_terminal();
            out.push(message);
            if terminal {
                break;
            }
        }
        out
    }

    #[tokio::test]
    async fn test_memory_source_chunks() {
        let mut source = MemorySource::new(vec![1u8, 2, 3, 4, 5], 2);
        assert_eq!(source.size_hint(), Some(5));
        let mut pieces = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            pieces.push(chunk.to_vec());
        }
        assert_eq!(pieces, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[test]
    fn test_local_resolver_paths() {
        assert_eq!(
            LocalResolver::path_of("file:///tmp/a.mp4").unwrap(),
            PathBuf::from("/tmp/a.mp4")
        );
        assert_eq!(
            LocalResolver::path_of("clips/a.mp4").unwrap(),
            PathBuf::from("clips/a.mp4")
        );
        let err = LocalResolver::path_of("https://example.com/a.mp4").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_parses_file_in_pieces() {
        let data = SyntheticStream::new(90, 30.0).keyframe_interval(30).build();
        let file = write_file(&data);

        let (handle, mut rx) = spawn_parser_worker(options(1000), Arc::new(LocalResolver));
        assert!(handle.start(format!("file://{}", file.path().display())));
        let messages = collect_until_terminal(&mut rx).await;

        assert_matches!(&messages[0], WorkerMessage::Config(c) if c.total_frames == 90);
        let units: Vec<u32> = messages
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::Chunk(units) => Some(units.iter().map(|u| u.sequence_index)),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(units, (0..90).collect::<Vec<_>>());

        let n = messages.len();
        assert_eq!(messages[n - 2], WorkerMessage::KeyframeIndex(vec![0, 30, 60]));
        assert_eq!(messages[n - 1], WorkerMessage::Complete { total: 90 });

        // still answers seek hints after parsing
        assert!(handle.seek(42));
        assert_eq!(rx.recv().await, Some(WorkerMessage::Seeked(42)));
        handle.join().await;
    }

    #[tokio::test]
    async fn test_seek_acknowledged_before_start() {
        let (handle, mut rx) = spawn_parser_worker(options(1000), Arc::new(LocalResolver));
        handle.seek(7);
        assert_eq!(rx.recv().await, Some(WorkerMessage::Seeked(7)));
        handle.shutdown();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_io_error() {
        let (handle, mut rx) = spawn_parser_worker(options(1000), Arc::new(LocalResolver));
        handle.start("https://example.com/clip.mp4");
        assert_matches!(
            rx.recv().await,
            Some(WorkerMessage::Error(e)) if e.kind == ErrorKind::Io
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, mut rx) = spawn_parser_worker(options(1000), Arc::new(LocalResolver));
        handle.start(dir.path().join("missing.mp4").display().to_string());
        assert_matches!(
            rx.recv().await,
            Some(WorkerMessage::Error(e)) if e.kind == ErrorKind::Io
        );
    }

    #[tokio::test]
    async fn test_truncated_file_fails_after_units() {
        let data = SyntheticStream::new(60, 30.0).build();
        let file = write_file(&data[..data.len() - 100]);

        let (handle, mut rx) = spawn_parser_worker(options(512), Arc::new(LocalResolver));
        handle.start(file.path().display().to_string());
        let messages = collect_until_terminal(&mut rx).await;

        assert_matches!(messages.last(), Some(WorkerMessage::Error(e)) if e.kind == ErrorKind::Parse);
        assert!(!messages
            .iter()
            .any(|m| matches!(m, WorkerMessage::Complete { .. })));
        handle.join().await;
    }
}
