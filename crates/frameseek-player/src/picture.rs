//! Decoded pictures and the presentation surface.

use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Pixel layout of a decoded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit planar Y, U, V with 2x2 chroma subsampling.
    I420,
}

impl PixelFormat {
    /// Bytes needed for a `width` x `height` picture.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        match self {
            Self::I420 => {
                let luma = width as usize * height as usize;
                let chroma = width.div_ceil(2) as usize * height.div_ceil(2) as usize;
                luma + 2 * chroma
            }
        }
    }
}

/// A decoded frame.
///
/// The release hook, if any, runs exactly once when the picture is dropped,
/// returning the backing surface to its owner.
pub struct Picture {
    pub sequence_index: u32,
    pub timestamp: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Picture {
    pub fn new(
        sequence_index: u32,
        timestamp: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Bytes,
    ) -> Self {
        Self {
            sequence_index,
            timestamp,
            width,
            height,
            format,
            data,
            release: None,
        }
    }

    /// Attach a hook run when the picture is dropped.
    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    /// Hex SHA-256 of the pixel data.
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(&self.data))
    }

    /// Full-picture rectangle.
    pub fn rect(&self) -> Rect {
        Rect {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }
}

impl Drop for Picture {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Picture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Picture")
            .field("sequence_index", &self.sequence_index)
            .field("timestamp", &self.timestamp)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Destination rectangle on the presentation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Presentation surface.
///
/// `present` is called from the decode thread, only for pictures decoded
/// with [`PresentationIntent::Present`](crate::PresentationIntent::Present).
pub trait PixelSink: Send {
    fn present(&mut self, picture: &Picture, rect: Rect);

    /// Called once when the stream dimensions become known.
    fn resize(&mut self, _width: u32, _height: u32) {}
}

/// Discards every picture.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PixelSink for NullSink {
    fn present(&mut self, _picture: &Picture, _rect: Rect) {}
}

/// A presented picture recorded by [`CaptureSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub sequence_index: u32,
    pub timestamp: u64,
    pub checksum: String,
}

/// Records the index and checksum of every presented picture.
///
/// Clones share the same record, so a test can keep one while the player
/// owns another.
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    frames: Arc<Mutex<Vec<CapturedFrame>>>,
    size: Arc<Mutex<Option<(u32, u32)>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<CapturedFrame> {
        self.frames.lock().clone()
    }

    pub fn indices(&self) -> Vec<u32> {
        self.frames.lock().iter().map(|f| f.sequence_index).collect()
    }

    pub fn last(&self) -> Option<CapturedFrame> {
        self.frames.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    /// Dimensions passed to the last `resize`.
    pub fn surface_size(&self) -> Option<(u32, u32)> {
        *self.size.lock()
    }
}

impl PixelSink for CaptureSink {
    fn present(&mut self, picture: &Picture, _rect: Rect) {
        self.frames.lock().push(CapturedFrame {
            sequence_index: picture.sequence_index,
            timestamp: picture.timestamp,
            checksum: picture.checksum(),
        });
    }

    fn resize(&mut self, width: u32, height: u32) {
        *self.size.lock() = Some((width, height));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn picture(index: u32, fill: u8) -> Picture {
        let size = PixelFormat::I420.frame_size(4, 2);
        Picture::new(index, 0, 4, 2, PixelFormat::I420, Bytes::from(vec![fill; size]))
    }

    #[test]
    fn test_i420_frame_size() {
        assert_eq!(PixelFormat::I420.frame_size(4, 2), 8 + 2 * 2);
        // odd dimensions round chroma up
        assert_eq!(PixelFormat::I420.frame_size(3, 3), 9 + 2 * 4);
    }

    #[test]
    fn test_release_runs_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let pic = picture(0, 1).with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(pic);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_checksum_depends_on_data() {
        assert_eq!(picture(0, 1).checksum(), picture(5, 1).checksum());
        assert_ne!(picture(0, 1).checksum(), picture(0, 2).checksum());
        assert_eq!(picture(0, 1).checksum().len(), 64);
    }

    #[test]
    fn test_capture_sink_shares_record() {
        let sink = CaptureSink::new();
        let mut owned = sink.clone();
        let pic = picture(7, 3);
        owned.present(&pic, pic.rect());
        owned.resize(640, 360);

        assert_eq!(sink.indices(), vec![7]);
        assert_eq!(sink.last().unwrap().checksum, pic.checksum());
        assert_eq!(sink.surface_size(), Some((640, 360)));
        sink.clear();
        assert!(sink.is_empty());
    }
}
