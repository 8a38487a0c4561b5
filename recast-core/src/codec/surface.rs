//! Frame hand-off surface between a decoder and an encoder.
//!
//! The encoder creates the surface, the decoder renders into it when an
//! output buffer is released with `render = true`, and the encoder consumes
//! queued frames on its own schedule. Frames move by ownership, never by
//! copying pixel data.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{CodecError, CodecResult};

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// One rendered picture waiting on the surface.
pub struct SurfaceFrame {
    pub presentation_time_us: i64,
    /// Backend defined picture; encoders downcast to the type their decoders render
    pub payload: Box<dyn Any + Send>,
}

impl SurfaceFrame {
    pub fn new<T: Any + Send>(presentation_time_us: i64, payload: T) -> Self {
        Self {
            presentation_time_us,
            payload: Box::new(payload),
        }
    }
}

impl fmt::Debug for SurfaceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceFrame")
            .field("presentation_time_us", &self.presentation_time_us)
            .finish_non_exhaustive()
    }
}

struct SurfaceInner {
    id: u64,
    frames: Mutex<VecDeque<SurfaceFrame>>,
    released: AtomicBool,
}

/// Shared producer/consumer surface bound to one encoder input.
#[derive(Clone)]
pub struct InputSurface {
    inner: Arc<SurfaceInner>,
}

impl InputSurface {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
                frames: Mutex::new(VecDeque::new()),
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Queues a rendered frame for the encoder.
    ///
    /// # Errors
    /// - `CodecError::SurfaceReleased` - The surface was already released
    pub fn push(&self, frame: SurfaceFrame) -> CodecResult<()> {
        if self.is_released() {
            return Err(CodecError::SurfaceReleased { id: self.id() });
        }
        self.inner.frames.lock().push_back(frame);
        Ok(())
    }

    /// Takes the oldest rendered frame, if any.
    pub fn pop(&self) -> Option<SurfaceFrame> {
        self.inner.frames.lock().pop_front()
    }

    /// Number of frames rendered but not yet consumed.
    pub fn pending(&self) -> usize {
        self.inner.frames.lock().len()
    }

    /// Releases the surface and drops any frames still queued. Idempotent.
    pub fn release(&self) {
        if !self.inner.released.swap(true, Ordering::SeqCst) {
            self.inner.frames.lock().clear();
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Returns true when both handles refer to the same surface.
    pub fn same_surface(&self, other: &InputSurface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for InputSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InputSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSurface")
            .field("id", &self.id())
            .field("pending", &self.pending())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_delivered_in_order() {
        let surface = InputSurface::new();
        let consumer = surface.clone();

        surface.push(SurfaceFrame::new(0, vec![1u8])).unwrap();
        surface.push(SurfaceFrame::new(33_333, vec![2u8])).unwrap();

        assert_eq!(consumer.pending(), 2);
        let first = consumer.pop().unwrap();
        assert_eq!(first.presentation_time_us, 0);
        assert_eq!(first.payload.downcast_ref::<Vec<u8>>(), Some(&vec![1u8]));
        assert_eq!(consumer.pop().unwrap().presentation_time_us, 33_333);
        assert!(consumer.pop().is_none());
    }

    #[test]
    fn test_release_rejects_new_frames() {
        let surface = InputSurface::new();
        surface.push(SurfaceFrame::new(0, ())).unwrap();

        surface.release();
        surface.release();

        assert!(surface.is_released());
        assert_eq!(surface.pending(), 0);
        assert!(matches!(
            surface.push(SurfaceFrame::new(1, ())),
            Err(CodecError::SurfaceReleased { .. })
        ));
    }

    #[test]
    fn test_surface_identity() {
        let a = InputSurface::new();
        let b = InputSurface::new();
        assert!(a.same_surface(&a.clone()));
        assert!(!a.same_surface(&b));
        assert_ne!(a.id(), b.id());
    }
}
