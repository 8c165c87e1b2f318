//! Where rendered audio goes.
//!
//! The engine never touches an audio device directly. It asks a [`RenderBackend`] to run
//! each pipeline's [`RenderNode`]; [`crate::CpalBackend`] drives a real output device,
//! [`OfflineBackend`] lets the caller (or a clock task) pull quanta by hand.

use crate::error::{ConnectError, EngineResult};
use crate::renderer::RenderNode;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Output device abstraction. Implement for a platform sink or a test harness.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Prepare the output at `sample_rate`. Called once per `connect()`.
    async fn open(&self, sample_rate: u32) -> Result<(), ConnectError>;

    /// Start pulling audio from `node` until it reports it has stopped or the handle is dropped.
    fn spawn(&self, node: RenderNode) -> EngineResult<Box<dyn RendererHandle>>;

    /// Release the output. Called on `disconnect()`.
    fn close(&self);
}

/// Keeps one running pipeline attached to its backend.
pub trait RendererHandle: Send {
    /// Detach the node. Idempotent.
    fn stop(&mut self);
}

struct OfflineInner {
    slot: Mutex<Option<(u64, RenderNode)>>,
    generation: AtomicU64,
    spawned: AtomicU64,
    opened: AtomicBool,
    sample_rate: AtomicU32,
    fail_open: bool,
}

/// Backend with no device: quanta are rendered on demand with [`OfflineBackend::render`].
///
/// Cloning shares the same slot, so a test can keep one clone and hand another to the engine.
#[derive(Clone)]
pub struct OfflineBackend {
    inner: Arc<OfflineInner>,
}

impl Default for OfflineBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineBackend {
    pub fn new() -> Self {
        Self::with_failure(false)
    }

    /// A backend whose `open()` always fails, as if the render module could not load.
    pub fn failing() -> Self {
        Self::with_failure(true)
    }

    fn with_failure(fail_open: bool) -> Self {
        Self {
            inner: Arc::new(OfflineInner {
                slot: Mutex::new(None),
                generation: AtomicU64::new(0),
                spawned: AtomicU64::new(0),
                opened: AtomicBool::new(false),
                sample_rate: AtomicU32::new(0),
                fail_open,
            }),
        }
    }

    /// Render `frames` samples from the attached pipeline. Silence if none is attached.
    ///
    /// When the pipeline reports that it stopped, it is detached.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        let mut slot = self.inner.slot.lock();
        if let Some((_, node)) = slot.as_mut() {
            if !node.render(&mut out) {
                *slot = None;
            }
        }
        out
    }

    pub fn is_rendering(&self) -> bool {
        self.inner.slot.lock().is_some()
    }

    pub fn is_open(&self) -> bool {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate.load(Ordering::SeqCst)
    }

    /// Number of pipelines spawned so far.
    pub fn spawn_count(&self) -> u64 {
        self.inner.spawned.load(Ordering::SeqCst)
    }

    /// Drive the backend in real time: render `quantum` frames every `period`.
    pub fn spawn_clock(&self, quantum: usize, period: Duration) -> JoinHandle<()> {
        let backend = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if !backend.is_open() {
                    break;
                }
                backend.render(quantum);
            }
        })
    }
}

#[async_trait]
impl RenderBackend for OfflineBackend {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn open(&self, sample_rate: u32) -> Result<(), ConnectError> {
        if self.inner.fail_open {
            return Err(ConnectError::ModuleLoadFailed(
                "offline backend configured to fail".to_string(),
            ));
        }
        self.inner.sample_rate.store(sample_rate, Ordering::SeqCst);
        self.inner.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn spawn(&self, node: RenderNode) -> EngineResult<Box<dyn RendererHandle>> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.spawned.fetch_add(1, Ordering::SeqCst);
        *self.inner.slot.lock() = Some((generation, node));
        debug!(generation, "offline pipeline attached");
        Ok(Box::new(OfflineHandle {
            inner: Arc::clone(&self.inner),
            generation,
        }))
    }

    fn close(&self) {
        self.inner.opened.store(false, Ordering::SeqCst);
        *self.inner.slot.lock() = None;
    }
}

struct OfflineHandle {
    inner: Arc<OfflineInner>,
    generation: u64,
}

impl RendererHandle for OfflineHandle {
    fn stop(&mut self) {
        let mut slot = self.inner.slot.lock();
        if matches!(slot.as_ref(), Some((g, _)) if *g == self.generation) {
            *slot = None;
        }
    }
}

impl Drop for OfflineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
