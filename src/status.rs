use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::Error;

/// Snapshot of the most recent completed firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterState {
    pub last_delta: u64,
    pub initialized: bool,
}

/// Shared cell the sampling loop publishes into: one writer, any number of
/// concurrent readers, no reader ever blocks the writer.
///
/// The writer stores the delta before Release-storing the ready flag, and
/// readers Acquire-load the flag first, so a snapshot that says
/// `initialized` always carries a delta from a completed firing.
#[derive(Debug, Default)]
pub struct JitterCell {
    delta: AtomicU64,
    ready: AtomicBool,
}

impl JitterCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per firing by the sampling loop.
    pub fn publish(&self, delta: u64) {
        self.delta.store(delta, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
    }

    /// Snapshot read, safe from any thread at any time. Before the first
    /// firing completes this returns `initialized == false` with a zero
    /// delta, which is a default and not an actual reading.
    pub fn current(&self) -> JitterState {
        let initialized = self.ready.load(Ordering::Acquire);
        let last_delta = if initialized {
            self.delta.load(Ordering::Relaxed)
        } else {
            0
        };
        JitterState {
            last_delta,
            initialized,
        }
    }
}

/// Renders the state the way the query endpoint exposes it. An
/// uninitialized state renders as `0`; through this one-line text form a
/// reader cannot distinguish "no data yet" from a true zero delta — the
/// programmatic [`JitterCell::current`] carries the explicit flag instead.
pub fn render(state: &JitterState) -> String {
    format!("tsc_jitter: {}\n", state.last_delta)
}

/// Where the rendered state is published for external readers.
pub trait StateSink: Send + Sync {
    /// Creates the external endpoint. Called once during startup.
    fn register(&self) -> Result<(), Error>;

    /// Pushes a fresh snapshot to the endpoint. Called once per firing.
    fn update(&self, state: &JitterState) -> Result<(), Error>;

    /// Removes the endpoint. Called during shutdown; must tolerate being
    /// called when nothing is registered.
    fn unregister(&self);
}

/// Publishes the state as a single-line text file, the userspace analog of
/// a procfs entry.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateSink for FileSink {
    fn register(&self) -> Result<(), Error> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let initial = JitterState {
            last_delta: 0,
            initialized: false,
        };
        fs::write(&self.path, render(&initial))?;
        Ok(())
    }

    fn update(&self, state: &JitterState) -> Result<(), Error> {
        fs::write(&self.path, render(state))?;
        Ok(())
    }

    fn unregister(&self) {
        let _ = fs::remove_file(&self.path);
    }
}
