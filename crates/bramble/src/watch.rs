//! Rebuilds driven by file-change notifications.
//!
//! The watcher itself lives with the caller; this module only serializes
//! rebuilds. A [`RebuildGate`] admits one rebuild at a time, and requests
//! that arrive while one is running are dropped rather than queued.

use crate::builder::{BuildOptions, SiteBuilder};
use crate::error::BrambleError;
use crate::report::BuildResult;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// The single in-flight flag shared by everything that can start a rebuild.
#[derive(Debug, Clone, Default)]
pub struct RebuildGate {
    busy: Arc<AtomicBool>,
}

/// Holds the gate until dropped.
#[derive(Debug)]
pub struct RebuildGuard {
    busy: Arc<AtomicBool>,
}

impl RebuildGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<RebuildGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RebuildGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for RebuildGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub enum RebuildOutcome {
    Completed(BuildResult),
    /// Another rebuild held the gate, or nothing relevant changed.
    Skipped,
    Failed(BrambleError),
}

type RebuildHook = Box<dyn Fn(&BuildResult) + Send + Sync>;

/// A builder plus the gate and hook used by a development server.
pub struct WatchSession {
    builder: Mutex<SiteBuilder>,
    options: BuildOptions,
    gate: RebuildGate,
    on_rebuild: Option<RebuildHook>,
}

impl WatchSession {
    pub fn new(builder: SiteBuilder, options: BuildOptions) -> Self {
        Self {
            builder: Mutex::new(builder),
            options,
            gate: RebuildGate::new(),
            on_rebuild: None,
        }
    }

    /// Called after every rebuild that completes.
    pub fn on_rebuild(mut self, hook: impl Fn(&BuildResult) + Send + Sync + 'static) -> Self {
        self.on_rebuild = Some(Box::new(hook));
        self
    }

    pub fn gate(&self) -> &RebuildGate {
        &self.gate
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Runs `f` with exclusive access to the builder.
    pub fn with_builder<R>(&self, f: impl FnOnce(&mut SiteBuilder) -> R) -> R {
        let mut builder = self.builder.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut builder)
    }

    /// Rebuilds unless a rebuild is already running.
    pub fn rebuild(&self) -> RebuildOutcome {
        let Some(_guard) = self.gate.try_acquire() else {
            tracing::debug!("rebuild already running, dropping request");
            return RebuildOutcome::Skipped;
        };
        self.with_builder(|builder| self.run(builder))
    }

    /// Rebuilds if any of `paths` is a source change, ignoring the
    /// destination and cache writes a build makes itself. Changes that
    /// arrive while a rebuild is running are dropped.
    pub fn handle_changes(&self, paths: &[PathBuf]) -> RebuildOutcome {
        let Some(_guard) = self.gate.try_acquire() else {
            tracing::debug!("rebuild already running, dropping {} changes", paths.len());
            return RebuildOutcome::Skipped;
        };

        self.with_builder(|builder| {
            if !paths.iter().any(|path| builder.is_source_change(path)) {
                return RebuildOutcome::Skipped;
            }
            self.run(builder)
        })
    }

    // Callers hold the gate.
    fn run(&self, builder: &mut SiteBuilder) -> RebuildOutcome {
        match builder.build(&self.options) {
            Ok(result) => {
                if let Some(hook) = &self.on_rebuild {
                    hook(&result);
                }
                RebuildOutcome::Completed(result)
            }
            Err(error) => {
                tracing::warn!("rebuild failed: {error}");
                RebuildOutcome::Failed(error)
            }
        }
    }
}
