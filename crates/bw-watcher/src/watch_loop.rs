//! One watch loop per watched directory.
//!
//! # Lifecycle
//!
//! ```text
//! CREATED ──start()──► INITIAL_SCAN ──► RUNNING ──close()──► CLOSING ──► CLOSED
//! ```
//!
//! 1. **Created**: [`DirectoryWatcher::new`] checks the watched directory,
//!    prepares the scratch directory, and builds the scanner.
//! 2. **Initial scan**: [`DirectoryWatcher::start`] reports every present
//!    unit to the consumer on the calling thread, then spawns the loop
//!    thread.
//! 3. **Running**: the loop thread waits for the startup barrier, sleeps one
//!    poll interval, and then scans once per interval for as long as the
//!    host is ready.
//! 4. **Closing**: [`DirectoryWatcher::close`] cancels the loop and waits up
//!    to [`CLOSE_TIMEOUT`] for the thread to exit.
//!
//! The scanner lives on the loop thread once started; nothing else touches
//! it. Re-baseline requests reach it through a channel drained at the top of
//! each cycle.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bw_core::{Backend, ChangeSet, ConfigError, WatchTarget};
use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing::{debug, error, info, trace, warn};

use crate::barrier::StartupBarrier;
use crate::cancel::CancelToken;
use crate::consumer::{AlwaysReady, ChangeConsumer, Readiness};
use crate::error::WatchError;
use crate::scanner::{build_scanner, Scanner};

/// How long [`DirectoryWatcher::close`] waits for the loop thread.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix of private scratch directories.
const TEMP_PREFIX: &str = "bundlewatch-";

/// Where a watch loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Built but not started.
    Created,
    /// Running the startup scan.
    InitialScan,
    /// The loop thread is scanning.
    Running,
    /// Shutting down.
    Closing,
    /// Terminal.
    Closed,
}

/// What every watch loop of a host shares.
#[derive(Clone)]
pub struct WatchContext {
    /// Receives change sets.
    pub consumer: Arc<dyn ChangeConsumer>,
    /// Gates disk I/O while the host starts up.
    pub readiness: Arc<dyn Readiness>,
    /// Keeps deliveries out of the host's startup phase.
    pub barrier: Arc<StartupBarrier>,
}

impl WatchContext {
    /// Creates a context with an always-ready host and a fresh barrier.
    pub fn new(consumer: Arc<dyn ChangeConsumer>) -> Self {
        Self {
            consumer,
            readiness: Arc::new(AlwaysReady),
            barrier: Arc::new(StartupBarrier::new()),
        }
    }

    /// Replaces the readiness signal.
    #[must_use]
    pub fn with_readiness(mut self, readiness: Arc<dyn Readiness>) -> Self {
        self.readiness = readiness;
        self
    }

    /// Replaces the startup barrier.
    #[must_use]
    pub fn with_barrier(mut self, barrier: Arc<StartupBarrier>) -> Self {
        self.barrier = barrier;
        self
    }
}

impl fmt::Debug for WatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchContext")
            .field("barrier", &self.barrier)
            .finish_non_exhaustive()
    }
}

/// State shared between a [`DirectoryWatcher`] and its loop thread.
struct Shared {
    target: WatchTarget,
    context: WatchContext,
    cancel: CancelToken,
    state: Mutex<LoopState>,
}

struct LoopThread {
    handle: JoinHandle<()>,
    /// Disconnects when the thread exits.
    done: Receiver<()>,
}

/// Watches one directory on its own thread.
pub struct DirectoryWatcher {
    shared: Arc<Shared>,
    backend: Backend,
    temp_dir: Utf8PathBuf,
    _private_temp: Option<TempDir>,
    scanner: Mutex<Option<Box<dyn Scanner>>>,
    rebaseline_tx: Sender<Utf8PathBuf>,
    rebaseline_rx: Receiver<Utf8PathBuf>,
    thread: Mutex<Option<LoopThread>>,
}

impl fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("identity", &self.shared.target.identity)
            .field("directory", &self.shared.target.directory)
            .field("backend", &self.backend)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DirectoryWatcher {
    /// Builds a watch loop for `target` without starting it.
    ///
    /// A missing watched directory is only a warning; the loop picks it up
    /// once it appears.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] if the watched directory or the
    /// configured scratch directory exists but is not a directory, if the
    /// scratch directory cannot be created, or if the filter is invalid.
    pub fn new(target: WatchTarget, context: WatchContext) -> Result<Self, WatchError> {
        verify_watched_dir(target.directory())?;
        let (temp_dir, private_temp) = prepare_temp_dir(target.temp_dir.as_deref())?;
        let scanner = build_scanner(&target)?;
        let backend = scanner.backend();

        info!(
            identity = %target.identity,
            dir = %scanner.root(),
            poll_ms = target.poll_interval.as_millis(),
            tmpdir = %temp_dir,
            filter = target.filter.as_deref().unwrap_or(""),
            mode = %target.subdir_mode,
            ?backend,
            "Watch created"
        );

        let (rebaseline_tx, rebaseline_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            shared: Arc::new(Shared {
                target,
                context,
                cancel: CancelToken::new(),
                state: Mutex::new(LoopState::Created),
            }),
            backend,
            temp_dir,
            _private_temp: private_temp,
            scanner: Mutex::new(Some(scanner)),
            rebaseline_tx,
            rebaseline_rx,
            thread: Mutex::new(None),
        })
    }

    /// Reports every present unit, then starts the loop thread.
    ///
    /// The initial delivery happens on the calling thread under the startup
    /// barrier's read side. Starting a loop that is already running is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Interrupted`] if the loop was closed while
    /// waiting for the barrier, and [`WatchError::Spawn`] if the thread
    /// cannot be created. Either way the loop ends up closed.
    pub fn start(&self) -> Result<(), WatchError> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                LoopState::Created => *state = LoopState::InitialScan,
                LoopState::Closing | LoopState::Closed => return Err(WatchError::Interrupted),
                LoopState::InitialScan | LoopState::Running => {
                    warn!(identity = %self.identity(), "Watch already started");
                    return Ok(());
                }
            }
        }

        let Some(mut scanner) = self.scanner.lock().take() else {
            return Err(WatchError::Interrupted);
        };

        info!(identity = %self.identity(), "Starting initial scan");
        if let Some(changes) = scanner.scan(true) {
            if !changes.is_empty() {
                match self.shared.context.barrier.read(&self.shared.cancel) {
                    Ok(_permit) => self.shared.deliver(&changes),
                    Err(error) => {
                        scanner.close();
                        self.shared.set_state(LoopState::Closed);
                        return Err(error);
                    }
                }
            }
        } else {
            warn!(
                dir = %scanner.root(),
                "Watched directory cannot be listed yet, nothing reported at startup"
            );
        }

        let (done_tx, done) = crossbeam_channel::bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let rebaseline = self.rebaseline_rx.clone();
        let spawned = thread::Builder::new()
            .name(self.shared.target.thread_name())
            .spawn(move || {
                let _done = done_tx;
                shared.run(scanner, &rebaseline);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                self.shared.set_state(LoopState::Closed);
                return Err(WatchError::Spawn {
                    path: self.shared.target.directory.clone(),
                    source,
                });
            }
        };

        *self.thread.lock() = Some(LoopThread { handle, done });
        let mut state = self.shared.state.lock();
        if *state == LoopState::InitialScan {
            *state = LoopState::Running;
        }
        Ok(())
    }

    /// Stops the loop and waits up to [`CLOSE_TIMEOUT`] for its thread.
    ///
    /// Idempotent. A thread that overruns the timeout is logged and left to
    /// finish on its own.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            match *state {
                LoopState::Closing | LoopState::Closed => return,
                _ => *state = LoopState::Closing,
            }
        }

        self.shared.cancel.cancel();
        if let Some(mut scanner) = self.scanner.lock().take() {
            scanner.close();
        }

        let thread = self.thread.lock().take();
        if let Some(LoopThread { handle, done }) = thread {
            match done.recv_timeout(CLOSE_TIMEOUT) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if handle.join().is_err() {
                        error!(identity = %self.identity(), "Watch loop thread panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        identity = %self.identity(),
                        timeout_secs = CLOSE_TIMEOUT.as_secs(),
                        "Watch loop did not stop in time"
                    );
                }
            }
        }

        self.shared.set_state(LoopState::Closed);
        info!(identity = %self.identity(), dir = %self.shared.target.directory, "Watch closed");
    }

    /// Asks the scanner to treat `path`'s current checksum as reported.
    ///
    /// Applied at the start of the next cycle.
    pub fn update_checksum(&self, path: &Utf8Path) {
        let _ = self.rebaseline_tx.send(path.to_owned());
    }

    /// Returns the target this loop was built from.
    #[must_use]
    pub fn target(&self) -> &WatchTarget {
        &self.shared.target
    }

    /// Returns the configuration identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.shared.target.identity
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.shared.state.lock()
    }

    /// Returns the backend the scanner ended up on.
    #[must_use]
    pub const fn backend(&self) -> Backend {
        self.backend
    }

    /// Returns the scratch directory handed to consumers.
    #[must_use]
    pub fn temp_dir(&self) -> &Utf8Path {
        &self.temp_dir
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        // Not joined here; the thread exits at its next blocking point.
        self.shared.cancel.cancel();
    }
}

impl Shared {
    fn set_state(&self, state: LoopState) {
        *self.state.lock() = state;
    }

    fn run(&self, mut scanner: Box<dyn Scanner>, rebaseline: &Receiver<Utf8PathBuf>) {
        if let Err(error) = self.run_cycles(scanner.as_mut(), rebaseline) {
            debug!(identity = %self.target.identity, error = %error, "Watch loop exiting");
        }
        scanner.close();
        self.set_state(LoopState::Closed);
    }

    fn run_cycles(
        &self,
        scanner: &mut dyn Scanner,
        rebaseline: &Receiver<Utf8PathBuf>,
    ) -> Result<(), WatchError> {
        // Wait for the host to finish starting up.
        drop(self.context.barrier.read(&self.cancel)?);

        info!(
            identity = %self.target.identity,
            dir = %scanner.root(),
            poll_ms = self.target.poll_interval.as_millis(),
            "Watch loop running"
        );
        self.cancel.sleep(self.target.poll_interval)?;

        loop {
            self.cancel.check()?;
            match panic::catch_unwind(AssertUnwindSafe(|| self.cycle(scanner, rebaseline))) {
                Ok(result) => result?,
                Err(_) => error!(identity = %self.target.identity, "Scan cycle panicked"),
            }
            self.cancel.sleep(self.target.poll_interval)?;
        }
    }

    fn cycle(
        &self,
        scanner: &mut dyn Scanner,
        rebaseline: &Receiver<Utf8PathBuf>,
    ) -> Result<(), WatchError> {
        for path in rebaseline.try_iter() {
            scanner.update_checksum(&path);
        }

        if !self.context.readiness.is_ready() {
            trace!(identity = %self.target.identity, "Host not ready, skipping scan");
            return Ok(());
        }

        let _permit = self.context.barrier.read(&self.cancel)?;
        match scanner.scan(false) {
            Some(changes) if !changes.is_empty() => self.deliver(&changes),
            Some(_) => {}
            None => trace!(dir = %scanner.root(), "Watched directory cannot be listed"),
        }
        Ok(())
    }

    fn deliver(&self, changes: &ChangeSet) {
        let identity = self.target.identity.as_str();
        debug!(identity, count = changes.len(), "Delivering changes");

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.context.consumer.on_changes(identity, changes)
        }));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(identity, error = %format!("{err:#}"), "Consumer failed"),
            Err(_) => error!(identity, "Consumer panicked"),
        }
    }
}

fn verify_watched_dir(dir: &Utf8Path) -> Result<(), ConfigError> {
    if !dir.exists() {
        warn!(dir = %dir, "Watched directory does not exist yet, it will be picked up once created");
        Ok(())
    } else if !dir.is_dir() {
        Err(ConfigError::NotADirectory(dir.to_owned()))
    } else {
        Ok(())
    }
}

fn prepare_temp_dir(
    configured: Option<&Utf8Path>,
) -> Result<(Utf8PathBuf, Option<TempDir>), WatchError> {
    if let Some(dir) = configured {
        if dir.exists() && !dir.is_dir() {
            return Err(ConfigError::NotADirectory(dir.to_owned()).into());
        }
        std::fs::create_dir_all(dir)
            .map_err(|e| ConfigError::invalid_path(dir, format!("cannot create: {e}")))?;
        return Ok((dir.to_owned(), None));
    }

    let private = tempfile::Builder::new().prefix(TEMP_PREFIX).tempdir()?;
    let path = Utf8PathBuf::try_from(private.path().to_path_buf())
        .map_err(|e| WatchError::non_utf8_path(e.into_path_buf()))?;
    Ok((path, Some(private)))
}
