//! Graceful shutdown coordinator.
//!
//! Provides signal-driven shutdown with connection draining:
//! - `SIGTERM` / `SIGINT` → stop accepting, drain (bounded), exit 0
//! - panic or reported fatal error → exit 1 immediately, no drain
//!
//! A one-way `ShutdownState` flag makes the sequence run at most once no
//! matter how many triggers arrive.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ShutdownConfig;
use crate::lifecycle::signals::{ShutdownTrigger, SignalListener};
use crate::net::{HandleControl, ServerHandle};

/// Exit status after a graceful shutdown.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit status after a fatal error.
pub const EXIT_FATAL: i32 = 1;

/// Extra async work run after accepting stops, inside the grace period.
pub type ShutdownHook =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send>> + Send>;

/// "Shutdown in progress". Flips from false to true once and never back.
#[derive(Debug, Default)]
pub struct ShutdownState {
    in_progress: AtomicBool,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the shutdown. Returns `true` only for the first caller.
    pub fn begin(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }
}

/// Capability: end the process.
pub trait Terminator: Send + Sync + 'static {
    fn exit(&self, status: i32);
}

/// Ends the real process with `std::process::exit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExit;

impl Terminator for ProcessExit {
    fn exit(&self, status: i32) {
        std::process::exit(status);
    }
}

/// How a trigger was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every connection finished within the grace period.
    Drained,
    /// Grace period elapsed with connections still open; exited anyway.
    GraceExpired,
    /// Another trigger already owns the shutdown; nothing was done.
    AlreadyInProgress,
}

struct Sequence<T> {
    grace: Duration,
    state: Arc<ShutdownState>,
    control: HandleControl,
    terminator: Arc<T>,
    hook: Mutex<Option<ShutdownHook>>,
    fatal_reported: AtomicBool,
    finished: watch::Sender<bool>,
}

/// Runs the shutdown sequence for one installed `ServerHandle`.
///
/// Cheap to clone; all clones share the same idempotency flag.
pub struct ShutdownHandle<T = ProcessExit> {
    sequence: Arc<Sequence<T>>,
}

impl<T> Clone for ShutdownHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sequence: Arc::clone(&self.sequence),
        }
    }
}

impl<T: Terminator> ShutdownHandle<T> {
    /// Stop accepting, drain for at most the grace period, then exit with success.
    ///
    /// Only the first trigger does anything; later ones return `AlreadyInProgress`.
    pub async fn trigger(&self, trigger: ShutdownTrigger) -> ShutdownOutcome {
        let seq = &self.sequence;

        if !seq.state.begin() {
            tracing::info!(%trigger, "Shutdown already in progress, ignoring");
            return ShutdownOutcome::AlreadyInProgress;
        }

        tracing::info!(%trigger, "Shutdown signal received, stopping accept loop");
        let started = Instant::now();
        seq.control.stop_accepting();

        tracing::info!(
            active_connections = seq.control.active_connections(),
            grace_ms = seq.grace.as_millis() as u64,
            "Draining connections"
        );
        let drained = seq.control.drain(seq.grace).await;

        let hook = seq.hook.lock().ok().and_then(|mut hook| hook.take());
        if let Some(hook) = hook {
            let remaining = seq.grace.saturating_sub(started.elapsed());
            run_hook(hook, remaining).await;
        }

        let outcome = if drained {
            tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "All connections drained, server closed"
            );
            ShutdownOutcome::Drained
        } else {
            tracing::warn!(
                remaining_connections = seq.control.active_connections(),
                grace_ms = seq.grace.as_millis() as u64,
                "Grace period expired, exiting with open connections"
            );
            ShutdownOutcome::GraceExpired
        };

        if seq.fatal_reported.load(Ordering::SeqCst) {
            // The fatal path already exited with failure status.
            return outcome;
        }
        seq.finished.send_replace(true);
        seq.terminator.exit(EXIT_SUCCESS);
        outcome
    }

    /// Exit immediately with failure status, skipping the drain.
    ///
    /// Interrupts a graceful drain in progress. Only the first fatal report exits.
    pub fn fatal(&self, error: &dyn std::fmt::Display) {
        let seq = &self.sequence;
        if seq.fatal_reported.swap(true, Ordering::SeqCst) {
            tracing::error!(error = %error, "Further fatal error while already exiting");
            return;
        }
        if !seq.state.begin() {
            tracing::warn!("Fatal error during graceful shutdown, abandoning drain");
        }
        tracing::error!(error = %error, "Fatal error, exiting without drain");
        seq.finished.send_replace(true);
        seq.terminator.exit(EXIT_FATAL);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.sequence.state.is_in_progress()
    }

    /// Resolves once a shutdown sequence (graceful or fatal) has completed.
    pub async fn finished(&self) {
        let mut rx = self.sequence.finished.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Run the hook on its own task so a panic or error cannot stop the exit.
async fn run_hook(hook: ShutdownHook, budget: Duration) {
    let task = tokio::spawn(hook());
    match tokio::time::timeout(budget, task).await {
        Ok(Ok(Ok(()))) => tracing::debug!("Shutdown hook finished"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "Shutdown hook failed"),
        Ok(Err(e)) => tracing::error!(error = %e, "Shutdown hook panicked"),
        Err(_) => tracing::warn!(
            budget_ms = budget.as_millis() as u64,
            "Shutdown hook did not finish within the grace period"
        ),
    }
}

type RestorePanicHook = Box<dyn FnOnce() + Send>;

struct Installed<T> {
    handle: ShutdownHandle<T>,
    signal_task: Option<JoinHandle<()>>,
    restore_panic_hook: Option<RestorePanicHook>,
}

/// Installs and removes the process-wide shutdown handlers.
pub struct ShutdownCoordinator<T = ProcessExit> {
    grace: Duration,
    catch_panics: bool,
    listen_for_signals: bool,
    terminator: Arc<T>,
    state: Arc<ShutdownState>,
    installed: Option<Installed<T>>,
}

impl ShutdownCoordinator<ProcessExit> {
    pub fn from_config(config: &ShutdownConfig) -> Self {
        Self::new(config.grace_period(), ProcessExit).catch_panics(config.catch_panics)
    }
}

impl<T: Terminator> ShutdownCoordinator<T> {
    /// A coordinator that listens for signals and catches panics once installed.
    pub fn new(grace: Duration, terminator: T) -> Self {
        Self {
            grace,
            catch_panics: true,
            listen_for_signals: true,
            terminator: Arc::new(terminator),
            state: Arc::new(ShutdownState::new()),
            installed: None,
        }
    }

    /// Route panics through the fatal path.
    pub fn catch_panics(mut self, enabled: bool) -> Self {
        self.catch_panics = enabled;
        self
    }

    /// Register SIGTERM/SIGINT handlers on install.
    pub fn listen_for_signals(mut self, enabled: bool) -> Self {
        self.listen_for_signals = enabled;
        self
    }

    pub fn is_installed(&self) -> bool {
        self.installed.is_some()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.is_in_progress()
    }

    /// Supervise `handle`: register signal and fatal-error handlers.
    ///
    /// Must be called inside a Tokio runtime. Fails if already installed.
    pub fn install(
        &mut self,
        handle: &ServerHandle,
        on_shutdown: Option<ShutdownHook>,
    ) -> std::io::Result<ShutdownHandle<T>> {
        if self.installed.is_some() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "shutdown handlers already installed",
            ));
        }

        let (finished, _) = watch::channel(false);
        let shutdown = ShutdownHandle {
            sequence: Arc::new(Sequence {
                grace: self.grace,
                state: Arc::clone(&self.state),
                control: handle.control(),
                terminator: Arc::clone(&self.terminator),
                hook: Mutex::new(on_shutdown),
                fatal_reported: AtomicBool::new(false),
                finished,
            }),
        };

        let signal_task = if self.listen_for_signals {
            let mut listener = SignalListener::install()?;
            let shutdown = shutdown.clone();
            Some(tokio::spawn(async move {
                while let Some(trigger) = listener.recv().await {
                    // Keep receiving while a drain runs so duplicates are seen and ignored.
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        shutdown.trigger(trigger).await;
                    });
                }
            }))
        } else {
            None
        };

        let restore_panic_hook: Option<RestorePanicHook> = if self.catch_panics {
            let shutdown = shutdown.clone();
            let previous = Arc::new(std::panic::take_hook());
            let chained = Arc::clone(&previous);
            std::panic::set_hook(Box::new(move |info| {
                (*chained)(info);
                shutdown.fatal(info);
            }));
            Some(Box::new(move || {
                drop(std::panic::take_hook());
                std::panic::set_hook(Box::new(move |info| (*previous)(info)));
            }))
        } else {
            None
        };

        tracing::info!(
            address = %handle.local_addr(),
            grace_ms = self.grace.as_millis() as u64,
            signals = self.listen_for_signals,
            catch_panics = self.catch_panics,
            "Shutdown handlers installed"
        );

        self.installed = Some(Installed {
            handle: shutdown.clone(),
            signal_task,
            restore_panic_hook,
        });
        Ok(shutdown)
    }

    /// The handle of the current installation, if any.
    pub fn handle(&self) -> Option<ShutdownHandle<T>> {
        self.installed.as_ref().map(|installed| installed.handle.clone())
    }

    /// Stop listening for signals and restore the panic hook that was active
    /// before `install`.
    ///
    /// Signals delivered afterwards are still absorbed by Tokio's handler
    /// rather than the default disposition.
    pub fn uninstall(&mut self) {
        let Some(installed) = self.installed.take() else {
            return;
        };
        teardown(installed);
        tracing::debug!("Shutdown handlers uninstalled");
    }
}

impl<T> Drop for ShutdownCoordinator<T> {
    fn drop(&mut self) {
        if let Some(installed) = self.installed.take() {
            teardown(installed);
        }
    }
}

fn teardown<T>(installed: Installed<T>) {
    if let Some(task) = installed.signal_task {
        task.abort();
    }
    if let Some(restore) = installed.restore_panic_hook {
        restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct CountingExit {
        calls: AtomicUsize,
        last: std::sync::atomic::AtomicI32,
    }

    impl Terminator for Arc<CountingExit> {
        fn exit(&self, status: i32) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last.store(status, Ordering::SeqCst);
        }
    }

    async fn handle() -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        ServerHandle::new(listener, 8).unwrap()
    }

    fn coordinator(exit: &Arc<CountingExit>) -> ShutdownCoordinator<Arc<CountingExit>> {
        ShutdownCoordinator::new(Duration::from_millis(200), Arc::clone(exit))
            .catch_panics(false)
            .listen_for_signals(false)
    }

    #[test]
    fn state_flips_once() {
        let state = ShutdownState::new();
        assert!(!state.is_in_progress());
        assert!(state.begin());
        assert!(!state.begin());
        assert!(state.is_in_progress());
    }

    #[tokio::test]
    async fn idle_server_drains_and_exits_zero() {
        let exit = Arc::new(CountingExit::default());
        let mut coordinator = coordinator(&exit);
        let server = handle().await;
        let shutdown = coordinator.install(&server, None).unwrap();

        let outcome = shutdown.trigger(ShutdownTrigger::Terminate).await;
        assert_eq!(outcome, ShutdownOutcome::Drained);
        assert_eq!(exit.calls.load(Ordering::SeqCst), 1);
        assert_eq!(exit.last.load(Ordering::SeqCst), EXIT_SUCCESS);
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn install_twice_fails() {
        let exit = Arc::new(CountingExit::default());
        let mut coordinator = coordinator(&exit);
        let server = handle().await;

        coordinator.install(&server, None).unwrap();
        let err = coordinator.install(&server, None).err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);

        coordinator.uninstall();
        assert!(!coordinator.is_installed());
        coordinator.uninstall();
    }

    #[tokio::test]
    async fn hook_runs_and_failure_does_not_block_exit() {
        let exit = Arc::new(CountingExit::default());
        let mut coordinator = coordinator(&exit);
        let server = handle().await;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let hook: ShutdownHook = Box::new(move || {
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                Err(std::io::Error::other("flush failed"))
            })
        });

        let shutdown = coordinator.install(&server, Some(hook)).unwrap();
        shutdown.trigger(ShutdownTrigger::Interrupt).await;

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(exit.calls.load(Ordering::SeqCst), 1);
        assert_eq!(exit.last.load(Ordering::SeqCst), EXIT_SUCCESS);
    }

    #[tokio::test]
    async fn fatal_exits_one_without_draining() {
        let exit = Arc::new(CountingExit::default());
        let mut coordinator = coordinator(&exit);
        let server = handle().await;
        let control = server.control();
        let shutdown = coordinator.install(&server, None).unwrap();

        shutdown.fatal(&"unhandled rejection");

        assert_eq!(exit.last.load(Ordering::SeqCst), EXIT_FATAL);
        // No drain: the handle was never told to stop accepting.
        assert!(!control.stop_token().is_cancelled());

        // A signal after a fatal error does not start a drain.
        let outcome = shutdown.trigger(ShutdownTrigger::Terminate).await;
        assert_eq!(outcome, ShutdownOutcome::AlreadyInProgress);
        assert_eq!(exit.calls.load(Ordering::SeqCst), 1);
    }
    #[tokio::test]
    async fn repeated_fatal_reports_exit_once() {
        let exit = Arc::new(CountingExit::default());
        let mut coordinator = coordinator(&exit);
        let server = handle().await;
        let shutdown = coordinator.install(&server, None).unwrap();

        shutdown.fatal(&"first");
        shutdown.fatal(&"second");

        assert_eq!(exit.calls.load(Ordering::SeqCst), 1);
        assert_eq!(exit.last.load(Ordering::SeqCst), EXIT_FATAL);
    }

    #[tokio::test]
    async fn fatal_during_drain_still_exits_one() {
        let exit = Arc::new(CountingExit::default());
        let mut coordinator = coordinator(&exit);
        let server = handle().await;
        let shutdown = coordinator.install(&server, None).unwrap();

        // An open connection keeps the drain waiting for the full grace period.
        let _guard = server.control().connections().track();
        let draining = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.trigger(ShutdownTrigger::Terminate).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        shutdown.fatal(&"crashed while draining");
        assert_eq!(exit.calls.load(Ordering::SeqCst), 1);
        assert_eq!(exit.last.load(Ordering::SeqCst), EXIT_FATAL);

        assert_eq!(draining.await.unwrap(), ShutdownOutcome::GraceExpired);
        assert_eq!(exit.calls.load(Ordering::SeqCst), 1);
    }
}
