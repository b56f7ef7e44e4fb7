//! Exclusive port acquisition.
//!
//! # Responsibilities
//! - Drive probe → reap → bind until the port is ours or attempts run out
//! - Keep attempts strictly sequential
//! - Record every attempt and its outcome in memory
//!
//! # State Machine
//! ```text
//! Idle → Probing ─(occupied)→ Reaping ─┐
//!           └──────(free)──────────────┴→ Binding ─(ok)→ Listening
//!                                          │
//!           ┌──(retryable, attempts left)──┘
//!           ▼                              └─(fatal or exhausted)→ Failed
//!        Probing
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::config::{AcquisitionConfig, WardenConfig};
use crate::net::{
    BindError, Binder, LsofLister, PortProbe, ProcessKiller, ProcessLister, ProcessReaper,
    ServerHandle, SignalKiller, TcpBinder,
};
use crate::resilience::RetryPolicy;

/// Where the controller is in its acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Probing,
    Reaping,
    Binding,
    Listening,
    Failed,
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    PortInUse,
    Timeout,
    OtherError,
}

impl From<&BindError> for AttemptOutcome {
    fn from(error: &BindError) -> Self {
        match error {
            BindError::PortInUse { .. } => AttemptOutcome::PortInUse,
            BindError::Timeout { .. } => AttemptOutcome::Timeout,
            BindError::Other { .. } => AttemptOutcome::OtherError,
        }
    }
}

/// One iteration of the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based.
    pub ordinal: u32,
    pub outcome: AttemptOutcome,
}

/// Error type for acquisition.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("could not bind port {port} after {attempts} attempts")]
    Exhausted {
        port: u16,
        attempts: u32,
        #[source]
        last: BindError,
    },

    #[error("binding port {port} failed on attempt {attempt} and cannot be retried")]
    Fatal {
        port: u16,
        attempt: u32,
        #[source]
        source: BindError,
    },

    #[error("acquisition of port {port} already ran (state: {state:?})")]
    NotIdle { port: u16, state: AcquisitionState },
}

impl AcquisitionError {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            AcquisitionError::Exhausted { attempts, .. } => *attempts,
            AcquisitionError::Fatal { attempt, .. } => *attempt,
            AcquisitionError::NotIdle { .. } => 0,
        }
    }
}

/// Capability: wait for a duration.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// The OS-facing collaborators of a controller.
#[derive(Debug, Clone)]
pub struct Capabilities<L, K, C, B> {
    pub lister: L,
    pub killer: K,
    pub clock: C,
    pub binder: B,
}

/// Acquires a fixed TCP port, evicting stale holders when necessary.
///
/// A controller produces at most one listening `ServerHandle`; `start` may be
/// called once.
#[derive(Debug)]
pub struct AcquisitionController<
    L = LsofLister,
    K = SignalKiller,
    C = TokioClock,
    B = TcpBinder,
> {
    addr: SocketAddr,
    policy: RetryPolicy,
    settle_delay: Duration,
    reap_occupants: bool,
    probe: PortProbe<L>,
    reaper: ProcessReaper<K>,
    clock: C,
    binder: B,
    state: AcquisitionState,
    attempts: Vec<Attempt>,
}

impl AcquisitionController {
    /// Build a controller that talks to the real operating system.
    pub fn from_config(config: &WardenConfig) -> Result<Self, std::net::AddrParseError> {
        let addr = config.listener.socket_addr()?;
        let acquisition = &config.acquisition;

        let capabilities = Capabilities {
            lister: LsofLister::new(acquisition.probe_timeout()),
            killer: SignalKiller,
            clock: TokioClock,
            binder: TcpBinder::new(
                acquisition.startup_timeout(),
                config.listener.backlog,
                config.listener.max_connections,
            ),
        };

        Ok(Self::with_capabilities(addr, acquisition, capabilities))
    }
}

impl<L, K, C, B> AcquisitionController<L, K, C, B>
where
    L: ProcessLister,
    K: ProcessKiller,
    C: Clock,
    B: Binder,
{
    pub fn with_capabilities(
        addr: SocketAddr,
        config: &AcquisitionConfig,
        capabilities: Capabilities<L, K, C, B>,
    ) -> Self {
        Self {
            addr,
            policy: RetryPolicy::from_config(config),
            settle_delay: config.settle_delay(),
            reap_occupants: config.reap_occupants,
            probe: PortProbe::new(capabilities.lister),
            reaper: ProcessReaper::new(capabilities.killer),
            clock: capabilities.clock,
            binder: capabilities.binder,
            state: AcquisitionState::Idle,
            attempts: Vec::new(),
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Attempts made so far, in order.
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Run the acquisition loop until the port is bound or acquisition fails.
    pub async fn start(&mut self) -> Result<ServerHandle, AcquisitionError> {
        let port = self.addr.port();
        if self.state != AcquisitionState::Idle {
            return Err(AcquisitionError::NotIdle {
                port,
                state: self.state,
            });
        }

        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            self.transition(AcquisitionState::Probing);
            let report = self.probe.query(port).await;

            if !report.is_empty() {
                if self.reap_occupants {
                    self.transition(AcquisitionState::Reaping);
                    tracing::info!(
                        attempt,
                        port,
                        pids = ?report.pids,
                        "Port occupied, terminating holders"
                    );

                    let summary = self.reaper.terminate(&report.pids);
                    if summary.attempted_any() {
                        tracing::debug!(
                            attempt,
                            delay_ms = self.settle_delay.as_millis() as u64,
                            "Waiting for the kernel to release the socket"
                        );
                        self.clock.sleep(self.settle_delay).await;
                    }
                } else {
                    tracing::info!(
                        attempt,
                        port,
                        pids = ?report.pids,
                        "Port occupied, reaping disabled"
                    );
                }
            }

            self.transition(AcquisitionState::Binding);
            tracing::info!(attempt, max_attempts, address = %self.addr, "Binding");

            let error = match self.binder.bind(self.addr).await {
                Ok(handle) => {
                    self.record(attempt, AttemptOutcome::Success);
                    self.transition(AcquisitionState::Listening);
                    tracing::info!(attempt, address = %handle.local_addr(), "Port acquired");
                    return Ok(handle);
                }
                Err(error) => error,
            };

            self.record(attempt, AttemptOutcome::from(&error));
            tracing::warn!(attempt, stage = "bind", reason = %error, "Acquisition attempt failed");

            if !error.is_retryable() {
                self.transition(AcquisitionState::Failed);
                tracing::error!(attempt, port, reason = %error, "Bind error is not retryable");
                return Err(AcquisitionError::Fatal {
                    port,
                    attempt,
                    source: error,
                });
            }

            if !self.policy.should_retry(attempt, &error) {
                self.transition(AcquisitionState::Failed);
                tracing::error!(attempts = attempt, port, "Could not bind, attempts exhausted");
                return Err(AcquisitionError::Exhausted {
                    port,
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.policy.delay_after(attempt);
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying after fixed delay"
            );
            self.clock.sleep(delay).await;
        }
    }

    fn transition(&mut self, next: AcquisitionState) {
        tracing::trace!(from = ?self.state, to = ?next, "Acquisition state change");
        self.state = next;
    }

    fn record(&mut self, ordinal: u32, outcome: AttemptOutcome) {
        self.attempts.push(Attempt { ordinal, outcome });
    }
}
