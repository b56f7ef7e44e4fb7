//! Shared fakes for integration tests.
//!
//! Each fake is cheap to clone and shares its recordings between clones, so a
//! test can hand one copy to the code under test and inspect the other.

#![allow(dead_code)]

use nix::errno::Errno;
use std::collections::{BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use port_warden::config::{AcquisitionConfig, WardenConfig};
use port_warden::lifecycle::{AcquisitionController, Capabilities, Clock, Terminator};
use port_warden::net::{
    BindError, Binder, KillOutcome, ProcessKiller, ProcessLister, ServerHandle, TcpBinder,
};

/// Answers probes from a script; the last entry repeats once the script runs out.
#[derive(Clone, Default)]
pub struct ScriptedLister {
    script: Arc<Mutex<VecDeque<BTreeSet<u32>>>>,
    calls: Arc<Mutex<u32>>,
}

impl ScriptedLister {
    pub fn always(pids: &[u32]) -> Self {
        Self::sequence(&[pids])
    }

    pub fn sequence(steps: &[&[u32]]) -> Self {
        let script = steps
            .iter()
            .map(|pids| pids.iter().copied().collect())
            .collect();
        Self {
            script: Arc::new(Mutex::new(script)),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl ProcessLister for ScriptedLister {
    async fn listening_pids(&self, _port: u16) -> std::io::Result<BTreeSet<u32>> {
        *self.calls.lock().unwrap() += 1;
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            Ok(script.pop_front().unwrap_or_default())
        } else {
            Ok(script.front().cloned().unwrap_or_default())
        }
    }
}

/// How the recording killer answers.
#[derive(Clone, Copy)]
pub enum KillBehavior {
    Signalled,
    AlreadyExited,
    PermissionDenied,
}

/// Records every PID it is asked to kill without touching real processes.
#[derive(Clone)]
pub struct RecordingKiller {
    behavior: KillBehavior,
    killed: Arc<Mutex<Vec<u32>>>,
}

impl RecordingKiller {
    pub fn new(behavior: KillBehavior) -> Self {
        Self {
            behavior,
            killed: Arc::default(),
        }
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap().clone()
    }
}

impl ProcessKiller for RecordingKiller {
    fn kill(&self, pid: u32) -> std::io::Result<KillOutcome> {
        self.killed.lock().unwrap().push(pid);
        match self.behavior {
            KillBehavior::Signalled => Ok(KillOutcome::Signalled),
            KillBehavior::AlreadyExited => Ok(KillOutcome::AlreadyExited),
            KillBehavior::PermissionDenied => Err(Errno::EPERM.into()),
        }
    }
}

/// Returns immediately and remembers what it was asked to wait for.
#[derive(Clone, Default)]
pub struct RecordingClock {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Fails binds from a script, then binds a real ephemeral loopback port.
#[derive(Clone, Default)]
pub struct ScriptedBinder {
    failures: Arc<Mutex<VecDeque<BindError>>>,
    calls: Arc<Mutex<u32>>,
}

impl ScriptedBinder {
    pub fn failing(failures: Vec<BindError>) -> Self {
        Self {
            failures: Arc::new(Mutex::new(failures.into())),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl Binder for ScriptedBinder {
    async fn bind(&self, _addr: SocketAddr) -> Result<ServerHandle, BindError> {
        *self.calls.lock().unwrap() += 1;
        let next = self.failures.lock().unwrap().pop_front();
        match next {
            Some(error) => Err(error),
            None => TcpBinder::default().bind(loopback(0)).await,
        }
    }
}

/// Records exit statuses instead of ending the test process.
#[derive(Clone, Default)]
pub struct RecordingExit {
    statuses: Arc<Mutex<Vec<i32>>>,
}

impl RecordingExit {
    pub fn statuses(&self) -> Vec<i32> {
        self.statuses.lock().unwrap().clone()
    }
}

impl Terminator for RecordingExit {
    fn exit(&self, status: i32) {
        self.statuses.lock().unwrap().push(status);
    }
}

pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub fn port_in_use(port: u16) -> BindError {
    BindError::from_io(port, std::io::ErrorKind::AddrInUse.into())
}

/// Acquisition settings with the stock delays.
pub fn acquisition_config() -> AcquisitionConfig {
    WardenConfig::default().acquisition
}

pub fn controller<L, K, C, B>(
    addr: SocketAddr,
    config: &AcquisitionConfig,
    lister: L,
    killer: K,
    clock: C,
    binder: B,
) -> AcquisitionController<L, K, C, B>
where
    L: ProcessLister,
    K: ProcessKiller,
    C: Clock,
    B: Binder,
{
    AcquisitionController::with_capabilities(
        addr,
        config,
        Capabilities {
            lister,
            killer,
            clock,
            binder,
        },
    )
}

/// Poll `condition` every few milliseconds until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
