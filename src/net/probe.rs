//! Port occupancy probing.
//!
//! # Responsibilities
//! - Ask the operating system which processes are listening on a port
//! - Bound the query in time
//! - Degrade to "assume free" when the query mechanism is missing or fails
//!
//! # Design Decisions
//! - Advisory only: a report is stale the moment it is produced; the bind
//!   syscall is the authority
//! - Never reports the current process

use std::collections::BTreeSet;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Processes observed listening on a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyReport {
    pub port: u16,
    pub pids: BTreeSet<u32>,
}

impl OccupancyReport {
    /// A report with no occupants.
    pub fn free(port: u16) -> Self {
        Self {
            port,
            pids: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }
}

/// Capability: list PIDs with a listening TCP socket on a port.
pub trait ProcessLister: Send + Sync {
    fn listening_pids(
        &self,
        port: u16,
    ) -> impl Future<Output = std::io::Result<BTreeSet<u32>>> + Send;
}

/// Lists listeners with `lsof`.
#[derive(Debug, Clone)]
pub struct LsofLister {
    timeout: Duration,
}

impl LsofLister {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for LsofLister {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ProcessLister for LsofLister {
    async fn listening_pids(&self, port: u16) -> std::io::Result<BTreeSet<u32>> {
        let query = Command::new("lsof")
            .arg("-nP")
            .arg("-t")
            .arg(format!("-iTCP:{port}"))
            .arg("-sTCP:LISTEN")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, query)
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("lsof did not answer within {:?}", self.timeout),
                )
            })??;

        // lsof exits 1 with empty output when nothing matches.
        if !output.status.success() && !output.stdout.is_empty() {
            return Err(std::io::Error::other(format!(
                "lsof exited with {}",
                output.status
            )));
        }

        Ok(parse_pid_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse one PID per line, ignoring anything that is not a positive integer.
pub fn parse_pid_list(raw: &str) -> BTreeSet<u32> {
    raw.lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .filter(|pid| *pid > 0)
        .collect()
}

/// Best-effort query of a port's occupants.
#[derive(Debug, Clone)]
pub struct PortProbe<L> {
    lister: L,
    own_pid: u32,
}

impl<L: ProcessLister> PortProbe<L> {
    pub fn new(lister: L) -> Self {
        Self {
            lister,
            own_pid: std::process::id(),
        }
    }

    /// Report who holds `port`. Never fails: a failed query reports the port free.
    pub async fn query(&self, port: u16) -> OccupancyReport {
        match self.lister.listening_pids(port).await {
            Ok(mut pids) => {
                pids.remove(&self.own_pid);
                tracing::debug!(port, pids = ?pids, "Port probe complete");
                OccupancyReport { port, pids }
            }
            Err(e) => {
                tracing::warn!(
                    port,
                    error = %e,
                    "Port probe failed, assuming port is free"
                );
                OccupancyReport::free(port)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(std::io::Result<Vec<u32>>);

    impl ProcessLister for Fixed {
        async fn listening_pids(&self, _port: u16) -> std::io::Result<BTreeSet<u32>> {
            match &self.0 {
                Ok(pids) => Ok(pids.iter().copied().collect()),
                Err(e) => Err(std::io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    #[test]
    fn parses_lsof_output() {
        let pids = parse_pid_list("1234\n  5678 \n\nabc\n0\n1234\n");
        assert_eq!(pids.into_iter().collect::<Vec<_>>(), vec![1234, 5678]);
    }

    #[tokio::test]
    async fn failed_query_assumes_free() {
        let probe = PortProbe::new(Fixed(Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "lsof: command not found",
        ))));
        assert_eq!(probe.query(4011).await, OccupancyReport::free(4011));
    }

    #[tokio::test]
    async fn excludes_own_pid() {
        let own = std::process::id();
        let probe = PortProbe::new(Fixed(Ok(vec![own, 4242])));
        let report = probe.query(4011).await;
        assert_eq!(report.pids.into_iter().collect::<Vec<_>>(), vec![4242]);
    }

    #[tokio::test]
    async fn lsof_on_unused_port_does_not_error_out() {
        // Either lsof is installed and reports nothing, or it is absent and the
        // probe falls back to "free". Both are an empty report.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = PortProbe::new(LsofLister::new(Duration::from_secs(5)));
        assert!(probe.query(port).await.is_empty());
    }
}
