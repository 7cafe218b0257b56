//! Discovery scan scheduling.
//!
//! The controller tracks whether a scan is running, owns the restart timer
//! armed between scans, and remembers whether "all devices found" has been
//! reported. It never touches the radio itself; the manager asks it what to
//! do and issues the requests.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::manager::TimerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Scanning,
    /// Between scans, waiting for the restart timer.
    RestartPending,
    /// Every slot is filled. Only a reset leaves this state.
    Complete,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanState::Idle => "Idle",
            ScanState::Scanning => "Scanning",
            ScanState::RestartPending => "RestartPending",
            ScanState::Complete => "Complete",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct ScanController {
    state: ScanState,

    /// Identifies the currently armed restart timer. Bumped on every cancel
    /// so a timer that already fired is recognised as stale.
    epoch: u64,
    restart: Option<JoinHandle<()>>,
    all_found_reported: bool,
}

impl ScanController {
    pub fn new() -> Self {
        Self {
            state: ScanState::Idle,
            epoch: 0,
            restart: None,
            all_found_reported: false,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn is_scanning(&self) -> bool {
        self.state == ScanState::Scanning
    }

    pub fn is_complete(&self) -> bool {
        self.state == ScanState::Complete
    }

    /// Enter `Scanning`. Returns `false`, changing nothing, when a scan is
    /// already running or discovery is complete.
    pub fn begin(&mut self) -> bool {
        match self.state {
            ScanState::Scanning | ScanState::Complete => false,
            ScanState::Idle | ScanState::RestartPending => {
                self.cancel_restart();
                self.state = ScanState::Scanning;
                true
            }
        }
    }

    /// The radio reported the scan window elapsed. Returns `false` for a
    /// completion that no running scan accounts for.
    pub fn on_complete(&mut self) -> bool {
        if self.state != ScanState::Scanning {
            trace!(state = %self.state, "ignoring scan completion");
            return false;
        }
        self.state = ScanState::Idle;
        true
    }

    /// Leave `Scanning` or `RestartPending` for `Idle`, cancelling any
    /// restart timer. `Complete` is kept.
    pub fn stop(&mut self) {
        self.cancel_restart();
        if self.state != ScanState::Complete {
            self.state = ScanState::Idle;
        }
    }

    /// Schedule a [`TimerEvent::ScanRestart`] after `interval`.
    pub fn arm_restart(&mut self, interval: Duration, timers: &UnboundedSender<TimerEvent>) {
        self.cancel_restart();
        self.state = ScanState::RestartPending;

        let epoch = self.epoch;
        let timers = timers.clone();
        debug!(?interval, "scan restart armed");
        self.restart = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = timers.send(TimerEvent::ScanRestart { epoch });
        }));
    }

    /// Abort the restart timer, if armed.
    pub fn cancel_restart(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if let Some(handle) = self.restart.take() {
            handle.abort();
        }
        if self.state == ScanState::RestartPending {
            self.state = ScanState::Idle;
        }
    }

    /// Whether a fired restart timer is the one currently armed.
    pub fn restart_due(&mut self, epoch: u64) -> bool {
        if self.state != ScanState::RestartPending || epoch != self.epoch {
            return false;
        }
        self.restart = None;
        true
    }

    /// Enter `Complete`. Returns `true` the first time since the last reset,
    /// which is when "all devices found" should be reported.
    pub fn mark_complete(&mut self) -> bool {
        self.cancel_restart();
        self.state = ScanState::Complete;
        !std::mem::replace(&mut self.all_found_reported, true)
    }

    /// Back to `Idle` with nothing reported.
    pub fn reset(&mut self) {
        self.cancel_restart();
        self.state = ScanState::Idle;
        self.all_found_reported = false;
    }
}

impl Default for ScanController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScanController {
    fn drop(&mut self) {
        if let Some(handle) = self.restart.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_begin_is_noop_while_scanning() {
        let mut scan = ScanController::new();
        assert!(scan.begin());
        assert!(!scan.begin());
        assert!(scan.is_scanning());
    }

    #[test]
    fn test_completion_only_counts_while_scanning() {
        let mut scan = ScanController::new();
        assert!(!scan.on_complete());
        scan.begin();
        scan.stop();
        assert!(!scan.on_complete());
        scan.begin();
        assert!(scan.on_complete());
        assert_eq!(scan.state(), ScanState::Idle);
    }

    #[test]
    fn test_complete_is_terminal_until_reset() {
        let mut scan = ScanController::new();
        scan.begin();
        assert!(scan.mark_complete());
        assert!(!scan.mark_complete());
        assert!(!scan.begin());
        scan.stop();
        assert!(scan.is_complete());

        scan.reset();
        assert!(scan.begin());
        assert!(scan.mark_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_timer_fires_after_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scan = ScanController::new();
        scan.begin();
        scan.on_complete();
        scan.arm_restart(Duration::from_secs(5), &tx);
        assert_eq!(scan.state(), ScanState::RestartPending);

        let TimerEvent::ScanRestart { epoch } = rx.recv().await.unwrap() else {
            panic!("expected ScanRestart");
        };
        assert!(scan.restart_due(epoch));
        assert!(scan.begin());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_restart_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scan = ScanController::new();
        scan.arm_restart(Duration::from_secs(5), &tx);
        scan.cancel_restart();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(scan.state(), ScanState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_restart_is_rejected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scan = ScanController::new();
        scan.arm_restart(Duration::from_secs(1), &tx);
        let TimerEvent::ScanRestart { epoch } = rx.recv().await.unwrap() else {
            panic!("expected ScanRestart");
        };

        // A reset between firing and handling makes the event stale.
        scan.reset();
        assert!(!scan.restart_due(epoch));
    }
}
