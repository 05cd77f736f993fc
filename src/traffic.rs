//! External traffic-generator adapter: spawns `ping`/`ping6` as a child
//! process and tears it down with a SIGINT→SIGTERM→SIGKILL escalation.
//!
//! Grounded in the general child-process lifecycle idiom; the kill
//! escalation gaps (200ms / 100ms) are exactly spec.md §5's resource
//! lifecycle rule for the traffic-generator child.

use std::process::{Child, Command};
use std::thread::sleep;
use std::time::Duration;

use netprobe_core::controller::TrafficControl;

const SIGINT_TO_SIGTERM_GAP: Duration = Duration::from_millis(200);
const SIGTERM_TO_SIGKILL_GAP: Duration = Duration::from_millis(100);

pub struct PingTraffic {
    target: String,
    rate_pps: u32,
    child: Option<Child>,
}

impl PingTraffic {
    pub fn new(target: String, rate_pps: u32) -> Self {
        Self {
            target,
            rate_pps,
            child: None,
        }
    }

    fn interval_arg(&self) -> String {
        let interval = 1.0 / (self.rate_pps.max(1) as f64);
        format!("{interval:.3}")
    }
}

impl TrafficControl for PingTraffic {
    fn start(&mut self) {
        let interval = self.interval_arg();
        let result = Command::new("ping")
            .arg("-i")
            .arg(&interval)
            .arg(&self.target)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn();

        match result {
            Ok(child) => self.child = Some(child),
            Err(e) => {
                tracing::warn!(target = %self.target, error = %e, "failed to start traffic generator; continuing without it");
            }
        }
    }

    fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id() as libc::pid_t;

        unsafe {
            libc::kill(pid, libc::SIGINT);
        }
        if wait_briefly(&mut child, SIGINT_TO_SIGTERM_GAP) {
            return;
        }

        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        if wait_briefly(&mut child, SIGTERM_TO_SIGKILL_GAP) {
            return;
        }

        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
        let _ = child.wait();
    }
}

/// Poll `try_wait` for up to `gap`, sleeping in short increments. Returns
/// `true` if the child had already exited.
fn wait_briefly(child: &mut Child, gap: Duration) -> bool {
    const POLL_INTERVAL: Duration = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while waited < gap {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(_) => return true,
        }
        sleep(POLL_INTERVAL);
        waited += POLL_INTERVAL;
    }
    matches!(child.try_wait(), Ok(Some(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_arg_is_reciprocal_of_rate() {
        let t = PingTraffic::new("127.0.0.1".into(), 10);
        assert_eq!(t.interval_arg(), "0.100");
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let mut t = PingTraffic::new("127.0.0.1".into(), 10);
        t.stop(); // must not panic when no child was ever spawned
    }
}
