//! Periodic refresh of the screen being watched.
//!
//! A view is refreshed on a steady cadence while it is active, and left alone while it has
//! unsaved changes or an open edit dialog so server state never clobbers local edits.

use crate::client::Gateway;
use crate::services::session::SessionError;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest single sleep; bounds how long a cancel request waits.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

pub trait PolledView {
    fn name(&self) -> &str;

    /// True while a refresh would overwrite local state.
    fn is_suspended(&self) -> bool;

    fn refresh(&mut self, gateway: &dyn Gateway) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Refreshed,
    Suspended,
    NotDue,
}

#[derive(Debug)]
pub struct Poller {
    interval: Duration,
    last_refresh: Option<Instant>,
}

impl Poller {
    /// The first tick is always due.
    pub fn new(interval: Duration) -> Self {
        Poller {
            interval,
            last_refresh: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn tick(&mut self, view: &mut dyn PolledView, gateway: &dyn Gateway) -> Result<Tick, SessionError> {
        self.tick_at(view, gateway, Instant::now())
    }

    /// A suspended view stays due, so it is refreshed on the first tick after it resumes.
    pub fn tick_at(
        &mut self,
        view: &mut dyn PolledView,
        gateway: &dyn Gateway,
        now: Instant,
    ) -> Result<Tick, SessionError> {
        if let Some(last) = self.last_refresh
            && now.saturating_duration_since(last) < self.interval
        {
            return Ok(Tick::NotDue);
        }
        if view.is_suspended() {
            debug!("Refresh of {} suspended", view.name());
            return Ok(Tick::Suspended);
        }
        view.refresh(gateway)?;
        self.last_refresh = Some(now);
        Ok(Tick::Refreshed)
    }
}

/// Poll `view` until `cancel` is raised. Refresh failures are logged and retried on the
/// next cadence.
pub fn run_loop(
    view: &mut dyn PolledView,
    gateway: &dyn Gateway,
    interval: Duration,
    cancel: &AtomicBool,
    mut on_refresh: impl FnMut(&dyn PolledView),
) -> Result<(), String> {
    let mut poller = Poller::new(interval);
    while !cancel.load(Ordering::SeqCst) {
        let tick_start = Instant::now();
        match poller.tick_at(view, gateway, tick_start) {
            Ok(Tick::Refreshed) => on_refresh(view),
            Ok(Tick::Suspended) | Ok(Tick::NotDue) => {}
            Err(e) => {
                warn!("Refresh of {} failed: {}", view.name(), e);
                // count the failed attempt so the cadence holds
                poller.last_refresh = Some(tick_start);
            }
        }

        // Maintain steady cadence, waking up early on cancel
        let deadline = tick_start + interval;
        while !cancel.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::FakeGateway;

    struct Counter {
        refreshes: usize,
        suspended: bool,
    }

    impl PolledView for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn is_suspended(&self) -> bool {
            self.suspended
        }

        fn refresh(&mut self, gateway: &dyn Gateway) -> Result<(), SessionError> {
            gateway.schedule()?;
            self.refreshes += 1;
            Ok(())
        }
    }

    #[test]
    fn ticks_follow_the_interval() {
        let gw = FakeGateway::with_fixtures();
        let mut view = Counter {
            refreshes: 0,
            suspended: false,
        };
        let mut poller = Poller::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert_eq!(poller.tick_at(&mut view, &gw, t0).ok(), Some(Tick::Refreshed));
        assert_eq!(poller.tick_at(&mut view, &gw, t0 + Duration::from_secs(10)).ok(), Some(Tick::NotDue));
        assert_eq!(poller.tick_at(&mut view, &gw, t0 + Duration::from_secs(30)).ok(), Some(Tick::Refreshed));
        assert_eq!(view.refreshes, 2);
    }

    #[test]
    fn suspended_view_is_refreshed_once_it_resumes() {
        let gw = FakeGateway::with_fixtures();
        let mut view = Counter {
            refreshes: 0,
            suspended: true,
        };
        let mut poller = Poller::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert_eq!(poller.tick_at(&mut view, &gw, t0).ok(), Some(Tick::Suspended));
        view.suspended = false;
        assert_eq!(poller.tick_at(&mut view, &gw, t0 + Duration::from_secs(1)).ok(), Some(Tick::Refreshed));
        assert_eq!(view.refreshes, 1);
    }

    #[test]
    fn loop_exits_when_cancelled() {
        let gw = FakeGateway::with_fixtures();
        let mut view = Counter {
            refreshes: 0,
            suspended: false,
        };
        let cancel = AtomicBool::new(false);
        let mut seen = 0;
        let result = run_loop(&mut view, &gw, Duration::from_millis(1), &cancel, |_| {
            seen += 1;
            if seen == 3 {
                cancel.store(true, Ordering::SeqCst);
            }
        });
        assert!(result.is_ok());
        assert_eq!(view.refreshes, 3);
    }
}
