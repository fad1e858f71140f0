use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::controller::AccountController;

/// Totals for one reconciler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub checked: usize,
    pub missed_pings: usize,
    pub expired_challenges: usize,
}

/// Background task that periodically enforces ping and challenge deadlines
/// for every farmer in the directory.
pub struct Reconciler {
    controller: Arc<AccountController>,
    limiter: Arc<Semaphore>,
    workers: usize,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl Reconciler {
    pub fn new(
        controller: Arc<AccountController>,
        interval: Duration,
        workers: usize,
        shutdown: Arc<Notify>,
    ) -> Self {
        let workers = workers.max(1);
        Self {
            controller,
            limiter: Arc::new(Semaphore::new(workers)),
            workers,
            interval,
            shutdown,
        }
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "reconciler started: scanning every {:?} with {} workers",
                self.interval, self.workers
            );
            loop {
                tokio::select! {
                    _ = self.shutdown.notified() => {
                        info!("reconciler shutting down");
                        break;
                    }
                    _ = sleep(self.interval) => {
                        let report = self.run_once().await;
                        if report.missed_pings > 0 || report.expired_challenges > 0 {
                            info!(
                                checked = report.checked,
                                missed_pings = report.missed_pings,
                                expired_challenges = report.expired_challenges,
                                "reconciler tick"
                            );
                        } else {
                            debug!(checked = report.checked, "reconciler tick");
                        }
                    }
                }
            }
        })
    }

    /// One pass over the directory. Returns after every dispatched check
    /// has finished, so passes never overlap.
    pub async fn run_once(&self) -> TickReport {
        let ids = self.controller.farmer_ids();
        let mut checks = JoinSet::new();

        for id in ids {
            let permit = match Arc::clone(&self.limiter).acquire_owned().await {
                Ok(p) => p,
                Err(e) => {
                    warn!("reconciler limiter closed: {}", e);
                    break;
                }
            };
            let controller = Arc::clone(&self.controller);
            checks.spawn(async move {
                let _permit = permit;
                controller.check_deadlines(&id)
            });
        }

        let mut report = TickReport::default();
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok(Some(r)) => {
                    report.checked += 1;
                    report.missed_pings += r.missed_ping as usize;
                    report.expired_challenges += r.challenge_expired as usize;
                }
                // evicted between listing and checking
                Ok(None) => {}
                Err(e) => warn!("deadline check failed: {}", e),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::FarmerState;
    use crate::block_source::EmptyBlockSource;
    use crate::clock::ManualClock;
    use fsv_common::SupervisorConfig;
    use fsv_storage::MemoryStore;

    fn setup(lost_count: u32) -> (Arc<AccountController>, Arc<ManualClock>, Reconciler) {
        let mut cfg = SupervisorConfig::default();
        cfg.store.backend = "memory".to_string();
        cfg.farmer.ping.lost_count = lost_count;
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let ctl = AccountController::new(
            &cfg,
            Arc::new(MemoryStore::new()),
            clock.clone(),
            Arc::new(EmptyBlockSource),
        )
        .expect("controller");
        let rec = Reconciler::new(
            Arc::clone(&ctl),
            Duration::from_secs(10),
            4,
            Arc::new(Notify::new()),
        );
        (ctl, clock, rec)
    }

    #[tokio::test]
    async fn test_quiet_tick_changes_nothing() {
        let (ctl, _clock, rec) = setup(2);
        ctl.on_line("f1").expect("online");
        let report = rec.run_once().await;
        assert_eq!(report, TickReport { checked: 1, ..Default::default() });
        assert_eq!(ctl.account("f1").expect("account").state, FarmerState::Online);
        ctl.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_single_miss_reaches_offline_at_threshold_one() {
        let (ctl, clock, rec) = setup(1);
        ctl.on_line("f1").expect("online");

        clock.advance(Duration::from_secs(901));
        let report = rec.run_once().await;
        assert_eq!(report.missed_pings, 1);
        assert_eq!(ctl.directory_len(), 0);
        assert_eq!(ctl.account("f1").expect("account").state, FarmerState::Offline);
        ctl.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_lost_then_offline() {
        let (ctl, clock, rec) = setup(2);
        ctl.on_line("f1").expect("online");

        clock.advance(Duration::from_secs(901));
        rec.run_once().await;
        let lost_count = ctl.with_existing_handler("f1", |h| h.lost_count());
        assert_eq!(lost_count, Some(1));
        assert_eq!(ctl.account("f1").expect("account").state, FarmerState::Lost);

        clock.advance(Duration::from_secs(901));
        rec.run_once().await;
        assert_eq!(ctl.account("f1").expect("account").state, FarmerState::Offline);
        assert!(ctl.farmer_ids().is_empty());
        ctl.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_unanswered_challenge_is_penalized() {
        let (ctl, clock, rec) = setup(2);
        ctl.on_line("f1").expect("online");
        let mut issued = None;
        for _ in 0..64 {
            if let Some(c) = ctl.ping("f1", 100, 10).expect("ping").challenge {
                issued = Some(c);
                break;
            }
        }
        assert!(issued.is_some(), "no challenge after 64 pings");

        clock.advance(Duration::from_secs(301));
        let report = rec.run_once().await;
        assert_eq!(report.expired_challenges, 1);
        assert_eq!(report.missed_pings, 0);

        let acct = ctl.account("f1").expect("account");
        assert_eq!(acct.balance, 0);
        assert_eq!(acct.state, FarmerState::Online);
        assert!(ctl.context().verifier.challenges().is_empty());
        ctl.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_missed_ping_and_expired_challenge_in_one_tick() {
        let (ctl, clock, rec) = setup(1);
        ctl.on_line("f1").expect("online");
        let mut issued = false;
        for _ in 0..64 {
            if ctl.ping("f1", 100, 10).expect("ping").challenge.is_some() {
                issued = true;
                break;
            }
        }
        assert!(issued, "no challenge after 64 pings");

        clock.advance(Duration::from_secs(1_000));
        let report = rec.run_once().await;
        assert_eq!(
            report,
            TickReport {
                checked: 1,
                missed_pings: 1,
                expired_challenges: 1,
            }
        );

        let acct = ctl.account("f1").expect("account");
        assert_eq!(acct.balance, 0);
        assert_eq!(acct.state, FarmerState::Offline);
        assert_eq!(ctl.directory_len(), 0);
        assert!(ctl.context().verifier.challenges().is_empty());
        ctl.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_many_farmers_bounded_workers() {
        let (ctl, clock, rec) = setup(1);
        for i in 0..40 {
            ctl.on_line(&format!("farmer-{:02}", i)).expect("online");
        }
        clock.advance(Duration::from_secs(901));
        let report = rec.run_once().await;
        assert_eq!(report.checked, 40);
        assert_eq!(report.missed_pings, 40);
        assert_eq!(ctl.directory_len(), 0);
        ctl.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_started_task_stops_on_close() {
        let (ctl, _clock, _rec) = setup(2);
        ctl.start_reconciler();
        ctl.start_reconciler();
        ctl.close().await.expect("close");
        assert!(ctl.is_closed());
    }
}
