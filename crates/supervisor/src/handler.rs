//! Per-farmer handler: the durable account plus scheduling state.
//!
//! A handler is owned by the controller's directory and only ever mutated
//! under the directory write lock, so none of the methods here lock.
//! Mutations set a dirty flag; the controller picks that up and schedules
//! the durable write.
//!
//! Invariant: `pending_challenge.is_some()` iff `next_conquer_time > 0`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use fsv_common::time::add_millis;
use fsv_common::{ConfigError, HashAlgo, SupervisorConfig};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::account::{BlockRange, FarmerAccount, FarmerState};
use crate::block_source::BlockSource;
use crate::cache::{BlockHashCache, ChallengeCache, ChallengeRequest};
use crate::challenge::{pick_challenge_range, ChallengeVerifier};
use crate::clock::Clock;
use crate::error::{Result, SupervisorError};
use crate::fsm::{self, FarmerEvent};
use crate::ping::{self, PingInterval};

/// Settings and collaborators shared by every handler.
pub struct HandlerContext {
    pub reward: u64,
    pub answer_delay: Duration,
    pub lost_threshold: u32,
    pub hash_algo: HashAlgo,
    pub ping_interval: Arc<dyn PingInterval>,
    pub clock: Arc<dyn Clock>,
    pub verifier: ChallengeVerifier,
}

impl HandlerContext {
    pub fn from_config(
        cfg: &SupervisorConfig,
        clock: Arc<dyn Clock>,
        blocks: Arc<dyn BlockSource>,
    ) -> std::result::Result<Self, ConfigError> {
        Ok(HandlerContext {
            reward: cfg.farmer.challenge.reward,
            answer_delay: cfg.answer_delay(),
            lost_threshold: cfg.farmer.ping.lost_count.max(1),
            hash_algo: cfg.challenge_hash_algo()?,
            ping_interval: ping::from_config(cfg),
            clock,
            verifier: ChallengeVerifier::new(
                Arc::new(ChallengeCache::new()),
                Arc::new(BlockHashCache::new()),
                blocks,
            ),
        })
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }
}

/// Result of a ping. `challenge` is set when the farmer must answer one.
#[derive(Debug, Clone)]
pub struct PingOutcome {
    pub challenge: Option<Arc<ChallengeRequest>>,
}

impl PingOutcome {
    pub fn need_challenge(&self) -> bool {
        self.challenge.is_some()
    }
}

/// What a deadline check changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeadlineReport {
    pub missed_ping: bool,
    pub challenge_expired: bool,
}

pub struct FarmerAccountHandler {
    account: FarmerAccount,
    lost_count: u32,
    next_ping_time: u64,
    next_conquer_time: u64,
    pending_challenge: Option<Arc<ChallengeRequest>>,
    dirty: bool,
    ctx: Arc<HandlerContext>,
}

impl fmt::Debug for FarmerAccountHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FarmerAccountHandler")
            .field("account", &self.account)
            .field("lost_count", &self.lost_count)
            .field("next_ping_time", &self.next_ping_time)
            .field("next_conquer_time", &self.next_conquer_time)
            .field("pending_challenge", &self.pending_challenge)
            .finish_non_exhaustive()
    }
}

impl FarmerAccountHandler {
    /// Fresh OFFLINE account with zero balance. Starts dirty so the record
    /// reaches the store.
    pub fn new(farmer_id: impl Into<String>, ctx: Arc<HandlerContext>) -> Self {
        let account = FarmerAccount::new(farmer_id, ctx.now());
        let mut h = Self::from_account(account, ctx);
        h.dirty = true;
        h
    }

    /// Wrap a record read back from the store. Scheduling state starts empty.
    pub fn from_account(account: FarmerAccount, ctx: Arc<HandlerContext>) -> Self {
        Self {
            account,
            lost_count: 0,
            next_ping_time: 0,
            next_conquer_time: 0,
            pending_challenge: None,
            dirty: false,
            ctx,
        }
    }

    pub fn farmer_id(&self) -> &str {
        &self.account.farmer_id
    }

    pub fn account(&self) -> &FarmerAccount {
        &self.account
    }

    pub fn state(&self) -> FarmerState {
        self.account.state
    }

    pub fn lost_count(&self) -> u32 {
        self.lost_count
    }

    pub fn next_conquer_time(&self) -> u64 {
        self.next_conquer_time
    }

    pub fn pending_challenge(&self) -> Option<&ChallengeRequest> {
        self.pending_challenge.as_deref()
    }

    /// Deadline for the next ping, armed on first access if unset.
    pub fn next_ping_time(&mut self) -> u64 {
        if self.next_ping_time == 0 {
            self.arm_ping();
        }
        self.next_ping_time
    }

    /// True once after any mutation that must be persisted.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn on_line(&mut self) -> Result<()> {
        self.fire(FarmerEvent::Online)?;
        self.lost_count = 0;
        self.arm_ping();
        Ok(())
    }

    pub fn ping(&mut self, high: u64, low: u64) -> Result<PingOutcome> {
        self.ping_with_rng(high, low, &mut rand::thread_rng())
    }

    pub fn ping_with_rng<R: Rng>(
        &mut self,
        high: u64,
        low: u64,
        rng: &mut R,
    ) -> Result<PingOutcome> {
        match self.account.state {
            FarmerState::Offline => return Err(SupervisorError::NotOnline(FarmerState::Offline)),
            FarmerState::Lost => self.fire(FarmerEvent::Online)?,
            FarmerState::Online => {}
        }
        self.lost_count = 0;
        self.arm_ping();

        if let Some(pending) = &self.pending_challenge {
            debug!(farmer = %self.account.farmer_id, range = %pending.range, "challenge still pending");
            return Ok(PingOutcome {
                challenge: Some(Arc::clone(pending)),
            });
        }

        let range = if rng.gen_bool(0.5) {
            pick_challenge_range(rng, high, low)
        } else {
            None
        };

        match range {
            Some(range) => {
                let req = ChallengeRequest::new(self.account.farmer_id.clone(), range, self.ctx.hash_algo);
                let (req, inserted) = self.ctx.verifier.issue(req);
                if !inserted {
                    debug!(farmer = %self.account.farmer_id, %range, "reusing outstanding challenge");
                }
                let deadline = add_millis(self.ctx.now(), self.ctx.answer_delay).max(1);
                self.pending_challenge = Some(Arc::clone(&req));
                self.next_conquer_time = deadline;
                info!(
                    farmer = %self.account.farmer_id,
                    %range,
                    algo = %req.hash_algo,
                    deadline,
                    "challenge issued"
                );
                Ok(PingOutcome {
                    challenge: Some(req),
                })
            }
            None => {
                self.credit_reward();
                Ok(PingOutcome { challenge: None })
            }
        }
    }

    pub fn conquer_challenge(
        &mut self,
        range: BlockRange,
        algo: HashAlgo,
        submitted_hash: &str,
    ) -> Result<()> {
        if !range.is_well_formed() {
            return Err(SupervisorError::InvalidArgument(format!(
                "malformed block range {}",
                range
            )));
        }

        let consumes_pending = self
            .pending_challenge
            .as_ref()
            .map_or(false, |p| p.matches(range, algo));
        if consumes_pending {
            self.clear_pending();
        }

        let verified =
            self.ctx
                .verifier
                .verify(&self.account.farmer_id, range, algo, submitted_hash);
        match verified {
            Ok(()) => {
                let now = self.ctx.now();
                self.account.balance = self.account.balance.saturating_add(self.ctx.reward);
                self.account.last_challenge_time = now;
                self.lost_count = 0;
                self.arm_ping();
                self.touch();
                info!(
                    farmer = %self.account.farmer_id,
                    balance = self.account.balance,
                    "challenge conquered"
                );
                Ok(())
            }
            Err(e) => {
                self.penalize("challenge verification failed");
                Err(e)
            }
        }
    }

    /// Fires only after at least one missed ping.
    pub fn lost(&mut self) -> Result<()> {
        if self.lost_count == 0 {
            return Err(SupervisorError::NoMissedPing);
        }
        self.fire(FarmerEvent::Lost)
    }

    /// Signs the farmer off. A pending challenge counts as abandoned: it is
    /// withdrawn and the balance is zeroed, as if it had gone unanswered.
    pub fn off_line(&mut self) -> Result<()> {
        self.fire(FarmerEvent::Offline)?;
        if let Some(req) = self.pending_challenge.take() {
            self.ctx.verifier.withdraw(&req);
            debug!(farmer = %self.account.farmer_id, range = %req.range, "challenge withdrawn");
            self.penalize("challenge abandoned by sign-off");
        }
        self.next_conquer_time = 0;
        Ok(())
    }

    /// Both deadline checks run by the reconciler. Either, both, or
    /// neither may fire. The challenge check runs first so an expiry is
    /// reported even when the missed ping takes the farmer offline.
    pub fn enforce_deadlines(&mut self, now: u64) -> DeadlineReport {
        let challenge_expired = self.enforce_conquer_deadline(now);
        let missed_ping = self.enforce_ping_deadline(now);
        DeadlineReport {
            missed_ping,
            challenge_expired,
        }
    }

    fn enforce_ping_deadline(&mut self, now: u64) -> bool {
        if now <= self.next_ping_time() {
            return false;
        }

        self.lost_count += 1;
        self.dirty = true;
        warn!(farmer = %self.account.farmer_id, lost_count = self.lost_count, "ping deadline missed");

        if fsm::can(self.account.state, FarmerEvent::Lost) {
            if let Err(e) = self.lost() {
                debug!(farmer = %self.account.farmer_id, "lost transition skipped: {}", e);
            }
        }
        if self.lost_count >= self.ctx.lost_threshold
            && fsm::can(self.account.state, FarmerEvent::Offline)
        {
            if let Err(e) = self.off_line() {
                debug!(farmer = %self.account.farmer_id, "offline transition skipped: {}", e);
            }
        }
        self.arm_ping();
        true
    }

    fn enforce_conquer_deadline(&mut self, now: u64) -> bool {
        if self.next_conquer_time == 0 || now <= self.next_conquer_time {
            return false;
        }
        if let Some(req) = self.pending_challenge.as_ref() {
            self.ctx.verifier.withdraw(req);
        }
        self.clear_pending();
        self.penalize("challenge answer deadline passed");
        true
    }

    fn fire(&mut self, event: FarmerEvent) -> Result<()> {
        let from = self.account.state;
        let to = fsm::transition(from, event)
            .ok_or(SupervisorError::InvalidTransition { event, from })?;
        self.account.state = to;
        self.touch();
        info!(farmer = %self.account.farmer_id, %event, %from, %to, "state transition");
        Ok(())
    }

    fn arm_ping(&mut self) {
        let interval = self.ctx.ping_interval.next_interval();
        self.next_ping_time = add_millis(self.ctx.now(), interval).max(1);
    }

    fn credit_reward(&mut self) {
        self.account.balance = self.account.balance.saturating_add(self.ctx.reward);
        self.touch();
        debug!(farmer = %self.account.farmer_id, balance = self.account.balance, "ping rewarded");
    }

    fn penalize(&mut self, reason: &str) {
        self.account.balance = 0;
        self.touch();
        warn!(farmer = %self.account.farmer_id, reason, "balance zeroed");
    }

    fn clear_pending(&mut self) {
        self.pending_challenge = None;
        self.next_conquer_time = 0;
    }

    fn touch(&mut self) {
        self.account.last_modified_time = self.ctx.now();
        self.dirty = true;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::block_source::EmptyBlockSource;
    use crate::clock::ManualClock;
    use crate::ping::FixedPingInterval;
    use fsv_common::hash_hex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    pub(crate) const START: u64 = 1_700_000_000_000;

    pub(crate) fn context(clock: Arc<ManualClock>, lost_threshold: u32) -> Arc<HandlerContext> {
        Arc::new(HandlerContext {
            reward: 100,
            answer_delay: Duration::from_secs(300),
            lost_threshold,
            hash_algo: HashAlgo::Sha256,
            ping_interval: Arc::new(FixedPingInterval {
                base: Duration::from_secs(900),
            }),
            clock,
            verifier: ChallengeVerifier::new(
                Arc::new(ChallengeCache::new()),
                Arc::new(BlockHashCache::new()),
                Arc::new(EmptyBlockSource),
            ),
        })
    }

    fn online_handler(ctx: Arc<HandlerContext>) -> FarmerAccountHandler {
        let mut h = FarmerAccountHandler::new("f1", ctx);
        h.on_line().expect("online");
        h
    }

    /// Ping until a challenge comes back.
    fn ping_until_challenge(h: &mut FarmerAccountHandler, rng: &mut StdRng) -> Arc<ChallengeRequest> {
        for _ in 0..64 {
            if let Some(c) = h.ping_with_rng(100, 10, rng).expect("ping").challenge {
                return c;
            }
        }
        panic!("no challenge after 64 pings");
    }

    fn answer(farmer_id: &str) -> String {
        let original = hash_hex(HashAlgo::Sha256, b"");
        hash_hex(HashAlgo::Sha256, format!("{}{}", original, farmer_id).as_bytes())
    }

    #[test]
    fn test_online_twice_is_rejected() {
        let clock = Arc::new(ManualClock::new(START));
        let mut h = online_handler(context(clock, 2));
        assert_eq!(h.state(), FarmerState::Online);
        assert!(matches!(
            h.on_line(),
            Err(SupervisorError::InvalidTransition {
                event: FarmerEvent::Online,
                from: FarmerState::Online
            })
        ));
        assert_eq!(h.state(), FarmerState::Online);
    }

    #[test]
    fn test_lost_requires_missed_ping() {
        let clock = Arc::new(ManualClock::new(START));
        let mut h = online_handler(context(clock, 5));
        assert!(matches!(h.lost(), Err(SupervisorError::NoMissedPing)));
        assert_eq!(h.state(), FarmerState::Online);

        h.lost_count = 1;
        h.lost().expect("lost");
        assert_eq!(h.state(), FarmerState::Lost);

        h.off_line().expect("offline");
        assert_eq!(h.state(), FarmerState::Offline);
    }

    #[test]
    fn test_transition_updates_modified_time_and_dirty() {
        let clock = Arc::new(ManualClock::new(START));
        let mut h = FarmerAccountHandler::new("f1", context(clock.clone(), 2));
        assert!(h.take_dirty());
        assert!(!h.take_dirty());

        clock.advance(Duration::from_secs(5));
        h.on_line().expect("online");
        assert!(h.take_dirty());
        assert_eq!(h.account().last_modified_time, START + 5_000);
        assert_eq!(h.next_ping_time(), START + 5_000 + 900_000);
    }

    #[test]
    fn test_ping_offline_fails() {
        let clock = Arc::new(ManualClock::new(START));
        let mut h = FarmerAccountHandler::new("f1", context(clock, 2));
        assert!(matches!(h.ping(100, 10), Err(SupervisorError::NotOnline(FarmerState::Offline))));
    }

    #[test]
    fn test_degenerate_range_always_rewards() {
        let clock = Arc::new(ManualClock::new(START));
        let mut h = online_handler(context(clock, 2));
        let mut rng = StdRng::seed_from_u64(3);
        for i in 1..=10u64 {
            let out = h.ping_with_rng(10, 10, &mut rng).expect("ping");
            assert!(!out.need_challenge());
            assert_eq!(h.account().balance, 100 * i);
        }
        let out = h.ping_with_rng(5, 10, &mut rng).expect("ping");
        assert!(!out.need_challenge());
    }

    #[test]
    fn test_challenge_roundtrip_and_replay() {
        let clock = Arc::new(ManualClock::new(START));
        let ctx = context(clock, 2);
        let mut h = online_handler(Arc::clone(&ctx));
        let mut rng = StdRng::seed_from_u64(11);

        let req = ping_until_challenge(&mut h, &mut rng);
        assert!(req.range.high <= 100 && req.range.low >= 10 && req.range.low < req.range.high);
        assert_eq!(req.hash_algo, HashAlgo::Sha256);
        assert!(h.next_conquer_time() > 0);
        let before = h.account().balance;

        h.conquer_challenge(req.range, req.hash_algo, &answer("f1")).expect("conquer");
        assert_eq!(h.account().balance, before + 100);
        assert_eq!(h.next_conquer_time(), 0);
        assert!(h.pending_challenge().is_none());
        assert!(h.account().last_challenge_time > 0);

        let err = h
            .conquer_challenge(req.range, req.hash_algo, &answer("f1"))
            .expect_err("replay");
        assert!(matches!(err, SupervisorError::VerificationFailed(_)));
        assert_eq!(h.account().balance, 0);
    }

    #[test]
    fn test_pending_challenge_is_returned_again() {
        let clock = Arc::new(ManualClock::new(START));
        let ctx = context(clock.clone(), 2);
        let mut h = online_handler(Arc::clone(&ctx));
        let mut rng = StdRng::seed_from_u64(5);

        let first = ping_until_challenge(&mut h, &mut rng);
        let deadline = h.next_conquer_time();
        let balance = h.account().balance;

        clock.advance(Duration::from_secs(10));
        let again = h.ping_with_rng(100, 10, &mut rng).expect("ping").challenge.expect("pending");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(h.next_conquer_time(), deadline);
        assert_eq!(h.account().balance, balance);
        assert_eq!(ctx.verifier.challenges().len(), 1);
    }

    #[test]
    fn test_wrong_answer_zeroes_balance() {
        let clock = Arc::new(ManualClock::new(START));
        let mut h = online_handler(context(clock, 2));
        h.account.balance = 700;
        let mut rng = StdRng::seed_from_u64(9);
        let req = ping_until_challenge(&mut h, &mut rng);

        let err = h
            .conquer_challenge(req.range, req.hash_algo, &answer("someone-else"))
            .expect_err("mismatch");
        assert!(matches!(err, SupervisorError::VerificationFailed(_)));
        assert_eq!(h.account().balance, 0);
        assert!(h.pending_challenge().is_none());
        assert_eq!(h.next_conquer_time(), 0);
    }

    #[test]
    fn test_conquer_malformed_range_does_not_mutate() {
        let clock = Arc::new(ManualClock::new(START));
        let mut h = online_handler(context(clock, 2));
        h.account.balance = 300;
        h.take_dirty();
        let err = h
            .conquer_challenge(BlockRange::new(1, 9), HashAlgo::Sha256, "x")
            .expect_err("malformed");
        assert!(matches!(err, SupervisorError::InvalidArgument(_)));
        assert_eq!(h.account().balance, 300);
        assert!(!h.take_dirty());
    }

    #[test]
    fn test_ping_while_lost_comes_back_online() {
        let clock = Arc::new(ManualClock::new(START));
        let mut h = online_handler(context(clock, 5));
        h.lost_count = 1;
        h.lost().expect("lost");

        let mut rng = StdRng::seed_from_u64(1);
        h.ping_with_rng(10, 10, &mut rng).expect("ping");
        assert_eq!(h.state(), FarmerState::Online);
        assert_eq!(h.lost_count(), 0);
    }

    #[test]
    fn test_offline_with_pending_challenge_is_penalized() {
        let clock = Arc::new(ManualClock::new(START));
        let ctx = context(clock.clone(), 2);
        let mut h = online_handler(Arc::clone(&ctx));
        h.account.balance = 500;
        let mut rng = StdRng::seed_from_u64(21);
        ping_until_challenge(&mut h, &mut rng);
        assert!(h.account().balance > 0);

        h.off_line().expect("offline");
        assert_eq!(h.account().balance, 0);
        assert!(h.pending_challenge().is_none());
        assert_eq!(h.next_conquer_time(), 0);
        assert!(ctx.verifier.challenges().is_empty());

        // signing back on does not restore anything
        h.on_line().expect("online");
        clock.advance(Duration::from_secs(301));
        let report = h.enforce_deadlines(clock.now_millis());
        assert!(!report.challenge_expired);
        assert_eq!(h.account().balance, 0);
    }

    #[test]
    fn test_offline_without_challenge_keeps_balance() {
        let clock = Arc::new(ManualClock::new(START));
        let mut h = online_handler(context(clock, 2));
        let mut rng = StdRng::seed_from_u64(2);
        h.ping_with_rng(10, 10, &mut rng).expect("ping");
        assert_eq!(h.account().balance, 100);

        h.off_line().expect("offline");
        assert_eq!(h.account().balance, 100);
    }

    #[test]
    fn test_both_deadlines_fire_in_one_check() {
        let clock = Arc::new(ManualClock::new(START));
        let ctx = context(clock.clone(), 1);
        let mut h = online_handler(Arc::clone(&ctx));
        h.account.balance = 500;
        let mut rng = StdRng::seed_from_u64(17);
        ping_until_challenge(&mut h, &mut rng);

        clock.advance(Duration::from_secs(1_000));
        let report = h.enforce_deadlines(clock.now_millis());
        assert_eq!(
            report,
            DeadlineReport {
                missed_ping: true,
                challenge_expired: true
            }
        );
        assert_eq!(h.account().balance, 0);
        assert_eq!(h.state(), FarmerState::Offline);
        assert!(ctx.verifier.challenges().is_empty());
    }

    #[test]
    fn test_missed_pings_reach_offline() {
        let clock = Arc::new(ManualClock::new(START));
        let mut h = online_handler(context(clock.clone(), 2));

        clock.advance(Duration::from_secs(901));
        let report = h.enforce_deadlines(clock.now_millis());
        assert!(report.missed_ping);
        assert_eq!(h.lost_count(), 1);
        assert_eq!(h.state(), FarmerState::Lost);

        // re-armed, so an immediate second check does nothing
        assert!(!h.enforce_deadlines(clock.now_millis()).missed_ping);

        clock.advance(Duration::from_secs(901));
        h.enforce_deadlines(clock.now_millis());
        assert_eq!(h.lost_count(), 2);
        assert_eq!(h.state(), FarmerState::Offline);
    }

    #[test]
    fn test_expired_challenge_is_penalized() {
        let clock = Arc::new(ManualClock::new(START));
        let ctx = context(clock.clone(), 2);
        let mut h = online_handler(Arc::clone(&ctx));
        h.account.balance = 400;
        let mut rng = StdRng::seed_from_u64(13);
        ping_until_challenge(&mut h, &mut rng);

        clock.advance(Duration::from_secs(299));
        assert!(!h.enforce_deadlines(clock.now_millis()).challenge_expired);

        clock.advance(Duration::from_secs(2));
        let report = h.enforce_deadlines(clock.now_millis());
        assert!(report.challenge_expired);
        assert!(!report.missed_ping);
        assert_eq!(h.account().balance, 0);
        assert!(h.pending_challenge().is_none());
        assert!(ctx.verifier.challenges().is_empty());
    }
}
