//! Heartbeat interval policies.

use std::sync::Arc;
use std::time::Duration;

use fsv_common::SupervisorConfig;
use rand::Rng;

/// How long a farmer may stay silent before the next ping is overdue.
pub trait PingInterval: Send + Sync + 'static {
    fn next_interval(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedPingInterval {
    pub base: Duration,
}

impl PingInterval for FixedPingInterval {
    fn next_interval(&self) -> Duration {
        self.base
    }
}

/// Base interval moved up by `[0, up)` or down by `[0, down)` on a coin
/// flip. A result that is not positive falls back to the base.
#[derive(Debug, Clone, Copy)]
pub struct JitteredPingInterval {
    pub base: Duration,
    pub up: Duration,
    pub down: Duration,
}

impl JitteredPingInterval {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        let base = self.base.as_secs() as i64;
        let mut secs = base;
        if rng.gen_bool(0.5) {
            secs += random_below(rng, self.up.as_secs());
        } else {
            secs -= random_below(rng, self.down.as_secs());
        }

        if secs <= 0 {
            secs = base;
        }
        Duration::from_secs(secs as u64)
    }
}

impl PingInterval for JitteredPingInterval {
    fn next_interval(&self) -> Duration {
        self.sample(&mut rand::thread_rng())
    }
}

fn random_below<R: Rng>(rng: &mut R, bound: u64) -> i64 {
    if bound == 0 {
        0
    } else {
        rng.gen_range(0..bound) as i64
    }
}

/// Jittered when either bound is configured, fixed otherwise.
pub fn from_config(cfg: &SupervisorConfig) -> Arc<dyn PingInterval> {
    let ping = &cfg.farmer.ping;
    let base = Duration::from_secs(ping.interval_secs);
    if ping.up_secs == 0 && ping.down_secs == 0 {
        Arc::new(FixedPingInterval { base })
    } else {
        Arc::new(JitteredPingInterval {
            base,
            up: Duration::from_secs(ping.up_secs),
            down: Duration::from_secs(ping.down_secs),
        })
    }
}
