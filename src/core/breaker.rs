//! Circuit breakers guarding outbound upstream calls, plus the process-wide
//! registry that owns one breaker per upstream service URL.
//!
//! State machine: closed admits everything and counts consecutive failures;
//! reaching `max_fails` opens the circuit for `timeout`, after which a
//! bounded number of half-open trials decide whether to close again.
//! Admission is decided under the read lock; every transition happens under
//! the write lock with a double-check after re-acquisition, so racing
//! open→half-open transitions resolve to exactly one.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use thiserror::Error;

use crate::metrics::set_circuit_breaker_open;

/// Sentinel error returned while the circuit is open.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("circuit breaker is open")]
pub struct CircuitOpen;

/// The three breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

/// Per-breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub max_fails: u32,
    /// Reserved for future rolling-window failure counting; stored, unused.
    pub interval: Duration,
    /// How long the circuit stays open before a half-open trial.
    pub timeout: Duration,
    /// Trials admitted while half-open.
    pub max_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_fails: 5,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            max_requests: 1,
        }
    }
}

struct BreakerCore {
    state: BreakerState,
    fail_count: u32,
    last_transition: Instant,
    next_attempt: Instant,
    half_open_in_flight: u32,
}

/// One circuit breaker guarding a single upstream.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    core: RwLock<BreakerCore>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, mut config: BreakerConfig) -> Self {
        if config.max_fails == 0 {
            config.max_fails = 5;
        }
        if config.timeout.is_zero() {
            config.timeout = Duration::from_secs(30);
        }
        if config.max_requests == 0 {
            config.max_requests = 1;
        }

        let now = Instant::now();
        Self {
            name: name.into(),
            config,
            core: RwLock::new(BreakerCore {
                state: BreakerState::Closed,
                fail_count: 0,
                last_transition: now,
                next_attempt: now,
                half_open_in_flight: 0,
            }),
        }
    }

    /// Decide whether a request may proceed.
    ///
    /// Closed always admits. Open rejects until `next_attempt`, then a
    /// single racer wins the transition to half-open. Half-open admits at
    /// most `max_requests` in flight.
    pub fn allow_request(&self) -> Result<(), CircuitOpen> {
        let now = Instant::now();

        {
            let core = self.core.read().expect("breaker lock poisoned");
            match core.state {
                BreakerState::Closed => return Ok(()),
                BreakerState::Open if now < core.next_attempt => return Err(CircuitOpen),
                // Open past the deadline or half-open: fall through to the
                // write path below.
                _ => {}
            }
        }

        let mut core = self.core.write().expect("breaker lock poisoned");
        // Re-check under the write lock: another task may have transitioned
        // between the two acquisitions.
        match core.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                if now < core.next_attempt {
                    return Err(CircuitOpen);
                }
                self.to_half_open(&mut core, now);
                core.half_open_in_flight = 1;
                Ok(())
            }
            BreakerState::HalfOpen => {
                if core.half_open_in_flight < self.config.max_requests {
                    core.half_open_in_flight += 1;
                    Ok(())
                } else {
                    Err(CircuitOpen)
                }
            }
        }
    }

    /// Feed a request outcome back into the state machine.
    pub fn record(&self, success: bool) {
        let now = Instant::now();
        let mut core = self.core.write().expect("breaker lock poisoned");

        match core.state {
            BreakerState::Closed => {
                if success {
                    core.fail_count = 0;
                } else {
                    core.fail_count += 1;
                    tracing::debug!(
                        breaker = %self.name,
                        fail_count = core.fail_count,
                        max_fails = self.config.max_fails,
                        "circuit breaker recorded failure"
                    );
                    if core.fail_count >= self.config.max_fails {
                        self.to_open(&mut core, now);
                    }
                }
            }
            BreakerState::HalfOpen => {
                if success {
                    self.to_closed(&mut core, now);
                } else {
                    self.to_open(&mut core, now);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.core.read().expect("breaker lock poisoned").state
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        let mut core = self.core.write().expect("breaker lock poisoned");
        self.to_closed(&mut core, Instant::now());
    }

    fn to_open(&self, core: &mut BreakerCore, now: Instant) {
        core.state = BreakerState::Open;
        core.last_transition = now;
        core.next_attempt = now + self.config.timeout;
        set_circuit_breaker_open(&self.name, true);
        tracing::info!(breaker = %self.name, "circuit breaker opened");
    }

    fn to_half_open(&self, core: &mut BreakerCore, now: Instant) {
        core.state = BreakerState::HalfOpen;
        core.last_transition = now;
        core.half_open_in_flight = 0;
        tracing::info!(breaker = %self.name, "circuit breaker half-open");
    }

    fn to_closed(&self, core: &mut BreakerCore, now: Instant) {
        core.state = BreakerState::Closed;
        core.last_transition = now;
        core.fail_count = 0;
        core.half_open_in_flight = 0;
        set_circuit_breaker_open(&self.name, false);
        tracing::info!(breaker = %self.name, "circuit breaker closed");
    }
}

/// Process-lived registry of breakers, keyed by upstream service URL.
///
/// Breakers are created lazily on first observation of a URL and never
/// destroyed. The registry lock is released before any per-breaker work.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the breaker for a service URL, creating it on first use.
    pub fn get(&self, service_url: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().expect("registry lock poisoned");
            if let Some(breaker) = breakers.get(service_url) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().expect("registry lock poisoned");
        // Double-check: another task may have created it between locks.
        if let Some(breaker) = breakers.get(service_url) {
            return breaker.clone();
        }

        let breaker = Arc::new(CircuitBreaker::new(service_url, self.config.clone()));
        breakers.insert(service_url.to_string(), breaker.clone());
        breaker
    }

    /// Snapshot of every breaker's current state, for diagnostics.
    pub fn snapshot(&self) -> HashMap<String, &'static str> {
        let breakers = self.breakers.read().expect("registry lock poisoned");
        breakers
            .iter()
            .map(|(url, breaker)| (url.clone(), breaker.state().as_str()))
            .collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
