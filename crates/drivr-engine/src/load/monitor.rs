//! Admission control.
//!
//! Every request is counted in a trailing window. Per-client abuse limits
//! apply at all times; concurrency caps only while throttled.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use drivr_core::{SharedClock, to_time_duration};
use serde::Serialize;
use time::OffsetDateTime;

use super::throttle::{LoadSample, ThrottleController, ThrottleMode};
use crate::config::ThrottleConfig;
use crate::error::{EngineError, EngineResult};

/// Who is asking for admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    /// Rate-limit key for the caller, e.g. a connection or token hash.
    pub client: String,
    /// Authenticated identity, when known.
    pub identity: Option<String>,
}

impl AdmissionRequest {
    pub fn new(client: impl Into<String>, identity: Option<String>) -> Self {
        Self {
            client: client.into(),
            identity,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadSnapshot {
    pub mode: ThrottleMode,
    pub requests_in_window: usize,
    pub in_flight: usize,
    pub rejected: u64,
}

struct WindowState {
    controller: ThrottleController,
    requests: VecDeque<OffsetDateTime>,
    clients: HashMap<String, VecDeque<OffsetDateTime>>,
}

fn expire(window: &mut VecDeque<OffsetDateTime>, cutoff: OffsetDateTime) {
    while let Some(&oldest) = window.front() {
        if oldest <= cutoff {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// Tracks load and hands out [`AdmissionPermit`]s.
pub struct LoadMonitor {
    config: ThrottleConfig,
    window: time::Duration,
    clock: SharedClock,
    state: Mutex<WindowState>,
    throttled: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    per_identity: Arc<DashMap<String, usize>>,
    rejected: AtomicU64,
}

impl LoadMonitor {
    pub fn new(config: ThrottleConfig, clock: SharedClock) -> Self {
        Self {
            window: to_time_duration(config.window),
            state: Mutex::new(WindowState {
                controller: ThrottleController::new(&config),
                requests: VecDeque::new(),
                clients: HashMap::new(),
            }),
            config,
            clock,
            throttled: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
            per_identity: Arc::new(DashMap::new()),
            rejected: AtomicU64::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether `request` may proceed.
    ///
    /// # Errors
    ///
    /// Returns `Throttled` with the configured backoff when a limit is hit.
    pub fn admit(
        &self,
        request: &AdmissionRequest,
        active_sessions: usize,
    ) -> EngineResult<AdmissionPermit> {
        let mode = self.record(request, active_sessions)?;

        if mode.is_throttled() {
            let global = self.config.global_concurrency;
            if self
                .in_flight
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < global).then_some(n + 1)
                })
                .is_err()
            {
                return Err(self.reject(request, "global concurrency cap"));
            }

            if let Some(identity) = &request.identity {
                let mut count = self.per_identity.entry(identity.clone()).or_insert(0);
                if *count >= self.config.per_identity_concurrency {
                    drop(count);
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    return Err(self.reject(request, "per-identity concurrency cap"));
                }
                *count += 1;
            }
        } else {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            if let Some(identity) = &request.identity {
                *self.per_identity.entry(identity.clone()).or_insert(0) += 1;
            }
        }

        Ok(AdmissionPermit {
            in_flight: self.in_flight.clone(),
            per_identity: self.per_identity.clone(),
            identity: request.identity.clone(),
        })
    }

    /// Count the request and update the mode. Rejects clients over their
    /// window limit without counting them.
    fn record(
        &self,
        request: &AdmissionRequest,
        active_sessions: usize,
    ) -> EngineResult<ThrottleMode> {
        let now = self.clock.now();
        let cutoff = now.saturating_sub(self.window);
        let mut state = self.lock_state();
        expire(&mut state.requests, cutoff);

        let client = state.clients.entry(request.client.clone()).or_default();
        expire(client, cutoff);
        if client.len() >= self.config.per_client_limit {
            drop(state);
            return Err(self.reject(request, "per-client rate limit"));
        }
        client.push_back(now);
        state.requests.push_back(now);

        let sample = LoadSample {
            active_sessions,
            requests_in_window: state.requests.len(),
        };
        let before = state.controller.mode();
        let mode = state.controller.observe(sample, now);
        drop(state);

        if mode != before {
            self.throttled.store(mode.is_throttled(), Ordering::SeqCst);
            match mode {
                ThrottleMode::Throttled => tracing::warn!(
                    active_sessions = sample.active_sessions,
                    requests_in_window = sample.requests_in_window,
                    "Throttle mode enabled"
                ),
                ThrottleMode::Normal => tracing::info!(
                    active_sessions = sample.active_sessions,
                    requests_in_window = sample.requests_in_window,
                    "Throttle mode disabled"
                ),
            }
        }
        Ok(mode)
    }

    fn reject(&self, request: &AdmissionRequest, reason: &'static str) -> EngineError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(client = %request.client, reason, "Request throttled");
        EngineError::throttled(self.config.retry_after)
    }

    pub fn mode(&self) -> ThrottleMode {
        if self.throttled.load(Ordering::SeqCst) {
            ThrottleMode::Throttled
        } else {
            ThrottleMode::Normal
        }
    }

    /// Drop window state for clients with no recent requests.
    pub fn prune_idle_clients(&self) -> usize {
        let cutoff = self.clock.now().saturating_sub(self.window);
        let mut state = self.lock_state();
        let before = state.clients.len();
        state.clients.retain(|_, window| {
            expire(window, cutoff);
            !window.is_empty()
        });
        before - state.clients.len()
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        let cutoff = self.clock.now().saturating_sub(self.window);
        let requests_in_window = {
            let mut state = self.lock_state();
            expire(&mut state.requests, cutoff);
            state.requests.len()
        };
        LoadSnapshot {
            mode: self.mode(),
            requests_in_window,
            in_flight: self.in_flight.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Held for the duration of an admitted request. Releases its concurrency
/// slots on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    in_flight: Arc<AtomicUsize>,
    per_identity: Arc<DashMap<String, usize>>,
    identity: Option<String>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(identity) = &self.identity {
            if let Some(mut count) = self.per_identity.get_mut(identity) {
                *count = count.saturating_sub(1);
            }
            self.per_identity.remove_if(identity, |_, count| *count == 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivr_core::ManualClock;
    use std::time::Duration;
    use time::macros::datetime;

    fn monitor(config: ThrottleConfig) -> (LoadMonitor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(datetime!(2025-06-01 09:00 UTC)));
        (LoadMonitor::new(config, clock.clone()), clock)
    }

    fn request(client: &str, identity: &str) -> AdmissionRequest {
        AdmissionRequest::new(client, Some(identity.to_string()))
    }

    #[test]
    fn test_per_client_limit_applies_in_normal_mode() {
        let (monitor, clock) = monitor(ThrottleConfig {
            per_client_limit: 3,
            ..ThrottleConfig::default()
        });

        for _ in 0..3 {
            drop(monitor.admit(&request("c1", "driver7"), 1).unwrap());
        }
        let err = monitor.admit(&request("c1", "driver7"), 1).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(monitor.mode(), ThrottleMode::Normal);

        // Other clients are unaffected.
        assert!(monitor.admit(&request("c2", "driver7"), 1).is_ok());

        // The window slides.
        clock.advance(time::Duration::seconds(61));
        assert!(monitor.admit(&request("c1", "driver7"), 1).is_ok());
        assert_eq!(monitor.snapshot().rejected, 1);
    }

    #[test]
    fn test_concurrency_caps_only_when_throttled() {
        let (monitor, _) = monitor(ThrottleConfig {
            high_sessions: 10,
            low_sessions: 5,
            per_identity_concurrency: 2,
            global_concurrency: 3,
            ..ThrottleConfig::default()
        });

        // Normal mode: no caps.
        let held: Vec<_> = (0..5)
            .map(|_| monitor.admit(&request("c1", "driver7"), 1).unwrap())
            .collect();
        drop(held);

        // Crossing the session mark switches to throttled on that sample.
        let first = monitor.admit(&request("c1", "driver7"), 10).unwrap();
        assert_eq!(monitor.mode(), ThrottleMode::Throttled);
        let second = monitor.admit(&request("c2", "driver7"), 10).unwrap();
        assert!(monitor.admit(&request("c3", "driver7"), 10).is_err());

        let third = monitor.admit(&request("c4", "driver8"), 10).unwrap();
        assert!(monitor.admit(&request("c5", "driver9"), 10).is_err());
        assert_eq!(monitor.snapshot().in_flight, 3);

        drop(first);
        assert!(monitor.admit(&request("c6", "driver9"), 10).is_ok());
        drop(second);
        drop(third);
        assert_eq!(monitor.snapshot().in_flight, 0);
    }

    #[test]
    fn test_huge_window_saturates() {
        let (monitor, _) = monitor(ThrottleConfig {
            window: Duration::from_secs(u64::MAX),
            per_client_limit: 2,
            ..ThrottleConfig::default()
        });
        drop(monitor.admit(&request("c1", "driver7"), 1).unwrap());
        drop(monitor.admit(&request("c1", "driver7"), 1).unwrap());
        assert!(monitor.admit(&request("c1", "driver7"), 1).is_err());
        assert_eq!(monitor.prune_idle_clients(), 0);
    }

    #[test]
    fn test_prune_idle_clients() {
        let (monitor, clock) = monitor(ThrottleConfig::default());
        drop(monitor.admit(&AdmissionRequest::new("c1", None), 0).unwrap());
        drop(monitor.admit(&AdmissionRequest::new("c2", None), 0).unwrap());
        assert_eq!(monitor.prune_idle_clients(), 0);

        clock.advance(time::Duration::minutes(2));
        assert_eq!(monitor.prune_idle_clients(), 2);
        assert_eq!(monitor.snapshot().requests_in_window, 0);
    }
}
