//! Rolling-window currency evaluation.
//!
//! A driver stays *current* on a vehicle platform while the distance logged
//! inside the trailing window meets the requirement. Everything here is pure:
//! the same `(events, now, policy)` always produces the same assessment, no
//! matter the order the events arrive in, so results are safe to cache and
//! trivial to test.
//!
//! # Window semantics
//!
//! The window is the closed interval `[now - window, now]`. An event logged
//! exactly on the lower boundary still counts. Events stamped after `now`
//! are ignored.
//!
//! # Lapse instant
//!
//! Qualifying events are walked newest first, accumulating distance until the
//! requirement is reached. Currency lapses one window after the event at which
//! the requirement was reached, because from that instant on the remaining
//! newer events no longer add up.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// A single logged drive, as appended to the external event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    /// Identity of the driver.
    pub identity: String,

    /// Qualification the drive counts towards (the vehicle platform).
    pub qualification: String,

    /// When the drive happened.
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,

    /// Distance driven in kilometres.
    pub distance_km: f64,

    /// Vehicle identifier, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,

    /// Odometer reading before the drive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_km: Option<f64>,

    /// Odometer reading after the drive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_km: Option<f64>,
}

impl LoggedEvent {
    /// Create an event with only the fields the evaluator needs.
    pub fn new(
        identity: impl Into<String>,
        qualification: impl Into<String>,
        occurred_at: OffsetDateTime,
        distance_km: f64,
    ) -> Self {
        Self {
            identity: identity.into(),
            qualification: qualification.into(),
            occurred_at,
            distance_km,
            vehicle_id: None,
            initial_km: None,
            final_km: None,
        }
    }

    /// Distance this event contributes. Non-finite or negative readings count as zero.
    fn measure(&self) -> f64 {
        if self.distance_km.is_finite() && self.distance_km > 0.0 {
            self.distance_km
        } else {
            0.0
        }
    }
}

/// Parameters of a currency rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrencyPolicy {
    /// Length of the rolling window.
    pub window: Duration,
    /// Distance required inside the window.
    pub requirement_km: f64,
    /// How far ahead of the lapse instant to start warning.
    pub warning_horizon: Duration,
}

impl Default for CurrencyPolicy {
    fn default() -> Self {
        Self {
            window: Duration::days(90),
            requirement_km: 2.0,
            warning_horizon: Duration::days(7),
        }
    }
}

/// Currency status of a driver on one qualification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyStatus {
    /// Requirement met and not about to lapse.
    Current,
    /// Requirement met, but lapses within the warning horizon.
    ExpiringSoon,
    /// Requirement not met inside the window.
    Expired,
}

impl CurrencyStatus {
    /// Returns `true` while the requirement is still met.
    pub fn is_current(&self) -> bool {
        matches!(self, Self::Current | Self::ExpiringSoon)
    }
}

/// Outcome of evaluating one set of events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyAssessment {
    /// Derived status.
    pub status: CurrencyStatus,
    /// Distance accumulated inside the window.
    pub accumulated_km: f64,
    /// Most recent qualifying event inside the window.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_qualifying_at: Option<OffsetDateTime>,
    /// Instant at which currency lapses if nothing new is logged.
    #[serde(with = "time::serde::rfc3339::option")]
    pub lapses_at: Option<OffsetDateTime>,
}

/// Derived per-qualification currency of one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRecord {
    /// Identity the record describes.
    pub identity: String,
    /// Qualification the record describes.
    pub qualification: String,
    /// Evaluation result.
    #[serde(flatten)]
    pub assessment: CurrencyAssessment,
}

/// Evaluate currency for a set of events at `now`.
///
/// Events outside `[now - policy.window, now]` are ignored. The result does
/// not depend on the iteration order of `events`.
pub fn evaluate<'a, I>(events: I, now: OffsetDateTime, policy: &CurrencyPolicy) -> CurrencyAssessment
where
    I: IntoIterator<Item = &'a LoggedEvent>,
{
    let window_start = now.saturating_sub(policy.window);

    let mut qualifying: Vec<&LoggedEvent> = events
        .into_iter()
        .filter(|e| e.occurred_at >= window_start && e.occurred_at <= now)
        .collect();

    // Newest first; ties broken by distance so float summation order is fixed.
    qualifying.sort_by(|a, b| {
        b.occurred_at
            .cmp(&a.occurred_at)
            .then_with(|| b.measure().partial_cmp(&a.measure()).unwrap_or(Ordering::Equal))
    });

    let mut accumulated_km = 0.0;
    let mut lapses_at = None;
    for event in &qualifying {
        accumulated_km += event.measure();
        if lapses_at.is_none() && accumulated_km >= policy.requirement_km {
            lapses_at = Some(event.occurred_at.saturating_add(policy.window));
        }
    }

    let last_qualifying_at = qualifying.first().map(|e| e.occurred_at);

    let status = if accumulated_km >= policy.requirement_km {
        match lapses_at {
            Some(lapse) if lapse - now <= policy.warning_horizon => CurrencyStatus::ExpiringSoon,
            _ => CurrencyStatus::Current,
        }
    } else {
        CurrencyStatus::Expired
    };

    CurrencyAssessment {
        status,
        accumulated_km,
        last_qualifying_at,
        lapses_at,
    }
}

/// Evaluate every qualification `identity` has logged events for.
///
/// Events belonging to other identities are skipped. Records are ordered by
/// qualification name.
pub fn summarize(
    identity: &str,
    events: &[LoggedEvent],
    now: OffsetDateTime,
    policy: &CurrencyPolicy,
) -> Vec<CurrencyRecord> {
    let mut by_qualification: BTreeMap<&str, Vec<&LoggedEvent>> = BTreeMap::new();
    for event in events.iter().filter(|e| e.identity == identity) {
        by_qualification
            .entry(event.qualification.as_str())
            .or_default()
            .push(event);
    }

    by_qualification
        .into_iter()
        .map(|(qualification, events)| CurrencyRecord {
            identity: identity.to_string(),
            qualification: qualification.to_string(),
            assessment: evaluate(events, now, policy),
        })
        .collect()
}
