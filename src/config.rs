use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    /// Emit JSON log lines instead of the compact format.
    pub log_json: bool,
    pub event_buffer_size: usize,
    pub fixture_path: Option<String>,
    pub sweeps: SweepSchedule,
    pub policy: Policy,
}

/// How often the in-process runner triggers each sweep.
#[derive(Debug, Clone)]
pub struct SweepSchedule {
    pub enabled: bool,
    pub auto_assign_every: StdDuration,
    pub auto_release_every: StdDuration,
    pub notify_every: StdDuration,
}

/// Thresholds shared by the assignment engine and its sweeps.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Half-width of the window around a departure in which a staff member
    /// cannot hold a second assignment.
    pub conflict_window: Duration,
    pub fair_use_window: FairUseWindow,
    pub auto_assign_min_lead: Duration,
    pub auto_assign_max_lead: Duration,
    pub release_grace: Duration,
    pub release_horizon: Duration,
    pub notify_operator_on_release: bool,
    pub queue_batch_size: usize,
    pub queue_claim_ttl: Duration,
    /// First retry delay for a failed queue item; doubles per failure.
    pub queue_retry_base: Duration,
    pub queue_retry_max: Duration,
    pub mail_timeout: StdDuration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            conflict_window: Duration::hours(6),
            fair_use_window: FairUseWindow::Days(30),
            auto_assign_min_lead: Duration::hours(24),
            auto_assign_max_lead: Duration::hours(72),
            release_grace: Duration::hours(6),
            release_horizon: Duration::hours(72),
            notify_operator_on_release: false,
            queue_batch_size: 25,
            queue_claim_ttl: Duration::minutes(5),
            queue_retry_base: Duration::minutes(1),
            queue_retry_max: Duration::hours(1),
            mail_timeout: StdDuration::from_secs(10),
        }
    }
}

const MAX_FAIR_USE_DAYS: u32 = 3650;
const MAX_FAIR_USE_ENTRIES: u32 = 100_000;
/// Upper bound for every hour-valued threshold: one year.
const MAX_HOURS: u32 = 24 * 366;
const MAX_SECS: u32 = 24 * 60 * 60;

/// Bound applied when counting a staff member's recent confirmed assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairUseWindow {
    /// Entries recorded within the last N days.
    Days(u32),
    /// The staff member's share of the operator's last N confirmed entries.
    LastAssignments(u32),
}

impl fmt::Display for FairUseWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FairUseWindow::Days(days) => write!(f, "days:{days}"),
            FairUseWindow::LastAssignments(n) => write!(f, "last:{n}"),
        }
    }
}

impl FromStr for FairUseWindow {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (kind, value) = raw
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("expected days:N or last:N, got {raw:?}"))?;

        let value: u32 = value
            .trim()
            .parse()
            .map_err(|err| format!("invalid window size {value:?}: {err}"))?;
        if value == 0 {
            return Err("window size must be > 0".to_string());
        }

        let (window, max) = match kind.trim().to_ascii_lowercase().as_str() {
            "days" => (FairUseWindow::Days(value), MAX_FAIR_USE_DAYS),
            "last" => (FairUseWindow::LastAssignments(value), MAX_FAIR_USE_ENTRIES),
            other => return Err(format!("unknown window kind {other:?}, expected days or last")),
        };
        if value > max {
            return Err(format!("window size {value} exceeds {max}"));
        }
        Ok(window)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key source; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = &lookup;
        let policy = Policy {
            conflict_window: hours(lookup, "CONFLICT_WINDOW_HOURS", 6)?,
            fair_use_window: parse_or_default(
                lookup,
                "FAIR_USE_WINDOW",
                FairUseWindow::Days(30),
            )?,
            auto_assign_min_lead: hours(lookup, "AUTO_ASSIGN_MIN_HOURS", 24)?,
            auto_assign_max_lead: hours(lookup, "AUTO_ASSIGN_MAX_HOURS", 72)?,
            release_grace: hours(lookup, "RELEASE_GRACE_HOURS", 6)?,
            release_horizon: hours(lookup, "RELEASE_HORIZON_HOURS", 72)?,
            notify_operator_on_release: parse_or_default(
                lookup,
                "NOTIFY_OPERATOR_ON_RELEASE",
                false,
            )?,
            queue_batch_size: parse_or_default(lookup, "QUEUE_BATCH_SIZE", 25)?,
            queue_claim_ttl: secs(lookup, "QUEUE_CLAIM_TTL_SECS", 300)?,
            queue_retry_base: secs(lookup, "QUEUE_RETRY_BASE_SECS", 60)?,
            queue_retry_max: secs(lookup, "QUEUE_RETRY_MAX_SECS", 3600)?,
            mail_timeout: StdDuration::from_secs(u64::from(bounded(
                lookup,
                "MAIL_TIMEOUT_SECS",
                10,
                MAX_SECS,
            )?)),
        };

        if policy.auto_assign_min_lead >= policy.auto_assign_max_lead {
            return Err(AppError::Internal(
                "AUTO_ASSIGN_MIN_HOURS must be below AUTO_ASSIGN_MAX_HOURS".to_string(),
            ));
        }
        if policy.conflict_window.is_zero() {
            return Err(AppError::Internal("CONFLICT_WINDOW_HOURS must be > 0".to_string()));
        }

        Ok(Self {
            http_port: parse_or_default(lookup, "HTTP_PORT", 3000)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_json: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            event_buffer_size: parse_or_default(lookup, "EVENT_BUFFER_SIZE", 1024)?,
            fixture_path: lookup("FIXTURE_PATH").filter(|p| !p.trim().is_empty()),
            sweeps: SweepSchedule {
                enabled: parse_or_default(lookup, "SWEEPS_ENABLED", true)?,
                auto_assign_every: StdDuration::from_secs(parse_or_default(
                    lookup,
                    "AUTO_ASSIGN_INTERVAL_SECS",
                    300,
                )?),
                auto_release_every: StdDuration::from_secs(parse_or_default(
                    lookup,
                    "AUTO_RELEASE_INTERVAL_SECS",
                    900,
                )?),
                notify_every: StdDuration::from_secs(parse_or_default(
                    lookup,
                    "NOTIFY_INTERVAL_SECS",
                    60,
                )?),
            },
            policy,
        })
    }
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}

fn bounded<F>(lookup: &F, key: &str, default: u32, max: u32) -> Result<u32, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let value: u32 = parse_or_default(lookup, key, default)?;
    if value > max {
        return Err(AppError::Internal(format!("invalid {key}: {value} exceeds {max}")));
    }
    Ok(value)
}

fn hours<F>(lookup: &F, key: &str, default: u32) -> Result<Duration, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(Duration::hours(i64::from(bounded(lookup, key, default, MAX_HOURS)?)))
}

fn secs<F>(lookup: &F, key: &str, default: u32) -> Result<Duration, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(Duration::seconds(i64::from(bounded(lookup, key, default, MAX_SECS)?)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Duration;

    use super::{Config, FairUseWindow};
    use crate::error::AppError;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, AppError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn parses_both_window_kinds() {
        assert_eq!("days:30".parse::<FairUseWindow>(), Ok(FairUseWindow::Days(30)));
        assert_eq!(
            " LAST:20 ".parse::<FairUseWindow>(),
            Ok(FairUseWindow::LastAssignments(20))
        );
    }

    #[test]
    fn rejects_malformed_windows() {
        assert!("30".parse::<FairUseWindow>().is_err());
        assert!("weeks:2".parse::<FairUseWindow>().is_err());
        assert!("days:0".parse::<FairUseWindow>().is_err());
        assert!("days:x".parse::<FairUseWindow>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let window = FairUseWindow::LastAssignments(20);
        assert_eq!(window.to_string().parse::<FairUseWindow>(), Ok(window));
    }

    #[test]
    fn rejects_oversized_windows() {
        assert!("days:4000000000".parse::<FairUseWindow>().is_err());
        assert!("days:3651".parse::<FairUseWindow>().is_err());
        assert!("last:100001".parse::<FairUseWindow>().is_err());
        assert_eq!("days:3650".parse::<FairUseWindow>(), Ok(FairUseWindow::Days(3650)));
    }

    #[test]
    fn defaults_apply_without_any_keys() {
        let config = load(&[]).unwrap();
        assert_eq!(config.http_port, 3000);
        assert_eq!(config.policy.conflict_window, Duration::hours(6));
        assert_eq!(config.policy.release_horizon, Duration::hours(72));
        assert_eq!(config.policy.queue_retry_base, Duration::minutes(1));
        assert!(!config.log_json);
    }

    #[test]
    fn negative_and_oversized_hours_are_rejected() {
        for key in [
            "CONFLICT_WINDOW_HOURS",
            "RELEASE_GRACE_HOURS",
            "RELEASE_HORIZON_HOURS",
            "AUTO_ASSIGN_MAX_HOURS",
        ] {
            assert!(load(&[(key, "-5")]).is_err(), "{key} accepted -5");
            assert!(load(&[(key, "99999999999")]).is_err(), "{key} accepted overflow");
            assert!(load(&[(key, "10000")]).is_err(), "{key} accepted 10000h");
        }
        assert!(load(&[("QUEUE_CLAIM_TTL_SECS", "-1")]).is_err());
        assert!(load(&[("MAIL_TIMEOUT_SECS", "90000")]).is_err());
    }

    #[test]
    fn zero_conflict_window_and_inverted_auto_assign_range_are_rejected() {
        assert!(load(&[("CONFLICT_WINDOW_HOURS", "0")]).is_err());
        assert!(load(&[("AUTO_ASSIGN_MIN_HOURS", "80")]).is_err());
        let config = load(&[("RELEASE_HORIZON_HOURS", "96"), ("LOG_FORMAT", "JSON")]).unwrap();
        assert_eq!(config.policy.release_horizon, Duration::hours(96));
        assert!(config.log_json);
    }
}
