use std::env;
use std::path::PathBuf;

/// Policy for a declined-pool fragment carrying no explicit status key and
/// no contact date. Platforms were inconsistent about what absence means, so
/// the default is a configuration decision, not a hardcoded guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlabeledPolicy {
    /// Treat as a fresh invitation (default).
    Invited,
    /// Leave unknown for an auditor to resolve.
    Unknown,
}

impl UnlabeledPolicy {
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "unknown" => UnlabeledPolicy::Unknown,
            _ => UnlabeledPolicy::Invited,
        }
    }
}

/// Engine configuration loaded from environment variables. Every knob has a
/// default; nothing panics.
#[derive(Debug, Clone)]
pub struct Config {
    pub unlabeled_policy: UnlabeledPolicy,
    /// Minimum score for an email match to be recorded as verified.
    pub match_threshold: f64,
    /// Half-width of the timestamp window around a state date, in days.
    pub match_window_days: i64,
    /// Root directory for persisted run logs.
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            unlabeled_policy: UnlabeledPolicy::from_str_loose(
                &env::var("PEERWATCH_UNLABELED_POLICY").unwrap_or_default(),
            ),
            match_threshold: env::var("PEERWATCH_MATCH_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.6),
            match_window_days: env::var("PEERWATCH_MATCH_WINDOW_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(14),
            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string())),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unlabeled_policy: UnlabeledPolicy::Invited,
            match_threshold: 0.6,
            match_window_days: 14,
            data_dir: PathBuf::from("data"),
        }
    }
}
