use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::analytics::HazardLabel;
use crate::config::AlertsConfig;

use super::window::LabelWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl Default for UserId {
    fn default() -> Self {
        UserId(1)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clients send the id either as a number or as a numeric string.
impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(UserId(n)),
            Raw::Text(s) => s
                .trim()
                .parse()
                .map(UserId)
                .map_err(|_| de::Error::custom(format!("invalid user id {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AlertPolicy {
    pub window: usize,
    pub required_match: usize,
    pub cooldown: Duration,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            window: 6,
            required_match: 4,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl From<&AlertsConfig> for AlertPolicy {
    fn from(config: &AlertsConfig) -> Self {
        Self {
            window: config.window,
            required_match: config.required_match,
            cooldown: Duration::from_millis(config.cooldown_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// Window not yet full; nothing evaluated.
    Filling,
    /// Window full but no label reached the required count.
    Quiet,
    Triggered(HazardLabel),
    /// A majority exists but the user is still cooling down.
    Suppressed {
        label: HazardLabel,
        retry_in: Duration,
    },
}

impl AlertOutcome {
    pub fn alert(&self) -> Option<HazardLabel> {
        match self {
            AlertOutcome::Triggered(label) => Some(*label),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserAlertState {
    window: LabelWindow,
    last_trigger_at: Option<Instant>,
}

impl UserAlertState {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: LabelWindow::new(capacity),
            last_trigger_at: None,
        }
    }

    pub fn observe(&mut self, label: HazardLabel, now: Instant, policy: &AlertPolicy) -> AlertOutcome {
        self.window.push(label);

        if !self.window.is_full() {
            return AlertOutcome::Filling;
        }

        let candidate = [HazardLabel::Fire, HazardLabel::Fall]
            .into_iter()
            .find(|&l| self.window.count(l) >= policy.required_match);

        let Some(candidate) = candidate else {
            return AlertOutcome::Quiet;
        };

        if let Some(last) = self.last_trigger_at {
            let elapsed = now.saturating_duration_since(last);
            if elapsed <= policy.cooldown {
                return AlertOutcome::Suppressed {
                    label: candidate,
                    retry_in: policy.cooldown - elapsed,
                };
            }
        }

        self.last_trigger_at = Some(now);
        self.window.clear();
        AlertOutcome::Triggered(candidate)
    }

    pub fn window(&self) -> &LabelWindow {
        &self.window
    }

    pub fn last_trigger_at(&self) -> Option<Instant> {
        self.last_trigger_at
    }
}

#[derive(Debug, Clone)]
pub struct AlertSnapshot {
    pub user_id: UserId,
    pub window: Vec<HazardLabel>,
    pub last_trigger_at: Option<Instant>,
}

/// Per-user alert state behind a single lock. The worker is the only writer;
/// request handlers take read-only snapshots.
pub struct AlertTable {
    users: Arc<RwLock<HashMap<UserId, UserAlertState>>>,
    policy: AlertPolicy,
}

impl AlertTable {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }

    pub fn observe(&self, user_id: UserId, label: HazardLabel, now: Instant) -> AlertOutcome {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let state = users
            .entry(user_id)
            .or_insert_with(|| UserAlertState::new(self.policy.window));

        let outcome = state.observe(label, now, &self.policy);

        tracing::debug!(
            user = %user_id,
            label = %label,
            window = %state.window().codes(),
            "alert window"
        );

        outcome
    }

    pub fn snapshot(&self, user_id: UserId) -> Option<AlertSnapshot> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        users.get(&user_id).map(|state| AlertSnapshot {
            user_id,
            window: state.window().labels(),
            last_trigger_at: state.last_trigger_at(),
        })
    }

    pub fn user_count(&self) -> usize {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Clone for AlertTable {
    fn clone(&self) -> Self {
        Self {
            users: Arc::clone(&self.users),
            policy: self.policy,
        }
    }
}
