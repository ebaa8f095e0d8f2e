//! Global halt switch.

use chrono::{DateTime, Utc};
use custody_types::{AccountId, CustodyError, CustodyResult, TreasuryEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EmergencyState {
    #[default]
    Active,
    Paused {
        since: DateTime<Utc>,
        by: AccountId,
        reason: String,
    },
}

/// While paused, normal operations are refused and only the emergency
/// withdrawal path moves funds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyControl {
    state: EmergencyState,
    #[serde(skip)]
    events: Vec<TreasuryEvent>,
}

impl EmergencyControl {
    pub fn state(&self) -> &EmergencyState {
        &self.state
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, EmergencyState::Paused { .. })
    }

    /// Fails with `SystemPaused` while paused.
    pub fn ensure_active(&self) -> CustodyResult<()> {
        if self.is_paused() {
            debug!("Operation refused: system paused");
            return Err(CustodyError::SystemPaused);
        }
        Ok(())
    }

    /// Fails with `NotPaused` while active.
    pub fn ensure_paused(&self) -> CustodyResult<()> {
        if !self.is_paused() {
            return Err(CustodyError::NotPaused);
        }
        Ok(())
    }

    pub fn pause(&mut self, by: &AccountId, reason: &str, now: DateTime<Utc>) -> CustodyResult<()> {
        if self.is_paused() {
            return Err(CustodyError::AlreadyPaused);
        }
        self.state = EmergencyState::Paused {
            since: now,
            by: by.clone(),
            reason: reason.to_string(),
        };
        warn!(by = %by, reason, "Treasury paused");
        self.events.push(TreasuryEvent::Paused {
            by: by.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    pub fn unpause(&mut self, by: &AccountId) -> CustodyResult<()> {
        self.ensure_paused()?;
        self.state = EmergencyState::Active;
        warn!(by = %by, "Treasury unpaused");
        self.events.push(TreasuryEvent::Unpaused { by: by.clone() });
        Ok(())
    }

    pub fn drain_events(&mut self) -> Vec<TreasuryEvent> {
        std::mem::take(&mut self.events)
    }
}
