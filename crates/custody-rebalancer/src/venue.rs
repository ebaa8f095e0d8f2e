use std::sync::Mutex;

use custody_types::{CustodyError, CustodyResult};

use crate::plan::Adjustment;

/// Where planned adjustments are carried out (a DEX router, an OTC desk).
pub trait RebalanceVenue: Send + Sync {
    fn venue(&self) -> &'static str;

    fn execute(&self, adjustment: &Adjustment) -> CustodyResult<()>;
}

/// Records adjustments without moving funds.
#[derive(Debug, Default)]
pub struct RecordingVenue {
    executed: Mutex<Vec<Adjustment>>,
}

impl RecordingVenue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<Adjustment> {
        self.executed
            .lock()
            .map(|executed| executed.clone())
            .unwrap_or_default()
    }
}

impl RebalanceVenue for RecordingVenue {
    fn venue(&self) -> &'static str {
        "recording"
    }

    fn execute(&self, adjustment: &Adjustment) -> CustodyResult<()> {
        self.executed
            .lock()
            .map_err(|_| CustodyError::Storage("recording venue lock poisoned".into()))?
            .push(adjustment.clone());
        Ok(())
    }
}
