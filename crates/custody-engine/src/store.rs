//! Single-writer transactional boundary around [`TreasuryState`].
//!
//! Every mutation runs inside [`StateStore::transact`]: the state is
//! snapshotted, mutated, checked and then either committed or restored
//! wholesale. Committed state is then written to the file backend. The
//! execution lock remembers which thread holds it, so a call that re-enters
//! the store from inside a running transaction (an asset transfer calling
//! back into the treasury) is refused with `Reentrancy` instead of
//! deadlocking. Callers on other threads simply wait their turn.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use custody_types::{CustodyError, CustodyResult, TreasuryEvent};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::state::TreasuryState;
use crate::upgrade::TreasuryLogic;

/// State plus the logic currently driving it. Swapped together on upgrade.
#[derive(Clone, Debug)]
pub struct TreasuryCore {
    pub state: TreasuryState,
    pub logic: Arc<dyn TreasuryLogic>,
}

/// Result of a committed transaction.
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub events: Vec<TreasuryEvent>,
    /// Set when the commit stands in memory but the state file could not be written.
    pub persist_error: Option<CustodyError>,
}

pub struct StateStore {
    core: Mutex<TreasuryCore>,
    holder: Mutex<Option<ThreadId>>,
    storage: StorageConfig,
}

struct ExecutionGuard<'a> {
    core: MutexGuard<'a, TreasuryCore>,
    holder: &'a Mutex<Option<ThreadId>>,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut holder) = self.holder.lock() {
            *holder = None;
        }
    }
}

impl StateStore {
    /// Open the store. A file backend with an existing file is reloaded and
    /// verified; otherwise `init` builds the genesis state.
    pub fn open(
        storage: StorageConfig,
        logic: Arc<dyn TreasuryLogic>,
        init: impl FnOnce() -> CustodyResult<TreasuryState>,
    ) -> CustodyResult<Self> {
        let expected = logic.descriptor().layout;
        let state = match &storage {
            StorageConfig::File { path } if path.exists() => {
                let state = load_state(path)?;
                if state.layout_version != expected {
                    return Err(CustodyError::LayoutMismatch {
                        stored: state.layout_version,
                        expected,
                    });
                }
                info!(
                    path = %path.display(),
                    records = state.ledger.records().len(),
                    "Treasury state reloaded"
                );
                state
            }
            _ => {
                let state = init()?;
                state.verify()?;
                if let StorageConfig::File { path } = &storage {
                    persist_state(path, &state)?;
                }
                info!(backend = storage.label(), "Treasury state initialized");
                state
            }
        };

        Ok(Self {
            core: Mutex::new(TreasuryCore { state, logic }),
            holder: Mutex::new(None),
            storage,
        })
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    /// Run `f` against the live state; all-or-nothing.
    ///
    /// Returns the closure's value with the events the transaction produced,
    /// for the caller to publish once the lock is released.
    ///
    /// The state file is written only after `f` succeeded and its external
    /// effects already happened, so a write failure cannot undo them. The
    /// commit then stands in memory and is reported through
    /// [`Committed::persist_error`]; the next successful write stores the
    /// full state again.
    pub fn transact<T>(
        &self,
        f: impl FnOnce(&mut TreasuryCore) -> CustodyResult<T>,
    ) -> CustodyResult<Committed<T>> {
        let mut guard = self.enter()?;
        let snapshot = guard.core.clone();

        let outcome = f(&mut guard.core).and_then(|value| {
            guard.core.state.ledger.verify_conservation()?;
            Ok(value)
        });

        match outcome {
            Ok(value) => {
                let persist_error = match &self.storage {
                    StorageConfig::File { path } => persist_state(path, &guard.core.state)
                        .err()
                        .map(|err| {
                            warn!(path = %path.display(), error = %err, "Committed state not persisted");
                            CustodyError::NotPersisted(err.to_string())
                        }),
                    StorageConfig::Memory => None,
                };
                let events = guard.core.state.drain_events();
                debug!(events = events.len(), "Transaction committed");
                Ok(Committed {
                    value,
                    events,
                    persist_error,
                })
            }
            Err(err) => {
                *guard.core = snapshot;
                debug!(error = %err, "Transaction rolled back");
                Err(err)
            }
        }
    }

    /// Read-only access under the same lock.
    pub fn read<T>(&self, f: impl FnOnce(&TreasuryCore) -> T) -> CustodyResult<T> {
        let guard = self.enter()?;
        Ok(f(&guard.core))
    }

    fn enter(&self) -> CustodyResult<ExecutionGuard<'_>> {
        let current = thread::current().id();
        {
            let holder = self.holder.lock().map_err(|_| poisoned("execution lock"))?;
            if *holder == Some(current) {
                warn!("Re-entrant call rejected");
                return Err(CustodyError::Reentrancy);
            }
        }
        let core = self.core.lock().map_err(|_| poisoned("treasury state"))?;
        *self.holder.lock().map_err(|_| poisoned("execution lock"))? = Some(current);
        Ok(ExecutionGuard {
            core,
            holder: &self.holder,
        })
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

fn poisoned(what: &str) -> CustodyError {
    CustodyError::Storage(format!("{what} lock poisoned"))
}

/// Read and verify a persisted state file.
pub fn load_state(path: &Path) -> CustodyResult<TreasuryState> {
    let bytes = fs::read(path)?;
    let state: TreasuryState = serde_json::from_slice(&bytes)?;
    state.verify()?;
    Ok(state)
}

fn persist_state(path: &Path, state: &TreasuryState) -> CustodyResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let bytes = serde_json::to_vec_pretty(state)?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes)?;
    fs::rename(tmp_path, path)?;
    Ok(())
}
