//! Note Ledger
//!
//! Single source of truth for note existence and lifecycle state.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Note Lifecycle                           │
//! │                                                                 │
//! │  register_pending ──▶ Pending ──confirm──▶ Confirmed ──spend──▶ Spent
//! │                          │                                      │
//! │                          └──discard_pending (reverted)──▶ gone  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every note lives behind its own mutex. Batch operations lock the slots they
//! touch in ascending `NoteId` order, so operations on the same note are
//! totally ordered while chains working on disjoint notes never contend.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use cloak_note::{Note, NoteId, NoteState, OutputSpec, TransactionId};

use super::error::{LedgerError, ValidationError};

type NoteSlot = Arc<Mutex<Note>>;

fn lock(slot: &NoteSlot) -> MutexGuard<'_, Note> {
    // A panic mid-update cannot leave a note half-written: each update is a
    // single field assignment.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Authoritative record of every note the engine knows about
pub struct NoteLedger {
    notes: DashMap<NoteId, NoteSlot>,
    /// Output identities per producing transaction
    produced: DashMap<TransactionId, Vec<NoteId>>,
    /// Bumped on every promotion to `Confirmed`; wakes dependency waiters
    confirmations: watch::Sender<u64>,
}

/// Counts by state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub pending: usize,
    pub confirmed: usize,
    pub spent: usize,
}

/// Serializable copy of the whole ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub notes: Vec<Note>,
}

impl NoteLedger {
    pub fn new() -> Self {
        let (confirmations, _) = watch::channel(0);
        Self {
            notes: DashMap::new(),
            produced: DashMap::new(),
            confirmations,
        }
    }

    fn slot(&self, id: &NoteId) -> Result<NoteSlot, LedgerError> {
        self.notes
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::UnknownNote(*id))
    }

    /// Allocate `Pending` notes for a transaction's outputs.
    ///
    /// All-or-nothing: if any identity is already present, nothing is inserted.
    pub fn register_pending(
        &self,
        transaction: TransactionId,
        outputs: &[(NoteId, OutputSpec)],
    ) -> Result<Vec<Note>, LedgerError> {
        if self.produced.contains_key(&transaction) {
            return Err(LedgerError::TransactionAlreadyRegistered(transaction));
        }

        let mut seen = HashSet::with_capacity(outputs.len());
        for (id, _) in outputs {
            if !seen.insert(*id) {
                return Err(LedgerError::DuplicateIdentity(*id));
            }
        }

        let mut inserted: Vec<NoteId> = Vec::with_capacity(outputs.len());
        let mut notes = Vec::with_capacity(outputs.len());
        for (id, output) in outputs {
            match self.notes.entry(*id) {
                Entry::Occupied(_) => {
                    self.rollback(&inserted);
                    return Err(LedgerError::DuplicateIdentity(*id));
                }
                Entry::Vacant(vacant) => {
                    let note = Note::pending(*id, *output, transaction);
                    notes.push(note.clone());
                    vacant.insert(Arc::new(Mutex::new(note)));
                    inserted.push(*id);
                }
            }
        }

        match self.produced.entry(transaction) {
            Entry::Occupied(_) => {
                self.rollback(&inserted);
                Err(LedgerError::TransactionAlreadyRegistered(transaction))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(inserted);
                debug!(
                    tx = %transaction.short(),
                    outputs = notes.len(),
                    "Registered pending notes"
                );
                Ok(notes)
            }
        }
    }

    fn rollback(&self, inserted: &[NoteId]) {
        for id in inserted {
            self.notes.remove(id);
        }
    }

    /// Promote every `Pending` output of `transaction` to `Confirmed`.
    ///
    /// Idempotent: confirming twice leaves the ledger unchanged.
    pub fn confirm(&self, transaction: TransactionId) -> Result<(), LedgerError> {
        let ids = self
            .produced
            .get(&transaction)
            .map(|entry| entry.value().clone())
            .ok_or(LedgerError::UnknownTransaction(transaction))?;

        let mut promoted = 0usize;
        for id in sorted(&ids) {
            let slot = self.slot(&id)?;
            let mut note = lock(&slot);
            if note.state == NoteState::Pending {
                note.state = NoteState::Confirmed;
                promoted += 1;
            }
        }

        if promoted > 0 {
            self.confirmations.send_modify(|version| *version += 1);
            debug!(tx = %transaction.short(), promoted, "Confirmed outputs");
        }
        Ok(())
    }

    /// Mark `ids` as spent by `spender`, atomically across the whole batch.
    ///
    /// Either every note transitions `Confirmed -> Spent` or none does.
    pub fn spend(&self, ids: &[NoteId], spender: TransactionId) -> Result<(), LedgerError> {
        let ordered = sorted(ids);
        if let Some(pair) = ordered.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(LedgerError::DuplicateInput(pair[0]));
        }

        let slots = ordered
            .iter()
            .map(|id| self.slot(id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut guards: Vec<MutexGuard<'_, Note>> = slots.iter().map(lock).collect();

        for note in &guards {
            match note.state {
                NoteState::Confirmed => {}
                NoteState::Pending => return Err(LedgerError::NoteNotConfirmed(note.id)),
                NoteState::Spent => return Err(LedgerError::NoteAlreadySpent(note.id)),
            }
        }

        for note in guards.iter_mut() {
            note.state = NoteState::Spent;
            note.spent_by = Some(spender);
        }
        debug!(tx = %spender.short(), inputs = ids.len(), "Spent notes");
        Ok(())
    }

    /// Remove the still-pending outputs of a transaction that will never finalize.
    ///
    /// Returns the identities that were removed.
    pub fn discard_pending(&self, transaction: TransactionId) -> Result<Vec<NoteId>, LedgerError> {
        let (_, ids) = self
            .produced
            .remove(&transaction)
            .ok_or(LedgerError::UnknownTransaction(transaction))?;

        let mut removed = Vec::new();
        let mut kept = Vec::new();
        for id in ids {
            let gone = self
                .notes
                .remove_if(&id, |_, slot| lock(slot).state == NoteState::Pending)
                .is_some();
            if gone {
                removed.push(id);
            } else if self.notes.contains_key(&id) {
                kept.push(id);
            }
        }

        if !kept.is_empty() {
            warn!(
                tx = %transaction.short(),
                kept = kept.len(),
                "Discard left non-pending outputs in place"
            );
            self.produced.insert(transaction, kept);
        }
        Ok(removed)
    }

    /// Read-only lookup of several notes
    pub fn resolve(&self, ids: &[NoteId]) -> Result<Vec<Note>, LedgerError> {
        ids.iter()
            .map(|id| self.slot(id).map(|slot| lock(&slot).clone()))
            .collect()
    }

    pub fn get(&self, id: &NoteId) -> Option<Note> {
        self.slot(id).ok().map(|slot| lock(&slot).clone())
    }

    pub fn contains(&self, id: &NoteId) -> bool {
        self.notes.contains_key(id)
    }

    /// Wait until every note in `ids` is `Confirmed`, or `timeout` elapses.
    ///
    /// This is the dependency barrier between steps: it wakes on every
    /// `confirm` and re-checks.
    pub async fn wait_confirmed(
        &self,
        ids: &[NoteId],
        timeout: Duration,
    ) -> Result<Vec<Note>, ValidationError> {
        let mut changes = self.confirmations.subscribe();
        let deadline = Instant::now() + timeout;

        loop {
            changes.borrow_and_update();

            let notes = ids
                .iter()
                .map(|id| self.get(id).ok_or(ValidationError::UnknownNote(*id)))
                .collect::<Result<Vec<_>, _>>()?;
            let blocking = notes.iter().find(|note| note.state != NoteState::Confirmed);
            let Some(blocking) = blocking else {
                return Ok(notes);
            };
            if blocking.state == NoteState::Spent {
                return Err(ValidationError::InputSpent(blocking.id));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ValidationError::InputNotReady(blocking.id));
            }
            debug!(note = %blocking.id.short(), ?remaining, "Waiting for input confirmation");
            match tokio::time::timeout(remaining, changes.changed()).await {
                Ok(Ok(())) => continue,
                _ => return Err(ValidationError::InputNotReady(blocking.id)),
            }
        }
    }

    pub fn stats(&self) -> LedgerStats {
        let mut stats = LedgerStats::default();
        for entry in self.notes.iter() {
            match lock(entry.value()).state {
                NoteState::Pending => stats.pending += 1,
                NoteState::Confirmed => stats.confirmed += 1,
                NoteState::Spent => stats.spent += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut notes: Vec<Note> = self
            .notes
            .iter()
            .map(|entry| lock(entry.value()).clone())
            .collect();
        notes.sort_by_key(|note| note.id);
        LedgerSnapshot { notes }
    }

    /// Rebuild a ledger, restoring the producing-transaction index from the notes
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let ledger = Self::new();
        for note in snapshot.notes {
            let id = note.id;
            let producer = note.produced_by;
            match ledger.notes.entry(id) {
                Entry::Occupied(_) => return Err(LedgerError::DuplicateIdentity(id)),
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::new(Mutex::new(note)));
                }
            }
            ledger.produced.entry(producer).or_default().push(id);
        }
        Ok(ledger)
    }

    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        let data = serde_json::to_vec_pretty(&self.snapshot())
            .map_err(|e| LedgerError::Snapshot(e.to_string()))?;
        fs::write(path, data).map_err(|e| LedgerError::Snapshot(e.to_string()))?;
        info!(path = %path.display(), notes = self.len(), "Saved ledger snapshot");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let data = fs::read(path).map_err(|e| LedgerError::Snapshot(e.to_string()))?;
        let snapshot: LedgerSnapshot =
            serde_json::from_slice(&data).map_err(|e| LedgerError::Snapshot(e.to_string()))?;
        let ledger = Self::from_snapshot(snapshot)?;
        info!(path = %path.display(), notes = ledger.len(), "Loaded ledger snapshot");
        Ok(ledger)
    }
}

impl Default for NoteLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(ids: &[NoteId]) -> Vec<NoteId> {
    let mut ordered = ids.to_vec();
    ordered.sort_unstable();
    ordered
}
