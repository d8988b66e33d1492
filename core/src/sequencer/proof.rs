//! Proof Constructor Adapter
//!
//! The join-split proof system is external. This module fixes the contract
//! the sequencer relies on and checks every bundle against it before anything
//! reaches the bridge.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Proof Bundle                             │
//! │                                                                 │
//! │  Opaque (passed through to the bridge untouched):               │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │ proof_data, split_index, challenge, input_signatures,     │  │
//! │  │ metadata                                                  │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                                                                 │
//! │  Structural (checked by the sequencer):                         │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │ note_ids      one fresh identity per requested output     │  │
//! │  │ output_owners same owners, same order as requested        │  │
//! │  │ public_value  equal to the requested value                │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use cloak_note::{AccountId, Note, NoteId, OutputSpec, TransactionId};

use super::error::ConstructionError;
use super::ledger::NoteLedger;

// ============================================================================
// Request / Bundle
// ============================================================================

/// Everything the proof constructor needs for one transfer
#[derive(Debug, Clone)]
pub struct ProofRequest {
    /// Resolved, confirmed input notes
    pub inputs: Vec<Note>,
    pub outputs: Vec<OutputSpec>,
    pub public_value: i64,
    pub sender: AccountId,
    /// Bridge contract the proof is bound to
    pub bridge: AccountId,
}

/// Raw constructor output, before it is sealed into a [`ProofBundle`]
#[derive(Debug, Clone, Default)]
pub struct ProofBundleParts {
    pub proof_data: Vec<u8>,
    pub split_index: u32,
    pub challenge: Vec<u8>,
    pub input_signatures: Vec<Vec<u8>>,
    pub output_owners: Vec<AccountId>,
    pub metadata: Vec<u8>,
    pub public_value: i64,
    pub note_ids: Vec<NoteId>,
}

/// Immutable join-split proof artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBundle {
    #[serde(with = "hex::serde")]
    proof_data: Vec<u8>,
    split_index: u32,
    #[serde(with = "hex::serde")]
    challenge: Vec<u8>,
    input_signatures: Vec<String>,
    output_owners: Vec<AccountId>,
    #[serde(with = "hex::serde")]
    metadata: Vec<u8>,
    public_value: i64,
    note_ids: Vec<NoteId>,
}

impl ProofBundle {
    pub fn new(parts: ProofBundleParts) -> Self {
        Self {
            proof_data: parts.proof_data,
            split_index: parts.split_index,
            challenge: parts.challenge,
            input_signatures: parts.input_signatures.iter().map(hex::encode).collect(),
            output_owners: parts.output_owners,
            metadata: parts.metadata,
            public_value: parts.public_value,
            note_ids: parts.note_ids,
        }
    }

    pub fn proof_data(&self) -> &[u8] {
        &self.proof_data
    }

    /// Number of inputs in the join-split (the proof's `m`)
    pub fn split_index(&self) -> u32 {
        self.split_index
    }

    pub fn challenge(&self) -> &[u8] {
        &self.challenge
    }

    /// Hex-encoded signatures, one per input note
    pub fn input_signatures(&self) -> &[String] {
        &self.input_signatures
    }

    pub fn output_owners(&self) -> &[AccountId] {
        &self.output_owners
    }

    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    pub fn public_value(&self) -> i64 {
        self.public_value
    }

    /// Output note identities, in output order
    pub fn note_ids(&self) -> &[NoteId] {
        &self.note_ids
    }

    /// Content digest; stable for identical bundles
    pub fn transaction_id(&self) -> TransactionId {
        let split = self.split_index.to_le_bytes();
        let public_value = self.public_value.to_le_bytes();
        let mut parts: Vec<&[u8]> = vec![
            self.proof_data.as_slice(),
            split.as_slice(),
            self.challenge.as_slice(),
        ];
        parts.extend(self.input_signatures.iter().map(|s| s.as_bytes()));
        parts.extend(self.output_owners.iter().map(|o| o.as_bytes().as_slice()));
        parts.push(self.metadata.as_slice());
        parts.push(public_value.as_slice());
        parts.extend(self.note_ids.iter().map(|id| id.as_bytes().as_slice()));
        TransactionId::digest(parts)
    }
}

// ============================================================================
// Constructor Trait
// ============================================================================

/// External proof generator
///
/// Preconditions: the request balances and every input is confirmed.
/// Postcondition: exactly one fresh note identity per requested output, in order.
pub trait ProofConstructor: Send + Sync {
    fn build(&self, request: &ProofRequest) -> Result<ProofBundle>;
}

/// Reject a bundle that breaks the constructor postcondition.
pub fn check_bundle(
    bundle: &ProofBundle,
    request: &ProofRequest,
    ledger: &NoteLedger,
) -> Result<(), ConstructionError> {
    let expected = request.outputs.len();
    let got = bundle.note_ids().len();
    if got != expected {
        return Err(ConstructionError::OutputCountMismatch { expected, got });
    }
    if bundle.output_owners().len() != expected {
        return Err(ConstructionError::OutputCountMismatch {
            expected,
            got: bundle.output_owners().len(),
        });
    }

    let mut seen = HashSet::with_capacity(got);
    for id in bundle.note_ids() {
        if !seen.insert(*id) {
            return Err(ConstructionError::DuplicateNoteIdentity(*id));
        }
        if ledger.contains(id) {
            return Err(ConstructionError::IdentityInLedger(*id));
        }
    }

    for (index, (owner, output)) in bundle
        .output_owners()
        .iter()
        .zip(&request.outputs)
        .enumerate()
    {
        if *owner != output.owner {
            return Err(ConstructionError::OwnerMismatch { index });
        }
    }

    if bundle.public_value() != request.public_value {
        return Err(ConstructionError::PublicValueMismatch {
            expected: request.public_value,
            got: bundle.public_value(),
        });
    }
    Ok(())
}

// ============================================================================
// Mock Constructor
// ============================================================================

/// Ways [`MockProofConstructor`] can misbehave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockProofFault {
    /// Return one identity fewer than requested
    DropOutput,
    /// Repeat the first identity
    DuplicateIdentity,
    /// Fail outright
    Fail,
}

/// Deterministic blake3-based constructor for tests and the demo
pub struct MockProofConstructor {
    /// Distinguishes constructors so their identities never collide
    salt: [u8; 32],
    nonce: AtomicU64,
    fault: Option<MockProofFault>,
}

impl MockProofConstructor {
    pub fn new() -> Self {
        Self::with_salt(b"cloak-mock-prover-v1")
    }

    pub fn with_salt(salt: &[u8]) -> Self {
        Self {
            salt: *blake3::hash(salt).as_bytes(),
            nonce: AtomicU64::new(0),
            fault: None,
        }
    }

    pub fn with_fault(fault: MockProofFault) -> Self {
        Self {
            fault: Some(fault),
            ..Self::new()
        }
    }

    fn derive_note_id(
        &self,
        nonce: u64,
        index: usize,
        sender: &AccountId,
        output: &OutputSpec,
    ) -> NoteId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.salt);
        hasher.update(&nonce.to_le_bytes());
        hasher.update(&(index as u64).to_le_bytes());
        hasher.update(sender.as_bytes());
        hasher.update(output.owner.as_bytes());
        hasher.update(&output.value.as_u64().to_le_bytes());
        NoteId(*hasher.finalize().as_bytes())
    }
}

impl Default for MockProofConstructor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProofConstructor for MockProofConstructor {
    fn build(&self, request: &ProofRequest) -> Result<ProofBundle> {
        if self.fault == Some(MockProofFault::Fail) {
            bail!("mock prover configured to fail");
        }

        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        let mut note_ids: Vec<NoteId> = request
            .outputs
            .iter()
            .enumerate()
            .map(|(i, output)| self.derive_note_id(nonce, i, &request.sender, output))
            .collect();

        match self.fault {
            Some(MockProofFault::DropOutput) => {
                note_ids.pop();
            }
            Some(MockProofFault::DuplicateIdentity) if note_ids.len() > 1 => {
                note_ids[1] = note_ids[0];
            }
            _ => {}
        }

        let input_signatures = request
            .inputs
            .iter()
            .map(|note| {
                let mut hasher = blake3::Hasher::new();
                hasher.update(note.owner.as_bytes());
                hasher.update(note.id.as_bytes());
                hasher.update(request.bridge.as_bytes());
                hasher.finalize().as_bytes().to_vec()
            })
            .collect();

        let mut challenge = blake3::Hasher::new();
        challenge.update(&self.salt);
        challenge.update(&request.public_value.to_le_bytes());
        for id in &note_ids {
            challenge.update(id.as_bytes());
        }
        let challenge = challenge.finalize().as_bytes().to_vec();

        // Mock proof: 32-byte commitment padded to a fixed size
        let mut proof_data = Vec::with_capacity(256);
        proof_data.extend_from_slice(&challenge);
        proof_data.resize(256, 0);

        Ok(ProofBundle::new(ProofBundleParts {
            proof_data,
            split_index: request.inputs.len() as u32,
            challenge,
            input_signatures,
            output_owners: request.outputs.iter().map(|o| o.owner).collect(),
            metadata: nonce.to_le_bytes().to_vec(),
            public_value: request.public_value,
            note_ids,
        }))
    }
}
