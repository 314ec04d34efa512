//! Instruction sequences, compute-budget merging and ordering validation
//!
//! A merged transaction is laid out as:
//! 1. Compute budget instructions (one of each kind, merged across sequences)
//! 2. Every sequence's own instructions, in the order the sequences were added
//! 3. The tip transfer, only in the last transaction of a bundle

use super::errors::BuildError;
use solana_sdk::{
    compute_budget::{self, ComputeBudgetInstruction},
    instruction::Instruction,
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    system_program,
};
#[allow(deprecated)]
use solana_sdk::system_instruction;
use std::fmt;
use std::sync::Arc;

/// System program `Transfer` discriminant (u32 little-endian)
const TRANSFER_TAG: [u8; 4] = [2, 0, 0, 0];

const MIN_HEAP_FRAME: u32 = 32 * 1024;
const MAX_HEAP_FRAME: u32 = 256 * 1024;

/// Instructions produced by one source (an asset-creation service, the
/// preparer, ...) together with any single-use keypairs they need
#[derive(Clone)]
pub struct InstructionSequence {
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub co_signers: Vec<Arc<Keypair>>,
}

impl fmt::Debug for InstructionSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstructionSequence")
            .field("label", &self.label)
            .field("instructions", &self.instructions.len())
            .field("co_signers", &self.co_signer_pubkeys())
            .finish()
    }
}

impl InstructionSequence {
    pub fn new(label: impl Into<String>, instructions: Vec<Instruction>) -> Self {
        Self {
            label: label.into(),
            instructions,
            co_signers: Vec::new(),
        }
    }

    /// Attach a locally generated keypair that must sign before the wallet
    pub fn with_co_signer(mut self, keypair: Arc<Keypair>) -> Self {
        self.co_signers.push(keypair);
        self
    }

    pub fn co_signer_pubkeys(&self) -> Vec<Pubkey> {
        self.co_signers.iter().map(|k| k.pubkey()).collect()
    }
}

/// Compute budget a sequence asked for; `None` means "not requested"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputeBudgetRequest {
    pub unit_limit: Option<u32>,
    pub unit_price: Option<u64>,
    pub heap_frame: Option<u32>,
    pub loaded_accounts_data_size: Option<u32>,
}

impl ComputeBudgetRequest {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Compute budget instructions for this request, limit first
    pub fn instructions(&self) -> Vec<Instruction> {
        let mut instructions = Vec::with_capacity(4);
        if let Some(limit) = self.unit_limit {
            instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(limit));
        }
        if let Some(price) = self.unit_price {
            instructions.push(ComputeBudgetInstruction::set_compute_unit_price(price));
        }
        if let Some(bytes) = self.heap_frame {
            instructions.push(ComputeBudgetInstruction::request_heap_frame(bytes));
        }
        if let Some(size) = self.loaded_accounts_data_size {
            instructions.push(ComputeBudgetInstruction::set_loaded_accounts_data_size_limit(size));
        }
        instructions
    }
}

/// Safety margin added on top of the largest requested unit limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeMargin {
    pub percent: u32,
    pub floor: u32,
    pub max_units: u32,
}

impl Default for ComputeMargin {
    fn default() -> Self {
        Self {
            percent: 10,
            floor: 20_000,
            max_units: crate::config::MAX_COMPUTE_UNITS,
        }
    }
}

impl ComputeMargin {
    pub fn from_config(config: &crate::config::BundleConfig) -> Self {
        Self {
            percent: config.compute_margin_percent,
            floor: config.compute_margin_floor,
            max_units: config.max_compute_units,
        }
    }

    /// `requested` plus the margin, clamped to the cap
    pub fn apply(&self, requested: u32) -> u32 {
        let proportional = (requested as u64 * self.percent as u64 / 100) as u32;
        requested
            .saturating_add(proportional.max(self.floor))
            .min(self.max_units)
    }
}

fn read_u32(data: &[u8]) -> Option<u32> {
    data.get(1..5)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes)
}

fn read_u64(data: &[u8]) -> Option<u64> {
    data.get(1..9)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_le_bytes)
}

/// Separate a sequence's compute budget instructions from the rest
pub fn split_compute_budget(
    sequence: &InstructionSequence,
) -> Result<(ComputeBudgetRequest, Vec<Instruction>), BuildError> {
    let mut request = ComputeBudgetRequest::default();
    let mut rest = Vec::with_capacity(sequence.instructions.len());

    let invalid = |reason: String| BuildError::InvalidComputeBudget {
        sequence: sequence.label.clone(),
        reason,
    };

    for ix in &sequence.instructions {
        if ix.program_id != compute_budget::id() {
            rest.push(ix.clone());
            continue;
        }

        let (slot_name, duplicate) = match ix.data.first() {
            Some(1) => {
                let bytes = read_u32(&ix.data).ok_or_else(|| invalid("truncated heap frame".into()))?;
                if bytes % 1024 != 0 || !(MIN_HEAP_FRAME..=MAX_HEAP_FRAME).contains(&bytes) {
                    return Err(invalid(format!("heap frame {} out of range", bytes)));
                }
                ("heap frame", request.heap_frame.replace(bytes).is_some())
            }
            Some(2) => {
                let limit = read_u32(&ix.data).ok_or_else(|| invalid("truncated unit limit".into()))?;
                ("unit limit", request.unit_limit.replace(limit).is_some())
            }
            Some(3) => {
                let price = read_u64(&ix.data).ok_or_else(|| invalid("truncated unit price".into()))?;
                ("unit price", request.unit_price.replace(price).is_some())
            }
            Some(4) => {
                let size = read_u32(&ix.data)
                    .ok_or_else(|| invalid("truncated loaded accounts size".into()))?;
                (
                    "loaded accounts size",
                    request.loaded_accounts_data_size.replace(size).is_some(),
                )
            }
            Some(tag) => return Err(invalid(format!("unsupported instruction tag {}", tag))),
            None => return Err(invalid("empty instruction data".into())),
        };

        if duplicate {
            return Err(invalid(format!("{} set more than once", slot_name)));
        }
    }

    Ok((request, rest))
}

/// Reconcile the compute budgets of sequences merged into one transaction.
///
/// The unit limit is the largest request plus the margin, clamped to the cap.
/// Price, heap frame and loaded data size take the largest request. A single
/// request above the cap cannot be satisfied and is a `MergeConflict`.
pub fn merge_compute_budget(
    requests: &[ComputeBudgetRequest],
    margin: &ComputeMargin,
) -> Result<ComputeBudgetRequest, BuildError> {
    let max_limit = requests.iter().filter_map(|r| r.unit_limit).max();
    if let Some(limit) = max_limit {
        if limit > margin.max_units {
            return Err(BuildError::merge_conflict(format!(
                "requested unit limit {} exceeds cap {}",
                limit, margin.max_units
            )));
        }
    }

    Ok(ComputeBudgetRequest {
        unit_limit: max_limit.map(|limit| margin.apply(limit)),
        unit_price: requests.iter().filter_map(|r| r.unit_price).max(),
        heap_frame: requests.iter().filter_map(|r| r.heap_frame).max(),
        loaded_accounts_data_size: requests
            .iter()
            .filter_map(|r| r.loaded_accounts_data_size)
            .max(),
    })
}

/// Lamports moved by a system `Transfer`, if `data` is one
pub fn decode_transfer(data: &[u8]) -> Option<u64> {
    if data.len() != 12 || data[..4] != TRANSFER_TAG {
        return None;
    }
    data[4..12].try_into().ok().map(u64::from_le_bytes)
}

/// Whether `ix` is a system transfer into `tip_account`
pub fn is_transfer_to(ix: &Instruction, tip_account: &Pubkey) -> bool {
    ix.program_id == system_program::id()
        && decode_transfer(&ix.data).is_some()
        && ix.accounts.get(1).map(|meta| &meta.pubkey) == Some(tip_account)
}

pub fn tip_instruction(payer: &Pubkey, tip_account: &Pubkey, lamports: u64) -> Instruction {
    #[allow(deprecated)]
    system_instruction::transfer(payer, tip_account, lamports)
}

/// Validate the layout of one merged transaction.
///
/// Compute budget instructions must all precede program instructions. With a
/// tip account, the final instruction must be the only transfer into it.
pub fn sanity_check_order(
    instructions: &[Instruction],
    tip_account: Option<&Pubkey>,
) -> Result<(), BuildError> {
    if instructions.is_empty() {
        return Err(BuildError::invalid_order("Instruction list is empty"));
    }

    let mut seen_program_ix = false;
    for (idx, ix) in instructions.iter().enumerate() {
        if ix.program_id == compute_budget::id() {
            if seen_program_ix {
                return Err(BuildError::invalid_order(format!(
                    "Compute budget instruction at position {} follows program instructions",
                    idx
                )));
            }
        } else {
            seen_program_ix = true;
        }
    }

    if let Some(tip_account) = tip_account {
        let last = instructions.len() - 1;
        if !is_transfer_to(&instructions[last], tip_account) {
            return Err(BuildError::invalid_order(
                "Last instruction of the bundle must be the tip transfer",
            ));
        }
        if let Some(idx) = instructions[..last]
            .iter()
            .position(|ix| is_transfer_to(ix, tip_account))
        {
            return Err(BuildError::invalid_order(format!(
                "Tip transfer found at position {} before the end of the bundle",
                idx
            )));
        }
    }

    Ok(())
}
