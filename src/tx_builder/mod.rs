//! Atomic transaction builder
//!
//! Merges independently produced instruction sequences into the transactions
//! of one relay bundle:
//! - **instructions**: sequences, compute budget extraction and merging, ordering checks
//! - **bundle**: `AtomicBundleBuilder` and co-signing of the compiled messages
//! - **errors**: `BuildError`
//!
//! Compute budget: each transaction carries one unit-limit instruction equal
//! to the largest limit any merged sequence asked for plus a safety margin,
//! capped at 1.4M units. Under-provisioning aborts the whole atomic unit, so
//! the margin is never negative.

pub mod bundle;
pub mod errors;
pub mod instructions;

pub use bundle::{AtomicBundleBuilder, PreparedTransaction, MAX_BUNDLE_TRANSACTIONS};
pub use errors::BuildError;
pub use instructions::{
    merge_compute_budget, sanity_check_order, split_compute_budget, ComputeBudgetRequest,
    ComputeMargin, InstructionSequence,
};
