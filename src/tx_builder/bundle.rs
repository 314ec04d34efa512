//! Atomic bundle assembly
//!
//! [`AtomicBundleBuilder`] turns independently produced instruction sequences
//! into 1–5 compiled V0 messages destined for a single relay bundle. Sequences
//! added to the same transaction execute all-or-nothing inside it; the relay
//! makes the transactions of a bundle all-or-nothing among themselves.

use super::errors::BuildError;
use super::instructions::{
    is_transfer_to, merge_compute_budget, sanity_check_order, split_compute_budget,
    tip_instruction, ComputeMargin, InstructionSequence,
};
use crate::compat;
use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::{v0::Message as MessageV0, VersionedMessage},
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    transaction::VersionedTransaction,
};
use std::sync::Arc;
use tracing::debug;

/// Relay limit on transactions per bundle
pub const MAX_BUNDLE_TRANSACTIONS: usize = 5;

#[derive(Debug, Clone)]
pub struct AtomicBundleBuilder {
    payer: Pubkey,
    margin: ComputeMargin,
    transactions: Vec<Vec<InstructionSequence>>,
    tip: Option<(Pubkey, u64)>,
}

impl AtomicBundleBuilder {
    /// `payer` is the wallet address; it pays fees and the tip
    pub fn new(payer: Pubkey) -> Self {
        Self {
            payer,
            margin: ComputeMargin::default(),
            transactions: vec![Vec::new()],
            tip: None,
        }
    }

    pub fn with_compute_margin(mut self, margin: ComputeMargin) -> Self {
        self.margin = margin;
        self
    }

    /// Append a sequence to the current transaction
    pub fn add_sequence(mut self, sequence: InstructionSequence) -> Self {
        if let Some(current) = self.transactions.last_mut() {
            current.push(sequence);
        }
        self
    }

    /// Start a new transaction; a no-op while the current one is empty
    pub fn next_transaction(mut self) -> Self {
        if self.transactions.last().map_or(false, |tx| !tx.is_empty()) {
            self.transactions.push(Vec::new());
        }
        self
    }

    /// Pay `lamports` to `tip_account` as the last instruction of the bundle
    pub fn with_tip(mut self, tip_account: Pubkey, lamports: u64) -> Self {
        self.tip = Some((tip_account, lamports));
        self
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.iter().filter(|tx| !tx.is_empty()).count()
    }

    /// Compile every transaction against `blockhash`
    pub fn build(&self, blockhash: Hash) -> Result<Vec<PreparedTransaction>, BuildError> {
        let groups: Vec<&Vec<InstructionSequence>> =
            self.transactions.iter().filter(|tx| !tx.is_empty()).collect();

        if groups.is_empty() {
            return Err(BuildError::EmptyBundle);
        }
        if groups.len() > MAX_BUNDLE_TRANSACTIONS {
            return Err(BuildError::TooManyTransactions {
                count: groups.len(),
            });
        }

        let last = groups.len() - 1;
        groups
            .iter()
            .enumerate()
            .map(|(index, sequences)| {
                let tip = if index == last { self.tip } else { None };
                self.build_one(index, sequences, tip, blockhash)
            })
            .collect()
    }

    fn build_one(
        &self,
        index: usize,
        sequences: &[InstructionSequence],
        tip: Option<(Pubkey, u64)>,
        blockhash: Hash,
    ) -> Result<PreparedTransaction, BuildError> {
        let mut requests = Vec::with_capacity(sequences.len());
        let mut body: Vec<Instruction> = Vec::new();
        for sequence in sequences {
            let (request, rest) = split_compute_budget(sequence)?;
            requests.push(request);
            body.extend(rest);
        }
        if body.is_empty() {
            return Err(BuildError::EmptyTransaction { index });
        }

        if let Some((tip_account, lamports)) = tip {
            let tip_ix = tip_instruction(&self.payer, &tip_account, lamports);
            // A caller that already ended with the exact tip gets the same message
            if body.last() != Some(&tip_ix) {
                if body.iter().any(|ix| is_transfer_to(ix, &tip_account)) {
                    return Err(BuildError::invalid_order(format!(
                        "Transaction {} already pays the tip account before the end",
                        index
                    )));
                }
                body.push(tip_ix);
            }
        }

        let mut instructions = merge_compute_budget(&requests, &self.margin)?.instructions();
        instructions.extend(body);
        sanity_check_order(&instructions, tip.as_ref().map(|(account, _)| account))?;

        let co_signers = dedup_co_signers(sequences);
        let message = MessageV0::try_compile(&self.payer, &instructions, &[], blockhash)
            .map_err(|e| BuildError::Compile(e.to_string()))?;
        let message = VersionedMessage::V0(message);

        check_signers(&message, &self.payer, &co_signers)?;

        let size = bincode::serialized_size(&compat::unsigned_transaction(message.clone()))
            .map_err(|e| BuildError::Compile(e.to_string()))? as usize;
        if size > PACKET_DATA_SIZE {
            return Err(BuildError::TransactionTooLarge { size });
        }

        debug!(
            index,
            instructions = instructions.len(),
            co_signers = co_signers.len(),
            size,
            "Compiled bundle transaction"
        );

        Ok(PreparedTransaction {
            message,
            co_signers,
            labels: sequences.iter().map(|s| s.label.clone()).collect(),
        })
    }
}

fn dedup_co_signers(sequences: &[InstructionSequence]) -> Vec<Arc<Keypair>> {
    let mut co_signers: Vec<Arc<Keypair>> = Vec::new();
    for keypair in sequences.iter().flat_map(|s| s.co_signers.iter()) {
        if !co_signers.iter().any(|k| k.pubkey() == keypair.pubkey()) {
            co_signers.push(keypair.clone());
        }
    }
    co_signers
}

/// Every required signer is the payer or a co-signer, and every co-signer is required
fn check_signers(
    message: &VersionedMessage,
    payer: &Pubkey,
    co_signers: &[Arc<Keypair>],
) -> Result<(), BuildError> {
    let required = compat::get_required_signers(message);

    for signer in required {
        if signer != payer && !co_signers.iter().any(|k| k.pubkey() == *signer) {
            return Err(BuildError::MissingCoSigner { signer: *signer });
        }
    }
    for keypair in co_signers {
        let signer = keypair.pubkey();
        if !required.contains(&signer) {
            return Err(BuildError::UnexpectedCoSigner { signer });
        }
    }
    Ok(())
}

/// A compiled message waiting for its co-signatures and the wallet signature
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    pub message: VersionedMessage,
    pub co_signers: Vec<Arc<Keypair>>,
    /// Labels of the sequences merged into this transaction, in order
    pub labels: Vec<String>,
}

impl PreparedTransaction {
    pub fn required_signers(&self) -> &[Pubkey] {
        compat::get_required_signers(&self.message)
    }

    /// Sign with every co-signer keypair, leaving the wallet's slot empty
    pub fn co_sign(&self) -> Result<VersionedTransaction, BuildError> {
        let mut tx = compat::unsigned_transaction(self.message.clone());
        let message_bytes = self.message.serialize();

        for keypair in &self.co_signers {
            let signer = keypair.pubkey();
            let position = compat::signer_position(&self.message, &signer)
                .ok_or(BuildError::UnexpectedCoSigner { signer })?;
            let signature = keypair
                .try_sign_message(&message_bytes)
                .map_err(|e| BuildError::Signing(e.to_string()))?;
            tx.signatures[position] = signature;
        }

        Ok(tx)
    }
}
