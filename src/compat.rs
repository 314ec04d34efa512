//! Compatibility layer for Solana message versions
//!
//! Wallets, the preparer and the bundle builder may hand us either legacy or
//! V0 messages. Everything in the pipeline that inspects signers, signature
//! slots or compiled instructions goes through this module so that both
//! formats behave identically.

use solana_sdk::{
    instruction::CompiledInstruction,
    message::{MessageHeader, VersionedMessage},
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};

/// Get the message header from a `VersionedMessage`.
#[inline]
#[must_use]
pub fn get_message_header(message: &VersionedMessage) -> &MessageHeader {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.header,
        VersionedMessage::V0(v0_msg) => &v0_msg.header,
    }
}

/// Get the static account keys from a `VersionedMessage`.
///
/// For V0 messages this excludes addresses loaded from lookup tables, which
/// can never be signers.
#[inline]
#[must_use]
pub fn get_static_account_keys(message: &VersionedMessage) -> &[Pubkey] {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.account_keys,
        VersionedMessage::V0(v0_msg) => &v0_msg.account_keys,
    }
}

/// Get the accounts that must sign this message.
///
/// Required signers are always the first `num_required_signatures` static
/// keys, in the same order as the transaction's signature slots.
#[inline]
#[must_use]
pub fn get_required_signers(message: &VersionedMessage) -> &[Pubkey] {
    let header = get_message_header(message);
    let account_keys = get_static_account_keys(message);
    let num_signers = header.num_required_signatures as usize;

    &account_keys[..num_signers.min(account_keys.len())]
}

/// Get the compiled instructions of a message.
#[inline]
#[must_use]
pub fn get_instructions(message: &VersionedMessage) -> &[CompiledInstruction] {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.instructions,
        VersionedMessage::V0(v0_msg) => &v0_msg.instructions,
    }
}

/// Resolve the program id of a compiled instruction against the static keys.
///
/// Program ids are never loaded from lookup tables, so the static keys are
/// always sufficient.
#[must_use]
pub fn program_id_of<'a>(
    message: &'a VersionedMessage,
    instruction: &CompiledInstruction,
) -> Option<&'a Pubkey> {
    get_static_account_keys(message).get(instruction.program_id_index as usize)
}

/// Resolve the `position`-th account of a compiled instruction.
///
/// Returns `None` when the account index points into a lookup table.
#[must_use]
pub fn instruction_account<'a>(
    message: &'a VersionedMessage,
    instruction: &CompiledInstruction,
    position: usize,
) -> Option<&'a Pubkey> {
    let index = *instruction.accounts.get(position)? as usize;
    get_static_account_keys(message).get(index)
}

/// Index of `signer` in the signature slots, if it is a required signer.
#[must_use]
pub fn signer_position(message: &VersionedMessage, signer: &Pubkey) -> Option<usize> {
    get_required_signers(message)
        .iter()
        .position(|key| key == signer)
}

/// Number of signature slots that carry a real (non-default) signature.
#[must_use]
pub fn present_signature_count(tx: &VersionedTransaction) -> usize {
    tx.signatures
        .iter()
        .filter(|sig| **sig != Signature::default())
        .count()
}

/// Required signers whose signature slot is still empty.
#[must_use]
pub fn missing_signers(tx: &VersionedTransaction) -> Vec<Pubkey> {
    get_required_signers(&tx.message)
        .iter()
        .enumerate()
        .filter(|(index, _)| {
            tx.signatures
                .get(*index)
                .map_or(true, |sig| *sig == Signature::default())
        })
        .map(|(_, key)| *key)
        .collect()
}

/// Build an unsigned transaction with one empty signature slot per signer.
#[must_use]
pub fn unsigned_transaction(message: VersionedMessage) -> VersionedTransaction {
    let num_signers = get_message_header(&message).num_required_signatures as usize;
    VersionedTransaction {
        signatures: vec![Signature::default(); num_signers],
        message,
    }
}
