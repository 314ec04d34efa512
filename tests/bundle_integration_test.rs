//! Integration tests for atomic bundle assembly and signing
//!
//! This test validates:
//! - Co-signer keypair + wallet signatures on a two-transaction bundle
//! - Tip placement for arbitrary sequence layouts
//! - Bundle validation of the signed result

use launchpad_pipeline::bundle::Bundle;
use launchpad_pipeline::compat;
use launchpad_pipeline::tx_builder::{AtomicBundleBuilder, InstructionSequence};
use launchpad_pipeline::types::Deadline;
use launchpad_pipeline::wallet::{KeypairWallet, WalletCapability, WalletHandle, WalletSigner};
use proptest::prelude::*;
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    system_program,
};
use std::sync::Arc;
use std::time::Duration;

fn program_ix(tag: u8, accounts: Vec<AccountMeta>) -> Instruction {
    Instruction::new_with_bytes(Pubkey::new_unique(), &[tag], accounts)
}

fn embedded_wallet() -> WalletHandle {
    let wallet: Arc<dyn WalletCapability> = Arc::new(
        KeypairWallet::from_keypair(Keypair::new())
            .with_name("embedded")
            .as_platform_wallet(),
    );
    WalletHandle::select(&[], &[wallet]).unwrap()
}

#[tokio::test]
async fn test_create_co_signed_by_fresh_keypair_and_wallet() {
    let handle = embedded_wallet();
    let payer = handle.address();
    let mint = Arc::new(Keypair::new());
    let tip_account = Pubkey::new_unique();

    let setup = InstructionSequence::new(
        "setup",
        vec![
            ComputeBudgetInstruction::set_compute_unit_limit(60_000),
            program_ix(1, vec![AccountMeta::new(Pubkey::new_unique(), false)]),
        ],
    );
    let create = InstructionSequence::new(
        "create",
        vec![
            ComputeBudgetInstruction::set_compute_unit_limit(300_000),
            program_ix(
                2,
                vec![
                    AccountMeta::new(payer, true),
                    AccountMeta::new(mint.pubkey(), true),
                ],
            ),
        ],
    )
    .with_co_signer(mint.clone());

    let prepared = AtomicBundleBuilder::new(payer)
        .add_sequence(setup)
        .next_transaction()
        .add_sequence(create)
        .with_tip(tip_account, 25_000)
        .build(Hash::new_unique())
        .unwrap();
    assert_eq!(prepared.len(), 2);

    let co_signed: Vec<_> = prepared.iter().map(|p| p.co_sign().unwrap()).collect();
    assert_eq!(compat::present_signature_count(&co_signed[0]), 0);
    assert_eq!(compat::present_signature_count(&co_signed[1]), 1);

    let signed = WalletSigner::new(Duration::from_secs(5))
        .sign_many(&handle, co_signed, Deadline::after(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(signed[0].present_signature_count(), 1);
    assert_eq!(signed[1].present_signature_count(), 2);
    assert!(signed.iter().all(|tx| tx.is_fully_signed()));

    // both signatures verify against the unchanged message
    let create_tx = signed[1].transaction();
    let message_bytes = create_tx.message.serialize();
    for (signer, signature) in compat::get_required_signers(&create_tx.message)
        .iter()
        .zip(&create_tx.signatures)
    {
        assert!(signature.verify(signer.as_ref(), &message_bytes));
    }

    let bundle = Bundle::new(signed, tip_account, 25_000).unwrap();
    assert_eq!(bundle.len(), 2);
    assert_eq!(bundle.signatures().len(), 2);
}

proptest! {
    #[test]
    fn prop_tip_is_last_instruction_of_last_transaction(
        layout in prop::collection::vec(1usize..3, 1..=5),
        lamports in 1_000u64..100_000,
    ) {
        let payer = Pubkey::new_unique();
        let tip_account = Pubkey::new_unique();

        let mut builder = AtomicBundleBuilder::new(payer);
        for (index, count) in layout.iter().enumerate() {
            for n in 0..*count {
                builder = builder.add_sequence(InstructionSequence::new(
                    format!("seq-{index}-{n}"),
                    vec![program_ix(n as u8, vec![AccountMeta::new(Pubkey::new_unique(), false)])],
                ));
            }
            builder = builder.next_transaction();
        }

        let prepared = builder.with_tip(tip_account, lamports).build(Hash::new_unique()).unwrap();
        let last = prepared.len() - 1;

        for (tx_index, tx) in prepared.iter().enumerate() {
            let instructions = compat::get_instructions(&tx.message);
            for (ix_index, ix) in instructions.iter().enumerate() {
                let pays_tip = compat::program_id_of(&tx.message, ix) == Some(&system_program::id())
                    && compat::instruction_account(&tx.message, ix, 1) == Some(&tip_account);
                let is_final = tx_index == last && ix_index == instructions.len() - 1;
                prop_assert_eq!(pays_tip, is_final);
            }
        }
    }
}
