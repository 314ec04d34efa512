use super::errors::BundleError;
use crate::compat;
use crate::tx_builder::instructions::decode_transfer;
use crate::tx_builder::MAX_BUNDLE_TRANSACTIONS;
use crate::types::SignedTransaction;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_sdk::{pubkey::Pubkey, signature::Signature, system_program};
use std::time::Duration;

/// Lifecycle of a submitted bundle; `Pending` is the only non-terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BundleStatus {
    Pending,
    Landed,
    Failed,
    Invalid,
    Timeout,
}

impl BundleStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            BundleStatus::Pending => false,
            BundleStatus::Landed
            | BundleStatus::Failed
            | BundleStatus::Invalid
            | BundleStatus::Timeout => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BundleStatus::Pending => "pending",
            BundleStatus::Landed => "landed",
            BundleStatus::Failed => "failed",
            BundleStatus::Invalid => "invalid",
            BundleStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status strings the relay reports. Anything else fails to decode rather
/// than being read as pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayBundleStatus {
    Pending,
    Landed,
    Failed,
    Invalid,
}

impl From<RelayBundleStatus> for BundleStatus {
    fn from(status: RelayBundleStatus) -> Self {
        match status {
            RelayBundleStatus::Pending => BundleStatus::Pending,
            RelayBundleStatus::Landed => BundleStatus::Landed,
            RelayBundleStatus::Failed => BundleStatus::Failed,
            RelayBundleStatus::Invalid => BundleStatus::Invalid,
        }
    }
}

/// One entry of `getInflightBundleStatuses`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InflightBundleStatus {
    pub bundle_id: String,
    pub status: RelayBundleStatus,
    #[serde(default)]
    pub landed_slot: Option<u64>,
}

/// Final word of the status poller on one bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOutcome {
    pub bundle_id: String,
    pub status: BundleStatus,
    pub landed_slot: Option<u64>,
    pub polls: u32,
    pub elapsed: Duration,
}

/// 1–5 fully signed transactions whose final instruction pays the tip
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    transactions: Vec<SignedTransaction>,
    tip_account: Pubkey,
    tip_lamports: u64,
}

impl Bundle {
    /// Validate shape, signatures and tip placement.
    ///
    /// The tip must be the last instruction of the last transaction and the
    /// only transfer into `tip_account` anywhere in the bundle.
    pub fn new(
        transactions: Vec<SignedTransaction>,
        tip_account: Pubkey,
        tip_lamports: u64,
    ) -> Result<Self, BundleError> {
        if transactions.is_empty() || transactions.len() > MAX_BUNDLE_TRANSACTIONS {
            return Err(BundleError::InvalidBundle(format!(
                "bundle must hold 1 to {} transactions, got {}",
                MAX_BUNDLE_TRANSACTIONS,
                transactions.len()
            )));
        }

        for (index, tx) in transactions.iter().enumerate() {
            let missing = tx.missing_signers();
            if !missing.is_empty() {
                return Err(BundleError::InvalidBundle(format!(
                    "transaction {} is missing signatures from {:?}",
                    index, missing
                )));
            }
        }

        let tips: Vec<(usize, usize, Option<u64>)> = transactions
            .iter()
            .enumerate()
            .flat_map(|(tx_index, tx)| {
                let message = &tx.transaction().message;
                compat::get_instructions(message)
                    .iter()
                    .enumerate()
                    .filter(move |(_, ix)| {
                        compat::program_id_of(message, ix) == Some(&system_program::id())
                            && compat::instruction_account(message, ix, 1) == Some(&tip_account)
                    })
                    .map(move |(ix_index, ix)| (tx_index, ix_index, decode_transfer(&ix.data)))
                    .filter(|(_, _, lamports)| lamports.is_some())
            })
            .collect();

        let last_tx = transactions.len() - 1;
        let last_ix = compat::get_instructions(&transactions[last_tx].transaction().message)
            .len()
            .saturating_sub(1);

        match tips.as_slice() {
            [] => Err(BundleError::TipPlacement(format!(
                "no transfer to tip account {}",
                tip_account
            ))),
            [(tx_index, ix_index, lamports)] => {
                if (*tx_index, *ix_index) != (last_tx, last_ix) {
                    Err(BundleError::TipPlacement(format!(
                        "tip is instruction {} of transaction {}, must be the last instruction of transaction {}",
                        ix_index, tx_index, last_tx
                    )))
                } else if *lamports != Some(tip_lamports) {
                    Err(BundleError::TipPlacement(format!(
                        "tip pays {:?} lamports, expected {}",
                        lamports, tip_lamports
                    )))
                } else {
                    Ok(Self {
                        transactions,
                        tip_account,
                        tip_lamports,
                    })
                }
            }
            more => Err(BundleError::TipPlacement(format!(
                "{} transfers to the tip account",
                more.len()
            ))),
        }
    }

    pub fn transactions(&self) -> &[SignedTransaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn tip_account(&self) -> &Pubkey {
        &self.tip_account
    }

    pub fn tip_lamports(&self) -> u64 {
        self.tip_lamports
    }

    /// First signature of every transaction, in bundle order
    pub fn signatures(&self) -> Vec<Signature> {
        self.transactions.iter().map(|tx| tx.signature()).collect()
    }

    /// Id the relay assigns: SHA-256 over the comma-joined first signatures,
    /// hex encoded. Lets a bundle be tracked when the `sendBundle` answer is lost.
    pub fn id(&self) -> String {
        let joined = self
            .signatures()
            .iter()
            .map(Signature::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("{:x}", Sha256::digest(joined.as_bytes()))
    }

    /// Base64 wire form expected by `sendBundle`
    pub fn encode_base64(&self) -> Result<Vec<String>, BundleError> {
        self.transactions
            .iter()
            .map(|tx| {
                tx.to_base64()
                    .map_err(|e| BundleError::InvalidBundle(format!("serialization failed: {}", e)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx_builder::instructions::tip_instruction;
    use solana_sdk::{
        hash::Hash,
        instruction::{AccountMeta, Instruction},
        message::{v0::Message as MessageV0, VersionedMessage},
        signature::Keypair,
        signer::Signer,
    };

    fn signed(payer: &Keypair, instructions: &[Instruction]) -> SignedTransaction {
        let message =
            MessageV0::try_compile(&payer.pubkey(), instructions, &[], Hash::new_unique()).unwrap();
        let message = VersionedMessage::V0(message);
        let mut tx = compat::unsigned_transaction(message);
        tx.signatures[0] = payer.sign_message(&tx.message.serialize());
        SignedTransaction::new(tx)
    }

    fn program_ix() -> Instruction {
        Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[7],
            vec![AccountMeta::new(Pubkey::new_unique(), false)],
        )
    }

    #[test]
    fn test_status_terminality() {
        assert!(!BundleStatus::Pending.is_terminal());
        for status in [
            BundleStatus::Landed,
            BundleStatus::Failed,
            BundleStatus::Invalid,
            BundleStatus::Timeout,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn test_relay_status_decoding_is_strict() {
        let parsed: InflightBundleStatus = serde_json::from_value(serde_json::json!({
            "bundle_id": "b1",
            "status": "Landed",
            "landed_slot": 280_000_001u64
        }))
        .unwrap();
        assert_eq!(BundleStatus::from(parsed.status), BundleStatus::Landed);
        assert_eq!(parsed.landed_slot, Some(280_000_001));

        let unknown = serde_json::from_value::<InflightBundleStatus>(serde_json::json!({
            "bundle_id": "b1",
            "status": "Processing"
        }));
        assert!(unknown.is_err());
    }

    #[test]
    fn test_valid_bundle() {
        let payer = Keypair::new();
        let tip = Pubkey::new_unique();
        let first = signed(&payer, &[program_ix()]);
        let last = signed(&payer, &[program_ix(), tip_instruction(&payer.pubkey(), &tip, 10_000)]);

        let bundle = Bundle::new(vec![first.clone(), last.clone()], tip, 10_000).unwrap();
        assert_eq!(bundle.signatures(), vec![first.signature(), last.signature()]);
        assert_eq!(bundle.encode_base64().unwrap().len(), 2);

        let id = bundle.id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        let joined = format!("{},{}", first.signature(), last.signature());
        assert_eq!(id, format!("{:x}", Sha256::digest(joined.as_bytes())));
    }

    #[test]
    fn test_tip_in_first_transaction_rejected() {
        let payer = Keypair::new();
        let tip = Pubkey::new_unique();
        let first = signed(&payer, &[tip_instruction(&payer.pubkey(), &tip, 10_000)]);
        let last = signed(&payer, &[program_ix()]);

        assert!(matches!(
            Bundle::new(vec![first, last], tip, 10_000),
            Err(BundleError::TipPlacement(_))
        ));
    }

    #[test]
    fn test_missing_or_double_tip_rejected() {
        let payer = Keypair::new();
        let tip = Pubkey::new_unique();

        let no_tip = signed(&payer, &[program_ix()]);
        assert!(matches!(
            Bundle::new(vec![no_tip], tip, 10_000),
            Err(BundleError::TipPlacement(_))
        ));

        let tip_ix = tip_instruction(&payer.pubkey(), &tip, 10_000);
        let first = signed(&payer, &[tip_ix.clone()]);
        let last = signed(&payer, &[program_ix(), tip_ix]);
        assert!(matches!(
            Bundle::new(vec![first, last], tip, 10_000),
            Err(BundleError::TipPlacement(_))
        ));
    }

    #[test]
    fn test_wrong_tip_amount_rejected() {
        let payer = Keypair::new();
        let tip = Pubkey::new_unique();
        let tx = signed(&payer, &[program_ix(), tip_instruction(&payer.pubkey(), &tip, 5_000)]);
        assert!(matches!(
            Bundle::new(vec![tx], tip, 10_000),
            Err(BundleError::TipPlacement(_))
        ));
    }

    #[test]
    fn test_partially_signed_transaction_rejected() {
        let payer = Keypair::new();
        let tip = Pubkey::new_unique();
        let mut tx = signed(&payer, &[program_ix(), tip_instruction(&payer.pubkey(), &tip, 1)])
            .into_inner();
        tx.signatures[0] = Signature::default();

        assert!(matches!(
            Bundle::new(vec![SignedTransaction::new(tx)], tip, 1),
            Err(BundleError::InvalidBundle(_))
        ));
        assert!(matches!(
            Bundle::new(vec![], tip, 1),
            Err(BundleError::InvalidBundle(_))
        ));
    }
}
