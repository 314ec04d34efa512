//! Atomic bundle submission through the block-engine relay
//!
//! A bundle is validated locally ([`Bundle`]), sent with
//! [`BundleRelayClient::send_bundle`] and followed by [`BundleStatusPoller`]
//! until the relay reports a terminal status. [`LaunchPipeline`] wires the
//! builder, the wallet and the relay together.

pub mod errors;
pub mod pipeline;
pub mod relay;
pub mod status;
pub mod types;

pub use errors::BundleError;
pub use pipeline::{LaunchPipeline, LaunchReceipt};
pub use relay::BundleRelayClient;
pub use status::{BundleStatusPoller, BundleStatusSource};
pub use types::{Bundle, BundleOutcome, BundleStatus, InflightBundleStatus, RelayBundleStatus};
