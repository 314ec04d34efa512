//! Single-transaction submission path

pub mod confirmation;
pub mod errors;
pub mod pipeline;
pub mod submitter;

pub use confirmation::ConfirmationWaiter;
pub use errors::{ConfirmationError, SubmissionError};
pub use pipeline::TransactionPipeline;
pub use submitter::TransactionSubmitter;
