pub mod checkout_use_case;
pub mod download_use_case;
pub mod ledger;
pub mod ports;
pub mod retry;

pub use checkout_use_case::{CheckoutOrchestrator, ConfirmationOutcome, SweepReport};
pub use download_use_case::DownloadAuthorizer;
pub use ledger::OrderLedger;
