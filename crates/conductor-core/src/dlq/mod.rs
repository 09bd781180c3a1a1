//! Dead-letter queue ledger.

pub mod ledger;

pub use ledger::DlqLedger;
