pub mod entry;
pub mod hash;
pub mod integrity;
pub mod query;
pub mod service;
pub mod stats;
pub mod store;

pub use entry::LedgerEntry;
pub use hash::HashScheme;
pub use integrity::{ChainState, SourceVerification, VerificationReason, VerificationResult};
pub use query::TimelineEvent;
pub use service::LedgerService;
pub use stats::LedgerStats;
pub use store::{EntryStore, ScanPage};
