pub mod error;
pub mod filter;
pub mod ingest;
pub mod key;
pub mod session;
pub mod store;
pub mod types;

pub use error::{ReplayError, SessionError, SnapshotError};
pub use filter::{FilterStats, OpeningFilter};
pub use ingest::{IngestOptions, IngestSummary};
pub use key::position_key;
pub use session::{Lookup, QuerySession, SessionState, Suggestion};
pub use store::{StatEntry, StatisticsStore};
pub use types::{FilterConfig, GameOutcome, OpeningRecord, TimeClass};
