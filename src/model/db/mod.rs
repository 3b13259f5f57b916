//! DB-compatible (e.g. de/serialisable) types.
//!
//! The types in this module are serialised in an DB-friendly way, e.g.:
//!
//! - IDs and datetimes are serialised in MongoDB's own format.

mod ballot;
pub use ballot::Ballot;

mod participant;
pub use participant::Participant;

mod receipt;
pub use receipt::VoteReceipt;

mod round;
pub use round::Round;

mod session;
pub use session::Session;
