//! Types shared between the database and API representations.

pub mod code;
pub mod disclosure;
pub mod role;
pub mod round;

pub use disclosure::DisclosureLevel;
pub use role::ParticipantRole;
pub use round::{InvalidTransition, RoundAction, RoundStatus};
