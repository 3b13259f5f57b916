//! Types handled by the server, split by representation: what is stored,
//! what goes over the wire, and what both share.

pub mod api;
pub mod common;
pub mod db;
pub mod mongodb;
