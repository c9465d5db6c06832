//! Common types shared across elector crates
//!
//! This crate holds the election record, candidate identity and result
//! types so that store implementations and the broadcast service do not
//! depend on each other.

pub mod election;
pub mod error;
pub mod result;

pub use election::*;
pub use error::*;
pub use result::*;
