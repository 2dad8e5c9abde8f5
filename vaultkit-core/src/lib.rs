//! Co-signed custody for a Safe smart account, with an owner-only recovery path behind a
//! Zodiac Delay module.
//!
//! Everyday transfers need both the owner and the co-signer. Their signatures can be
//! collected offline, one process at a time, through the [`store`]. If the co-signer
//! disappears, the owner queues a transfer on the Delay module and executes it once the
//! cooldown has passed ([`workflow::start_recovery`], [`workflow::finalize_recovery`]).
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod address;
pub mod amount;
pub mod bundler;
pub mod chain;
pub mod config;
pub mod facade;
pub mod operation;
pub mod payload;
pub mod rpc;
pub mod signature;
pub mod store;
pub mod timelock;
pub mod workflow;

mod error;
pub use error::*;

// private modules
mod contracts;
mod http_request;
