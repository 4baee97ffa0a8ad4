//! Aptos chain support: BCS encoding, transaction construction, account
//! keys and the fullnode REST client.

pub mod account;
pub mod bcs;
pub mod client;
pub mod transaction;

pub use account::LocalAccount;
pub use client::AptosClient;
pub use transaction::{EntryFunction, RawTransaction, TypeTag};
