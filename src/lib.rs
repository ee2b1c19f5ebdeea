//! Off-chain watcher and enforcer for a collateralized fasset protocol.
//!
//! The crate replicates asset-manager contract state from the native-chain
//! event log, cross-references underlying-chain payments against expected
//! payment references, and drives corrective transactions (challenges,
//! liquidation starts/ends) through independent polling actors.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        fasset-watcher                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  native ledger ──▶ LedgerEvent ──▶ TrackedState ──▶ actors       │
//! │                     (decoded)       (agents,        (Challenger, │
//! │                                      supply,         Liquidator, │
//! │  underlying  ────▶ transactions ──▶  watermark)      Keeper)     │
//! │  indexer                                               │         │
//! │                                                        ▼         │
//! │                                      ScopedRunner fan-out:       │
//! │                                      proof request → challenge / │
//! │                                      liquidation submission      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! External collaborators (ledger client, underlying-chain indexer,
//! attestation provider, asset-manager call surface) are consumed through
//! the async traits in [`clients`]; the crate ships no transport of its own.

pub mod actors;
pub mod clients;
pub mod config;
pub mod conversions;
pub mod error;
pub mod events;
pub mod metrics;
pub mod payment_reference;
pub mod scope;
pub mod state;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use error::{WatcherError, WatcherResult};
