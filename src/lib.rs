//! Client core for a rock-paper-scissors game played against an on-chain
//! contract.
//!
//! [`identity::IdentityTracker`] owns the current account,
//! [`gateway::ContractGateway`] talks to the contract through a
//! [`ledger::Ledger`], [`session::GameSessionController`] runs the play
//! lifecycle and [`history::HistoryView`] keeps the displayed history.
//! [`engine::SessionEngine`] wires them into one event loop.

pub mod deployment;
pub mod engine;
pub mod error;
pub mod game;
pub mod gateway;
pub mod history;
pub mod identity;
pub mod ledger;
pub mod session;
pub mod wallets;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::{
    ErrorKind,
    GameError,
    Result,
};
