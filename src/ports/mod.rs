//! Port traits: one per external collaborator the engine talks to.

pub mod config_port;
pub mod history_port;
pub mod indicator_port;
pub mod oracle_port;
pub mod portfolio_port;
pub mod price_port;
