//! Core domain types and logic.

pub mod applier;
pub mod config;
pub mod error;
pub mod history;
pub mod indicator;
pub mod indicator_service;
pub mod optimizer;
pub mod portfolio;
pub mod prediction;
pub mod price;
pub mod recommendation;
pub mod service;
pub mod snapshot;
pub mod tracker;
pub mod universe;
