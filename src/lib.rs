//! Intellidial: lead intake to outbound AI calls, and call result reconciliation.

pub mod app;
pub mod campaign;
pub mod config;
pub mod deferred;
pub mod enrichment;
pub mod error;
pub mod html;
pub mod intake;
pub mod phone;
pub mod reconcile;
pub mod signature;
pub mod store;
pub mod voice;
