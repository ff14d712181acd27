//! Outbound delivery
//!
//! [`DeliveryCoordinator`] sends composed messages through the transports
//! an [`AccountManager`] knows about, staging them first so a failed or
//! interrupted send leaves a copy to retry from.

mod accounts;
mod coordinator;
mod result;

pub use accounts::AccountManager;
pub use coordinator::DeliveryCoordinator;
pub use result::{DeliveryResult, FailureSeverity};
