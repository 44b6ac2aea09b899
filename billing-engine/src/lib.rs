//! Invoice and payment ledger engine for courier shipments and
//! subscriptions.
//!
//! The crate is the core of a billing system: pricing, invoice lifecycle,
//! settlement, disputes, recurring billing, and an audit trail. Transport
//! (HTTP/gRPC) and scheduling live outside; callers wire the services up
//! against a [`store::BillingStore`] implementation and the collaborator
//! traits in [`gateway`], [`notify`], and [`directory`].

pub mod directory;
pub mod gateway;
pub mod models;
pub mod notify;
pub mod services;
pub mod store;

pub use engine_core::config::BillingConfig;
pub use engine_core::error::AppError;
