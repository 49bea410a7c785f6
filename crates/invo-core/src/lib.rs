//! Shared domain types for the invo async core
//!
//! This crate holds the types every other crate agrees on:
//! - the inbound queue message schema (tagged union)
//! - code/payment/invoice status enums and the audit event vocabulary
//! - environment-driven configuration

pub mod config;
pub mod domain;
pub mod message;

pub use config::AppConfig;
pub use domain::{
    CodeData, CodeStatus, InvoiceEventType, InvoiceStatus, PaymentStatus,
};
pub use message::QueueMessage;
