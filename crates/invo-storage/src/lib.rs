//! Ledger storage for invoices, payments and the audit log
//!
//! The ledger is the internal system of record the payment reconciler writes
//! to. All mutations are single-row conditional updates or single-transaction
//! multi-row writes; the append-only `invoice_events` log doubles as the
//! idempotency ledger for reminder sending.

mod memory;
mod models;
mod postgres;
mod store;

pub use memory::InMemoryLedger;
pub use models::{Client, Code, Invoice, InvoiceEvent, Payment, Settings};
pub use postgres::PostgresLedger;
pub use store::{CodeStore, LedgerError, LedgerStore, PaymentUpdate};
