//! Inbound queue message schema
//!
//! Messages arrive as JSON with a `type` discriminant. The set of variants is
//! closed: adding a message kind is a deliberate schema change here, never
//! something the consumer accepts silently. Unknown discriminants or missing
//! fields fail deserialization and are handled by the consumer as permanently
//! undeliverable.

use serde::{Deserialize, Serialize};

use crate::domain::CodeStatus;

/// Queue message envelope, discriminated by `type`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum QueueMessage {
    /// A code was generated and needs asynchronous evaluation
    #[serde(rename = "CODE_GENERATED", rename_all = "camelCase")]
    CodeGenerated {
        code_id: String,
        user_id: String,
        code: String,
        status: CodeStatus,
        ai_generated: bool,
        email_send: bool,
    },
}
