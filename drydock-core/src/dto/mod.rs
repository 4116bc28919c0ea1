//! Wire-level DTOs
//!
//! Inbound webhook payloads and manual-deploy requests, plus the outbound
//! callback payload.

pub mod deploy;
pub mod webhook;

pub use deploy::{CallbackPayload, ExternDeployRequest};
pub use webhook::{PushCommit, WebhookEvent, WebhookPayload};
