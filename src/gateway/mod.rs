//! Rate-limited access to the hosted chat model.
//!
//! The gateway is the collaborator that sits in front of the model API: it
//! asks the limiter first and turns a rejection into an error the caller can
//! tell apart from a failing backend.

mod chat;

pub use chat::{normalize_reply, BackendError, ChatBackend, ChatGateway, ChatReply, GatewayError};
