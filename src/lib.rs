//! Vecem Quota - per-user usage limits for the chat assistant
//!
//! This crate decides whether a user may make another call to the hosted
//! language-model API. Each user gets a short burst window and a daily
//! allowance; the limiter is created once per process and shared by every
//! request handler.

pub mod config;
pub mod error;
pub mod gateway;
pub mod ratelimit;
pub mod replay;
pub mod telemetry;
