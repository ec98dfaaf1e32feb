//! School notification engine.
//!
//! Decides which channels (email, SMS, WhatsApp) a recipient gets an event
//! on, enforces subscription and metered-credit rules, renders the
//! school's template and records one delivery row per channel.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notification;
pub mod postgres;
pub mod server;
pub mod telemetry;
pub mod template;
