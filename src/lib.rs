//! ticketgate Library
//!
//! Per-organizer API throttling for the ticketing backend: fixed-window
//! counters keyed by organizer and window class, limits taken from the
//! organizer's subscription plan, and an axum guard that enforces them.

pub mod abuse_log;
pub mod clock;
pub mod config;
pub mod guard;
pub mod logging;
pub mod metrics;
pub mod organizer;
pub mod server;
pub mod throttle;
