//! Kickback - Referral attribution and commission ledger for a storefront
//! with a two-tier instructor affiliate program.
//!
//! This library provides the core functionality for the Kickback engine,
//! including the append-only commission ledger, referral resolution, payment
//! provider webhooks, payout processing, and API handlers.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod pagination;
pub mod payments;
pub mod rates;
pub mod referral;
pub mod util;
