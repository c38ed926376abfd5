//! SLA compliance and escalation engine for helpdesk tickets.
//!
//! The core computes calendar-aware response/resolution deadlines, detects
//! and records deadline breaches, and evaluates organization-scoped
//! escalation rules whose actions reassign, re-prioritize, or notify. It is
//! an in-process library: the surrounding ticket-management code calls
//! [`engine::SlaEngine::run_ticket_checks`] on every ticket create/update.
//!
//! Collaborator stores are trait seams ([`store`]); [`db::Database`] is the
//! bundled SQLite implementation of all of them.

pub mod calendar;
pub mod db;
pub mod engine;
pub mod escalation;
pub mod models;
pub mod store;
pub mod violations;
