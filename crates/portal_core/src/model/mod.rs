//! Storage-agnostic record types for alerts and expressions.
//!
//! # Responsibility
//! - Define the in-memory shapes handed to and returned by repositories.
//! - Own the translation between the extension map and its side-record.
//!
//! # Invariants
//! - Every record is identified by a stable `Uuid` that never changes after
//!   creation.
//! - Storage shape (blobs, joined tables, audit columns) never leaks into
//!   these types.

pub mod alert;
pub mod expression;
pub mod extension;
pub mod period;
