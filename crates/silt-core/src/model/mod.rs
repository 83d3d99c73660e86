//! Closed domain vocabulary and row types for the derived-state store.

pub mod kind;
pub mod records;
