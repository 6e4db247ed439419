//! Bounded parallel background work for a single agent identity.

pub mod appendage;
pub mod config;
pub mod error;
pub mod identity;
