//! Wire and domain types shared by the rally crates.

pub mod api;
pub mod events;
pub mod models;
