//! Domain models for GeoShare.
//!
//! These are the core types shared across all crates.

pub mod api_key;
pub mod data_index;
pub mod dataset;
pub mod group;
pub mod identity;
pub mod origin;
pub mod permission;
pub mod thing;
pub mod user;
