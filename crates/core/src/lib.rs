//! Shared types, error kinds, and the cloud client contract used across the
//! aquarium-aws driver crates.

pub mod client;
pub mod error;
pub mod helpers;
pub mod types;

pub use client::CloudClient;
pub use error::{Error, Result};
pub use helpers::{aws_last_year_filter_values, type_matches};
pub use types::{
    pool_tag_key, DedicatedPoolRecord, Definition, DiskSpec, Host, HostState, QuotaBucket,
    UserDataFormat, MAC_RELEASE_DELAY_FLOOR,
};
