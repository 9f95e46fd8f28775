#![doc = include_str!("../../../README.md")]
//!

//! This crate re-exports the storage engines, header codec, global metadata
//! registry and fit configuration types of `labstore-core`.

pub use labstore_core::*;
