//! Object storage core for Mediark.
//!
//! This crate contains the storage abstraction layer with ZERO web or
//! database dependencies. Upload handlers ask it for keys and transfer
//! URLs; everything else (routing, metadata persistence, rendering) lives
//! in the surrounding application.
//!
//! # Modules
//!
//! - `storage` - Key generation, local/remote object stores, the storage
//!   facade, and operation metrics

pub mod storage;
