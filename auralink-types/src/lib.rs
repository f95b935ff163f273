//! # auralink-types
//!
//! Core types for the auralink telemetry dashboard. These are shared
//! between the connection layer, the history aggregator and whatever
//! presentation layer reads dashboard snapshots.
//!
//! ## Features
//!
//! - `std` (default): Standard library support
//! - `serde`: serialization via serde, used for snapshots and the
//!   session marker stored in the shared key-value store
//!
//! ## Example
//!
//! ```rust
//! use auralink_types::{ConnectionState, DisconnectReason, SensorKey};
//!
//! let state = ConnectionState::Disconnected(DisconnectReason::Offline);
//! assert!(!state.is_connected());
//! assert_eq!(state.to_string(), "Offline");
//!
//! assert_eq!(SensorKey::ALL.len(), 3);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod lease;
mod sensor;
mod state;

pub use lease::*;
pub use sensor::*;
pub use state::*;
