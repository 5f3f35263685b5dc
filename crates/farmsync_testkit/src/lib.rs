//! # farmsync testkit
//!
//! Test utilities for farmsync.
//!
//! This crate provides:
//! - Store and orchestrator fixtures, in memory or on a temporary file
//! - Payload builders for the synchronized kinds
//! - Property-based generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use farmsync_testkit::prelude::*;
//!
//! #[test]
//! fn pushes_a_section() {
//!     let fixture = TestSync::memory();
//!     let response = fixture.sync(&payloads::gestation_request()).unwrap();
//!     assert_eq!(response.rows("sections").len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod payloads;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::payloads;
}

pub use fixtures::*;
pub use generators::*;
