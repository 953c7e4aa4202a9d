//! # bindsync Testkit
//!
//! Test utilities for bindsync.
//!
//! This crate provides:
//! - A two-model fixture (`product.category` → `product.product`) wired to
//!   in-memory stores, adapters, a manual clock and a job queue
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bindsync_testkit::prelude::*;
//!
//! #[test]
//! fn exports_a_product() {
//!     let fx = Fixture::new();
//!     let categ = fx.seed_category("Saleable");
//!     let product = fx.seed_product("Chair", Some(categ));
//!     let binding = fx.placeholder(&product_model(), product);
//!     fx.conn.export_record(&product_model(), binding.id, None).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
