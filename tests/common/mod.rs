//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestSession, GUARDIAN_ID};
//! use showtracker_engine::ListKind;
//!
//! #[tokio::test]
//! async fn test_add_title() {
//!     let session = TestSession::spawn().await;
//!     session.add_to_list(GUARDIAN_ID, ListKind::Watching, Some(16)).await.unwrap();
//! }
//! ```

mod constants;
mod fixtures;
mod harness;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{create_test_catalog, write_test_catalog_json};
#[allow(unused_imports)]
pub use harness::{fast_config, FlakyStore, TestSession};
