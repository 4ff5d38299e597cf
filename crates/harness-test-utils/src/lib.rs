//! # Harness Test Utilities
//!
//! Mock implementations of the `env-harness` seams, so sessions and gates can
//! be tested without Docker or a live stack.
//!
//! ## Modules
//!
//! - `mock_probe` - Scripted probe that records every call with its time
//! - `mock_provisioner` - Provisioner that counts live resources and teardowns
//! - `fixtures` - Canned steps
//!
//! ## Usage
//!
//! ```rust,ignore
//! use harness_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let probe = MockProbe::builder()
//!         .fail_times("http://consul/ready", 2)
//!         .build();
//!     let provisioner = MockProvisioner::builder().resources(3).build();
//!
//!     // Run a session against the mocks...
//!
//!     assert_eq!(provisioner.live_resources(), 0);
//! }
//! ```

pub mod fixtures;
pub mod mock_probe;
pub mod mock_provisioner;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_probe::*;
pub use mock_provisioner::*;
