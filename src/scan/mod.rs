//! Scan/classify pipeline
//!
//! [`ScanEngine`] owns the loop, [`ScanSession`] the resumable traversal
//! state, and [`model`] the row and record types shown to the host.

pub mod engine;
pub mod events;
pub mod model;
pub mod session;


pub use engine::*;
pub use events::*;
pub use model::*;
pub use session::*;
