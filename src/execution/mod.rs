//! Execution Module
//!
//! Destination planning ([`resolver`]) and the apply phase that performs the
//! planned moves ([`mover`]).

pub mod mover;
pub mod resolver;

pub use mover::*;
pub use resolver::*;
