//! Protocol implementations.
//!
//! - `echo`: tagged echo served by every readiness strategy

pub mod echo;
