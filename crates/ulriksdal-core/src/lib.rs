#![forbid(unsafe_code)]

//! Shared error taxonomy and constants for the Ulriksdal XML-DSig
//! reference verification engine.

pub mod algorithm;
pub mod error;
pub mod ns;

pub use error::{Error, FailedReference, Result};
