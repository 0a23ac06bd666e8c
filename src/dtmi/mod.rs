//! DTMI binary value model
//!
//! This module provides:
//! - The in-memory tagged value tree ([`DtmiValue`])
//! - The canonical encoder/decoder ([`codec`])
//! - A zero-copy, allocation-free reader over encoded bytes ([`Scan`])
//!
//! The tree codec and the scan reader follow the identical byte layout, so
//! a buffer produced by one is always readable by the other.

pub mod codec;
pub mod scan;
pub mod value;

pub use codec::{decode, encode, DtmiEncoder};
pub use scan::Scan;
pub use value::DtmiValue;
