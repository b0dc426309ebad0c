//! Value types shared across the crate.

mod hashrate;

pub use hashrate::{HashRateUnit, TeraHashes, normalize, parse_hashrate};
