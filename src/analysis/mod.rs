//! Report aggregation.
//!
//! Summary statistics, top issues, remediation and category correlations
//! computed over merged verdicts.

pub mod aggregator;

pub use aggregator::*;
