//! Score reduction.
//!
//! Turns the per-criterion entries produced by the rubric mapper into
//! subtotals and a total.

pub mod totaler;

pub use totaler::*;
