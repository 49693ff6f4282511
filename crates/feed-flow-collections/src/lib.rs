//! Feed-Flow Collections: immutable collection algebra used by feed-flow.
//!
//! This crate has no async or engine dependencies. It provides:
//!
//! - [`SelectionInfo`]: a canonical set of disjoint, non-adjacent index ranges
//!   with add/remove/contains operations.
//! - [`DifferentialList`]: a persistent list that can compute a positional
//!   edit script ([`ListChange`]) between two snapshots.

mod differential;
mod selection;

pub use differential::{ApplyError, DifferentialList, ListChange};
pub use selection::{SelectionIndexRange, SelectionInfo};
