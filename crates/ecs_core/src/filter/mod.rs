//! Declarative filter groups and the evaluator that resolves them to
//! sorted entity lists (spec.md §3, §4.2).

pub mod evaluator;
pub mod group;

pub use evaluator::FilterEvaluator;
pub use group::{FilterGroupBuilder, FilterGroupKey, OnCondition, OrderBy};
