//! Compilers from filter ASTs to backend forms.
//!
//! - [`SqlCompiler`]: parameterized SQL predicates for the query/get paths
//! - [`DescriptorCompiler`]: `search_parm` clauses for hybrid search
//!
//! Both walk the same [`FilterNode`](crate::filter::FilterNode) tree and agree
//! on its meaning; they differ only in output shape.

mod descriptor;
mod sql;

pub use descriptor::{DescriptorCompiler, FieldStyle, SearchClause};
pub use sql::{CompiledPredicate, SqlCompiler, SqlValue, combine_predicates, escape_like_pattern};
