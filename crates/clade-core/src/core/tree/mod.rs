//! # Tree Module
//!
//! Arena-backed phylogenetic tree structures and the operations the search
//! engine performs on them.
//!
//! - **Topologies** ([`topology`]) - Strictly bifurcating trees over taxon indices,
//!   with prune-and-regraft surgery and canonical node ordering
//! - **Newick Text** ([`newick`]) - Parsing for the serialized tree format
//! - **Construction** ([`build`]) - Randomized stepwise-addition starting trees

pub mod build;
pub mod newick;
pub mod topology;
