//! # CladeML Core Library
//!
//! A high-performance library for maximum-likelihood phylogenetic tree inference,
//! built around deterministic data-parallel execution and crash-safe checkpointing.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict three-layer architecture to ensure a clear separation of concerns,
//! making it modular, testable, and extensible.
//!
//! - **[`core`]: The Foundation.** Contains stateless data models (`PartitionTable`, `Topology`),
//!   the work-distribution machinery (`LoadBalancer`, `WorkPlan`), and I/O utilities.
//!
//! - **[`engine`]: The Logic Core.** This stateful layer orchestrates the inference process.
//!   It includes the lockstep execution grid (`ParallelContext`), the durable run state
//!   (`CheckpointManager`), the likelihood kernel abstraction, and the implementation of
//!   the tree-search algorithms.
//!
//! - **[`workflows`]: The Public API.** This is the highest-level, user-facing layer. It ties the
//!   `engine` and `core` together to execute complete inference runs, from alignment to
//!   final tree set. It provides a simple and powerful entry point for end-users of the library.

pub mod core;
pub mod engine;
pub mod workflows;
