//! # Engine Module
//!
//! This module contains the stateful orchestration layer of CladeML: the
//! lockstep execution grid, the durable checkpoint state, and the search
//! algorithms that drive maximum-likelihood inference.
//!
//! ## Overview
//!
//! The engine executes one search program on every unit of a flat execution
//! grid. Units diverge only in which alignment slices they evaluate; every
//! control-flow decision is taken on grid-wide reduced values, so all units
//! walk the same sequence of trees, rounds, and parameter updates. One
//! designated unit additionally persists progress, and a run interrupted at
//! any point resumes from its last durable record.
//!
//! ## Architecture
//!
//! - **Execution Grid** ([`parallel`]) - Thread spawning, poisonable barriers, and
//!   deterministic sum reductions across threads and ranks
//! - **Durable State** ([`checkpoint`]) - Atomic, versioned on-disk run records
//! - **Likelihood Kernels** ([`kernel`]) - The numerical seam between search control
//!   and per-column likelihood evaluation
//! - **Search Control** (`optimizer`, `tasks`) - The staged tree-search state machine
//!   and the data-parallel work it schedules
//! - **Run Plumbing** ([`config`], [`progress`], [`error`]) - Validated configuration,
//!   progress callbacks, and the engine-wide error type
//!
//! ## Key Capabilities
//!
//! - **Bit-identical reductions** on every unit, independent of thread timing
//! - **Deadlock-free failure paths** through barrier poisoning
//! - **Crash-safe persistence** with atomic replace-on-flush semantics
//! - **Mid-search resume** that skips completed trees and re-enters interrupted ones

pub(crate) mod context;
pub(crate) mod optimizer;
pub(crate) mod tasks;

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod kernel;
pub mod parallel;
pub mod progress;
