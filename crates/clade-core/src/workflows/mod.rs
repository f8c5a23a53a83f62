//! # Workflows Module
//!
//! This module provides high-level workflow implementations that orchestrate complete
//! maximum-likelihood inference runs for CladeML.
//!
//! ## Overview
//!
//! Workflows are the top-level entry points for users of CladeML. They encapsulate
//! the entire inference pipeline, from input validation through work distribution,
//! grid execution, and result collection. Each workflow handles checkpoint lifecycle,
//! progress reporting, and error propagation, providing a clean and simple API for
//! long-running analyses.
//!
//! ## Architecture
//!
//! The module is organized around specific inference workflows:
//!
//! - **Search Workflow** ([`search`]) - Complete tree inference including
//!   maximum-likelihood searches from multiple starting trees and optional
//!   bootstrap replication, with mid-run resume.
//!
//! ## Key Capabilities
//!
//! - **End-to-end inference** from partition table to final tree set
//! - **Deterministic parallelism** over a process-by-thread execution grid
//! - **Crash-safe progress** with automatic resume from the last checkpoint
//! - **Progress monitoring** with detailed phase and per-tree reporting
//! - **Error handling** with comprehensive diagnostic information

pub mod search;
