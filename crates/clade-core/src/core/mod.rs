//! # Core Module
//!
//! This module provides the fundamental building blocks for phylogenetic inference in
//! CladeML, serving as the stateless foundation of the library.
//!
//! ## Overview
//!
//! The core module implements the data structures and pure algorithms that the engine
//! layer coordinates: encoded multiple sequence alignments, unrooted tree topologies,
//! and the partition-aware work-distribution planner that slices alignment columns
//! across execution units.
//!
//! ## Architecture
//!
//! The module is organized into specialized submodules that handle different aspects
//! of the problem domain:
//!
//! - **Alignment Representation** ([`alignment`]) - Encoded character matrices, partition
//!   tables, and per-column weight vectors for bootstrap resampling
//! - **Work Distribution** ([`balance`], [`plan`]) - Deterministic partition slicing across
//!   a flat pool of execution units
//! - **Tree Topologies** ([`tree`]) - Arena-backed tree structures, subtree-regrafting
//!   surgery, and Newick serialization
//! - **File I/O** ([`io`]) - Reading sequence data from standard formats
//!
//! ## Key Capabilities
//!
//! - **Compact alignment storage** with bitmask state encoding and ambiguity support
//! - **Balanced work plans** whose worst-case unit load is provably near-optimal
//! - **Weight-compressed planning** that skips resampled-out columns while preserving
//!   original column coordinates
//! - **Deterministic tree enumeration** stable across process restarts

pub mod alignment;
pub mod balance;
pub mod io;
pub mod plan;
pub mod tree;
