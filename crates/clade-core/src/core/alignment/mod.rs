//! # Alignment Module
//!
//! This module represents multiple sequence alignments in the compact, encoded form the
//! likelihood kernel consumes.
//!
//! ## Overview
//!
//! Sequence characters are encoded as 4-bit state masks so that ambiguity codes and gaps
//! marginalize naturally during likelihood evaluation. Columns are grouped into named
//! partitions, each evolving under its own substitution model, and every partition carries
//! a per-column weight vector that bootstrap resampling rewrites between replicates.
//!
//! - **State Encoding** ([`encoding`]) - Nucleotide and ambiguity-code bitmasks
//! - **Partition Tables** ([`partition`]) - Encoded character matrices grouped by partition
//! - **Column Weights** ([`weights`]) - Unit and bootstrap-resampled weight vectors

pub mod encoding;
pub mod partition;
pub mod weights;
