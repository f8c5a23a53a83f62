//! # I/O Module
//!
//! Readers for external sequence data, kept free of any engine state.
//!
//! - **FASTA** ([`fasta`]) - Aligned nucleotide sequences with IUPAC ambiguity codes

pub mod fasta;
