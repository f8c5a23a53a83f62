use super::partition::PartitionTable;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub type SiteWeights = Vec<Vec<u32>>;

pub(crate) const STREAM_TEMPLATE: u64 = 0;
pub(crate) const STREAM_ML_TREE: u64 = 1;
pub(crate) const STREAM_BOOTSTRAP_WEIGHTS: u64 = 2;
pub(crate) const STREAM_BOOTSTRAP_TREE: u64 = 3;

// splitmix64 finalizer; (seed, stream, index) triples map to independent
// generator states so resume never replays or skips a stream.
pub(crate) fn derive_seed(seed: u64, stream: u64, index: u64) -> u64 {
    let mut z = seed
        ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ index.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

pub fn unit_weights(table: &PartitionTable) -> SiteWeights {
    table
        .partitions()
        .iter()
        .map(|p| vec![1; p.length()])
        .collect()
}

pub fn bootstrap_weights(table: &PartitionTable, seed: u64, replicate: usize) -> SiteWeights {
    let mut rng = SmallRng::seed_from_u64(derive_seed(
        seed,
        STREAM_BOOTSTRAP_WEIGHTS,
        replicate as u64,
    ));
    table
        .partitions()
        .iter()
        .map(|p| {
            let length = p.length();
            let mut weights = vec![0u32; length];
            for _ in 0..length {
                weights[rng.gen_range(0..length)] += 1;
            }
            weights
        })
        .collect()
}

pub fn nonzero_positions(weights: &[u32]) -> Vec<usize> {
    weights
        .iter()
        .enumerate()
        .filter(|&(_, &w)| w > 0)
        .map(|(i, _)| i)
        .collect()
}
