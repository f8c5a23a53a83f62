use super::topology::{Topology, TreeError};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::Rng;

pub const DEFAULT_BRANCH: f64 = 0.1;

/// Builds a random starting topology by stepwise addition: taxa are shuffled,
/// then each is attached to a uniformly chosen edge of the growing tree.
///
/// Edges are drawn in canonical order, so a given generator state always
/// produces the same tree regardless of arena layout.
pub fn random_topology(taxon_count: usize, rng: &mut SmallRng) -> Result<Topology, TreeError> {
    if taxon_count < 2 {
        return Err(TreeError::TooFewTaxa {
            required: 2,
            actual: taxon_count,
        });
    }
    let mut order: Vec<usize> = (0..taxon_count).collect();
    order.shuffle(rng);

    let mut tree = Topology::two_taxon(order[0], order[1], DEFAULT_BRANCH * 2.0);
    for &taxon in &order[2..] {
        let edges = tree.branch_nodes();
        let below = edges[rng.gen_range(0..edges.len())];
        tree.attach_tip(taxon, below, DEFAULT_BRANCH)?;
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn random_topology_covers_every_taxon_exactly_once() {
        let mut rng = SmallRng::seed_from_u64(11);
        let tree = random_topology(8, &mut rng).unwrap();

        let mut tips: Vec<usize> = tree
            .postorder()
            .into_iter()
            .filter_map(|id| tree.node(id).tip())
            .collect();
        tips.sort_unstable();
        assert_eq!(tips, (0..8).collect::<Vec<_>>());
        assert_eq!(tree.len(), 2 * 8 - 1);
    }

    #[test]
    fn random_topology_is_deterministic_per_seed() {
        let first = random_topology(10, &mut SmallRng::seed_from_u64(5)).unwrap();
        let second = random_topology(10, &mut SmallRng::seed_from_u64(5)).unwrap();
        let other = random_topology(10, &mut SmallRng::seed_from_u64(6)).unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn random_topology_requires_two_taxa() {
        let mut rng = SmallRng::seed_from_u64(1);

        assert_eq!(
            random_topology(1, &mut rng),
            Err(TreeError::TooFewTaxa {
                required: 2,
                actual: 1,
            })
        );
    }
}
