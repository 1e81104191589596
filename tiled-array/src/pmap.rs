//! Tile ownership maps.

use tiled_runtime::Rank;

/// A deterministic tile-ordinal → owner-rank function.
///
/// Implementations must be pure and stable for the lifetime of any
/// evaluator using them; every rank must compute the same owner for every
/// ordinal.
pub trait ProcessMap: Send + Sync {
    fn owner(&self, ordinal: usize) -> Rank;

    /// Ordinals owned by `rank` within a grid of `ntiles`, ascending.
    fn local_ordinals(&self, rank: Rank, ntiles: usize) -> Vec<usize> {
        (0..ntiles).filter(|&i| self.owner(i) == rank).collect()
    }
}

/// Round-robin distribution of tile ordinals over ranks; the default map.
#[derive(Debug, Clone)]
pub struct CyclicMap {
    size: usize,
}

impl CyclicMap {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "process map over an empty world");
        Self { size }
    }
}

impl ProcessMap for CyclicMap {
    fn owner(&self, ordinal: usize) -> Rank {
        ordinal % self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyclic_round_robin() {
        let map = CyclicMap::new(3);
        assert_eq!(map.owner(0), 0);
        assert_eq!(map.owner(4), 1);
        assert_eq!(map.owner(11), 2);
    }

    #[test]
    fn local_ordinals_partition_the_grid() {
        let map = CyclicMap::new(3);
        let mut all: Vec<usize> = Vec::new();
        for rank in 0..3 {
            let local = map.local_ordinals(rank, 10);
            for &i in &local {
                assert_eq!(map.owner(i), rank);
            }
            all.extend(local);
        }
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn single_rank_owns_everything() {
        let map = CyclicMap::new(1);
        assert_eq!(map.local_ordinals(0, 5).len(), 5);
    }
}
