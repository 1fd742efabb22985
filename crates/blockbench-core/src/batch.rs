use rand::seq::index;
use rand::Rng;

use crate::address::ContentAddress;

/// A random, duplicate-free subset of the address universe fetched in one
/// trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchBatch {
    addresses: Vec<ContentAddress>,
}

impl FetchBatch {
    /// Draws a size uniformly from `1..=universe.len()`, then samples that many
    /// addresses without replacement. Returns `None` for an empty universe.
    pub fn draw<R: Rng + ?Sized>(universe: &[ContentAddress], rng: &mut R) -> Option<Self> {
        if universe.is_empty() {
            return None;
        }
        let size = rng.gen_range(1..=universe.len());
        Some(Self::draw_sized(universe, size, rng))
    }

    /// Samples exactly `size` addresses (clamped to the universe).
    pub fn draw_sized<R: Rng + ?Sized>(
        universe: &[ContentAddress],
        size: usize,
        rng: &mut R,
    ) -> Self {
        let size = size.min(universe.len());
        let addresses = index::sample(rng, universe.len(), size)
            .into_iter()
            .map(|i| universe[i].clone())
            .collect();
        Self { addresses }
    }

    /// Wraps an explicit list, keeping the first occurrence of duplicates.
    pub fn from_addresses(addresses: Vec<ContentAddress>) -> Self {
        let mut unique: Vec<ContentAddress> = Vec::with_capacity(addresses.len());
        for addr in addresses {
            if !unique.contains(&addr) {
                unique.push(addr);
            }
        }
        Self { addresses: unique }
    }

    pub fn addresses(&self) -> &[ContentAddress] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Codec, Multihash};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn universe(n: usize) -> Vec<ContentAddress> {
        (0..n)
            .map(|i| ContentAddress::new(Codec::DagPb, Multihash::sha2_256(&[i as u8])))
            .collect()
    }

    #[test]
    fn test_empty_universe_draws_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(FetchBatch::draw(&[], &mut rng).is_none());
    }

    #[test]
    fn test_batches_are_nonempty_unique_subsets() {
        let universe = universe(12);
        let mut rng = StdRng::seed_from_u64(7);
        let mut sizes = HashSet::new();

        for _ in 0..500 {
            let batch = FetchBatch::draw(&universe, &mut rng).unwrap();
            assert!((1..=universe.len()).contains(&batch.len()));

            let distinct: HashSet<_> = batch.addresses().iter().collect();
            assert_eq!(distinct.len(), batch.len());
            assert!(batch.addresses().iter().all(|a| universe.contains(a)));
            sizes.insert(batch.len());
        }

        // 500 uniform draws over 12 sizes hit every size
        assert_eq!(sizes.len(), 12);
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let universe = universe(12);
        let a = FetchBatch::draw(&universe, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = FetchBatch::draw(&universe, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_address_universe() {
        let universe = universe(1);
        let mut rng = StdRng::seed_from_u64(3);
        let batch = FetchBatch::draw(&universe, &mut rng).unwrap();
        assert_eq!(batch.addresses(), universe.as_slice());
    }

    #[test]
    fn test_draw_sized_clamps() {
        let universe = universe(4);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(FetchBatch::draw_sized(&universe, 10, &mut rng).len(), 4);
        assert_eq!(FetchBatch::draw_sized(&universe, 2, &mut rng).len(), 2);
    }

    #[test]
    fn test_from_addresses_dedups() {
        let universe = universe(3);
        let batch = FetchBatch::from_addresses(vec![
            universe[0].clone(),
            universe[1].clone(),
            universe[0].clone(),
        ]);
        assert_eq!(batch.len(), 2);
    }
}
