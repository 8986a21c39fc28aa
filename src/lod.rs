use crate::{NodeKey, Point};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Fraction of points an internal node keeps as its level-of-detail summary,
/// unless the caller chooses another.
pub const DEFAULT_SAMPLE_FRACTION: f64 = 0.125;

/// Deterministic random subsampler for level-of-detail point sets.
///
/// Every draw uses a generator seeded from the tree seed and the node key,
/// never process-wide randomness. The same seed, node, and inputs therefore
/// always keep the same points, which is what makes LOD content reproducible
/// across runs and testable at all.
#[derive(Debug, Clone)]
pub struct LodSampler {
    seed: u64,
    fraction: f64,
}

impl LodSampler {
    pub fn new(seed: u64, fraction: f64) -> Self {
        assert!(
            fraction > 0.0 && fraction <= 1.0,
            "sample fraction must be in (0, 1]"
        );
        Self { seed, fraction }
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    fn node_rng(&self, key: NodeKey) -> ChaCha8Rng {
        // splitmix-style mix so sibling keys don't produce correlated streams
        let mut x = self.seed ^ key.raw().wrapping_mul(0x9E37_79B9_7F4A_7C15);
        x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        ChaCha8Rng::seed_from_u64(x ^ (x >> 31))
    }

    /// Proportional subsample of the concatenated input sets, evaluated in
    /// input order. Used when rebuilding a node's summary from its children.
    pub fn sample<P: Point>(&self, key: NodeKey, sets: &[&[P]]) -> Vec<P> {
        let total: usize = sets.iter().map(|s| s.len()).sum();
        let mut rng = self.node_rng(key);
        let mut out = Vec::with_capacity((total as f64 * self.fraction).ceil() as usize);
        for set in sets {
            for point in *set {
                if rng.random::<f64>() < self.fraction {
                    out.push(*point);
                }
            }
        }
        out
    }

    /// Subsample of one fresh batch, for the incremental insert path where
    /// the result is appended to a node's existing summary.
    pub fn subsample<P: Point>(&self, key: NodeKey, fresh: &[P]) -> Vec<P> {
        self.sample(key, &[fresh])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PointXyz;

    fn points(n: usize) -> Vec<PointXyz> {
        (0..n)
            .map(|i| PointXyz::new(i as f64, 0.0, 0.0))
            .collect()
    }

    #[test]
    fn same_seed_same_sample() {
        let a = LodSampler::new(42, 0.25);
        let b = LodSampler::new(42, 0.25);
        let input = points(1000);
        let key = NodeKey::root().child(3);
        assert_eq!(a.sample(key, &[&input]), b.sample(key, &[&input]));
    }

    #[test]
    fn different_seeds_diverge() {
        let a = LodSampler::new(1, 0.5);
        let b = LodSampler::new(2, 0.5);
        let input = points(1000);
        let key = NodeKey::root();
        assert_ne!(a.sample(key, &[&input]), b.sample(key, &[&input]));
    }

    #[test]
    fn sample_size_tracks_fraction() {
        let sampler = LodSampler::new(7, 0.125);
        let input = points(16_000);
        let sample = sampler.sample(NodeKey::root(), &[&input]);
        let expected = 16_000.0 * 0.125;
        // Loose bound: Bernoulli draws, not an exact count
        assert!((sample.len() as f64) > expected * 0.7);
        assert!((sample.len() as f64) < expected * 1.3);
    }

    #[test]
    fn draws_proportionally_from_all_sets() {
        let sampler = LodSampler::new(11, 0.5);
        let low = points(4000);
        let high: Vec<PointXyz> = (0..4000)
            .map(|i| PointXyz::new(i as f64, 100.0, 0.0))
            .collect();
        let sample = sampler.sample(NodeKey::root(), &[&low, &high]);
        let from_low = sample.iter().filter(|p| p.y == 0.0).count();
        let from_high = sample.len() - from_low;
        assert!(from_low > 0 && from_high > 0);
        let ratio = from_low as f64 / from_high as f64;
        assert!(ratio > 0.7 && ratio < 1.3, "skewed ratio {ratio}");
    }
}
