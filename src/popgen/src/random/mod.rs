//! Seeded pseudo-random source threaded explicitly through every MCMC
//! proposal. There is no global or thread-local RNG in this crate: every
//! caller that needs randomness takes a `&mut RandomSource` argument, the
//! same way the original C++ implementation always takes an explicit
//! `RandomNumberGenerator &rng`.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Beta as BetaDist, Distribution, Gamma as GammaDist};

/// Wraps a deterministic PRNG stream (`ChaCha8Rng`) with the sampling
/// primitives the tree model and MCMC operators need: uniforms, gamma/beta
/// draws, and the combinatorial set-partition / subset samplers used by the
/// trans-dimensional tree moves.
pub struct RandomSource {
    rng: ChaCha8Rng,
}

impl RandomSource {
    pub fn seeded(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    pub fn from_entropy() -> Self {
        Self { rng: ChaCha8Rng::from_entropy() }
    }

    pub fn uniform_real(&mut self, lo: f64, hi: f64) -> f64 {
        if lo == hi {
            return lo;
        }
        self.rng.gen_range(lo..hi)
    }

    pub fn uniform_unit(&mut self) -> f64 {
        self.rng.gen_range(0.0..1.0)
    }

    /// Uniform integer in `[lo, hi]` inclusive.
    pub fn uniform_int(&mut self, lo: i64, hi: i64) -> i64 {
        self.rng.gen_range(lo..=hi)
    }

    /// Uniform integer in `[0, hi]` inclusive — the common case used for
    /// indexing into a `Vec` of length `hi + 1`.
    pub fn uniform_positive_int(&mut self, hi: usize) -> usize {
        self.rng.gen_range(0..=hi)
    }

    pub fn bernoulli(&mut self, p: f64) -> bool {
        self.rng.gen_bool(p.clamp(0.0, 1.0))
    }

    pub fn gamma(&mut self, shape: f64, scale: f64) -> f64 {
        GammaDist::new(shape, scale)
            .expect("gamma shape/scale must be positive")
            .sample(&mut self.rng)
    }

    pub fn beta(&mut self, alpha: f64, beta: f64) -> f64 {
        BetaDist::new(alpha, beta)
            .expect("beta alpha/beta must be positive")
            .sample(&mut self.rng)
    }

    /// Symmetric Dirichlet-style draw via independently-sampled, normalized
    /// gammas: `x_i ~ Gamma(alpha_i, 1)`, returned as `x_i / sum(x)`.
    pub fn dirichlet(&mut self, alphas: &[f64]) -> Vec<f64> {
        let draws: Vec<f64> = alphas.iter().map(|&a| self.gamma(a, 1.0)).collect();
        let total: f64 = draws.iter().sum();
        draws.into_iter().map(|x| x / total).collect()
    }

    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        use rand::seq::SliceRandom;
        slice.shuffle(&mut self.rng);
    }

    /// Uniformly sample `size` distinct indices from `0..n` without
    /// replacement (a partial Fisher-Yates draw).
    pub fn random_subset(&mut self, n: usize, size: usize) -> Vec<usize> {
        let mut pool: Vec<usize> = (0..n).collect();
        self.shuffle(&mut pool);
        pool.truncate(size);
        pool
    }

    /// A uniformly-sampled set partition of `{0, .., n-1}`, returned as a
    /// vector of (unordered) blocks. Uses the classic Stirling-number
    /// recursion: process elements in order, at each step choosing to join
    /// one of the `k` existing blocks or start a new one, weighted so every
    /// partition of `n` elements is equally likely.
    pub fn random_set_partition_as_subsets(&mut self, n: usize) -> Vec<Vec<usize>> {
        if n == 0 {
            return Vec::new();
        }
        let stirling = stirling2_table(n);
        let mut blocks: Vec<Vec<usize>> = Vec::new();
        for i in 0..n {
            let remaining = n - i - 1;
            let k = blocks.len();
            // Weight of joining any one of the k existing blocks, vs. of
            // starting a brand new (k+1)-th block.
            let join_weight = stirling[remaining][k] as f64;
            let new_weight = stirling[remaining][k + 1] as f64;
            let total = (k as f64) * join_weight + new_weight;
            let draw = self.uniform_real(0.0, total);
            if draw < new_weight || k == 0 {
                blocks.push(vec![i]);
            } else {
                let slot = ((draw - new_weight) / join_weight.max(f64::MIN_POSITIVE)).floor() as usize;
                blocks[slot.min(k - 1)].push(i);
            }
        }
        blocks
    }

    /// Like [`Self::random_set_partition_as_subsets`], but rejects draws
    /// whose number of blocks is not in `allowed_block_counts`. Bounded by
    /// `max_attempts`; callers that need a guaranteed result on small `n`
    /// should pick a generous bound (the expected number of attempts is
    /// small whenever the allowed counts cover a non-trivial fraction of the
    /// Bell number's mass, which holds for every use in this crate).
    pub fn restricted_random_set_partition_as_subsets(
        &mut self,
        n: usize,
        allowed_block_counts: &[usize],
    ) -> Vec<Vec<usize>> {
        loop {
            let candidate = self.random_set_partition_as_subsets(n);
            if allowed_block_counts.contains(&candidate.len()) {
                return candidate;
            }
        }
    }

    /// A uniform partition of `{0, .., n-1}` into exactly `k` non-empty
    /// subsets.
    pub fn random_subsets(&mut self, n: usize, k: usize) -> Vec<Vec<usize>> {
        self.restricted_random_set_partition_as_subsets(n, &[k])
    }
}

/// `table[i][j]` = Stirling number of the second kind S(i, j): the number of
/// ways to partition `i` labeled elements into exactly `j` non-empty,
/// unlabeled blocks.
fn stirling2_table(n: usize) -> Vec<Vec<u128>> {
    let mut table = vec![vec![0u128; n + 2]; n + 1];
    table[0][0] = 1;
    for i in 1..=n {
        for j in 1..=(i + 1).min(n + 1) {
            table[i][j] = (j as u128) * table[i - 1][j] + table[i - 1][j - 1];
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_streams_are_reproducible() {
        let mut a = RandomSource::seeded(42);
        let mut b = RandomSource::seeded(42);
        for _ in 0..10 {
            assert_eq!(a.uniform_real(0.0, 1.0), b.uniform_real(0.0, 1.0));
        }
    }

    #[test]
    fn partitions_cover_the_full_element_set() {
        let mut rng = RandomSource::seeded(7);
        for _ in 0..50 {
            let blocks = rng.random_set_partition_as_subsets(6);
            let mut seen: Vec<usize> = blocks.into_iter().flatten().collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..6).collect::<Vec<_>>());
        }
    }

    #[test]
    fn restricted_partition_respects_allowed_block_counts() {
        let mut rng = RandomSource::seeded(11);
        for _ in 0..50 {
            let blocks = rng.restricted_random_set_partition_as_subsets(5, &[1, 2]);
            assert!(blocks.len() == 1 || blocks.len() == 2);
        }
    }

    #[test]
    fn random_subsets_partitions_into_exactly_k_blocks() {
        let mut rng = RandomSource::seeded(99);
        let blocks = rng.random_subsets(5, 2);
        assert_eq!(blocks.len(), 2);
        let total: usize = blocks.iter().map(Vec::len).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn gamma_mean_converges() {
        let mut rng = RandomSource::seeded(3);
        let shape = 4.0;
        let scale = 2.0;
        let n = 20_000;
        let sum: f64 = (0..n).map(|_| rng.gamma(shape, scale)).sum();
        let mean = sum / n as f64;
        assert!((mean - shape * scale).abs() / (shape * scale) < 0.05);
    }
}
