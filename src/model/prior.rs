use crate::common::*;

/// The half of a training step a latent draw is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Discriminator,
    Generator,
    Sampling,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Discriminator, Phase::Generator, Phase::Sampling];

    fn index(self) -> i64 {
        match self {
            Phase::Discriminator => 0,
            Phase::Generator => 1,
            Phase::Sampling => 2,
        }
    }
}

/// Source of prior latent vectors.
pub trait LatentPrior {
    fn draw(&mut self, phase: Phase, batch_size: i64, latent_dim: i64, device: Device) -> Tensor;
}

/// Draws from the standard normal using the global generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardNormal;

impl LatentPrior for StandardNormal {
    fn draw(&mut self, _phase: Phase, batch_size: i64, latent_dim: i64, device: Device) -> Tensor {
        Tensor::randn(&[batch_size, latent_dim], (Kind::Float, device))
    }
}

/// Standard normal draws that are reproducible per phase.
///
/// Every phase owns a seed and a counter. The `n`-th draw of a phase reseeds
/// the global generator with `3 * (seed + n) + phase_index`, so the sequence
/// of one phase does not depend on how many draws the other phases made, and
/// two phases never reseed with the same value whatever their seeds are.
#[derive(Debug, Clone)]
pub struct SeededNormal {
    seeds: HashMap<Phase, i64>,
    counters: HashMap<Phase, i64>,
}

impl SeededNormal {
    pub fn new(discriminator_seed: i64, generator_seed: i64, sampling_seed: i64) -> Self {
        let seeds = [
            (Phase::Discriminator, discriminator_seed),
            (Phase::Generator, generator_seed),
            (Phase::Sampling, sampling_seed),
        ]
        .iter()
        .cloned()
        .collect();

        Self {
            seeds,
            counters: HashMap::new(),
        }
    }
}

impl LatentPrior for SeededNormal {
    fn draw(&mut self, phase: Phase, batch_size: i64, latent_dim: i64, device: Device) -> Tensor {
        let counter = self.counters.entry(phase).or_insert(0);
        let seed = draw_seed(phase, self.seeds[&phase], *counter);
        *counter += 1;

        tch::manual_seed(seed);
        Tensor::randn(&[batch_size, latent_dim], (Kind::Float, device))
    }
}

/// Generator seed of the `counter`-th draw of `phase`.
///
/// Distinct phases land in distinct residue classes modulo 3, and draws of
/// one phase are distinct for distinct counters.
fn draw_seed(phase: Phase, seed: i64, counter: i64) -> i64 {
    seed.wrapping_add(counter).rem_euclid(i64::MAX / 3) * 3 + phase.index()
}
