use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::f32::consts::PI;

use crate::engine::error::{ConvError, Result};

use super::tensor_desc::TensorDesc;

// Fills are always seeded so two runs produce the same buffers
#[derive(Clone, Debug)]
pub enum TensorInit {
    UniformRandom {
        min: f32,
        max: f32,
        seed: u64,
    },
    Normal {
        mean: f32,
        std_dev: f32,
        seed: u64,
    },
    // start, start + step, start + 2 * step, ... in memory order
    Sequential {
        start: f32,
        step: f32,
    },
    Constant(f32),
}

impl TensorInit {
    // Box-Muller transform to generate normal distribution
    fn normal_sample(rng: &mut StdRng, uniform: &Uniform<f32>, mean: f32, std_dev: f32) -> f32 {
        // Keep u1 away from zero so ln() stays finite
        let u1 = uniform.sample(rng).max(f32::MIN_POSITIVE);
        let u2 = uniform.sample(rng);

        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        mean + std_dev * z
    }

    pub fn init(&self, desc: &TensorDesc) -> Result<Vec<f32>> {
        let total_elements = desc.num_elements();

        match self {
            TensorInit::UniformRandom { min, max, seed } => {
                if !(min < max) {
                    return Err(ConvError::InvalidArguments(format!(
                        "Uniform fill needs min < max, got [{}, {})",
                        min, max
                    )));
                }
                let dist = Uniform::new(*min, *max);
                let mut rng = StdRng::seed_from_u64(*seed);
                Ok((0..total_elements)
                    .map(|_| dist.sample(&mut rng))
                    .collect())
            }

            TensorInit::Normal { mean, std_dev, seed } => {
                let uniform = Uniform::new(0.0f32, 1.0);
                let mut rng = StdRng::seed_from_u64(*seed);
                Ok((0..total_elements)
                    .map(|_| Self::normal_sample(&mut rng, &uniform, *mean, *std_dev))
                    .collect())
            }

            TensorInit::Sequential { start, step } => Ok((0..total_elements)
                .map(|i| start + step * i as f32)
                .collect()),

            TensorInit::Constant(value) => Ok(vec![*value; total_elements]),
        }
    }
}
