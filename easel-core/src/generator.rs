use candle_core::{Device, Shape, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Seeded source of standard-normal noise.
///
/// Values are drawn on the host with a portable RNG and then moved to the
/// target device, so the same seed yields the same noise on every backend.
#[derive(Debug, Clone)]
pub struct Generator {
    seed: u64,
    rng: StdRng,
}

impl Generator {
    pub fn manual_seed(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Seeds the device's own RNG as well. CPU devices cannot be seeded this
    /// way in candle and are left untouched.
    pub fn seed_device(&self, device: &Device) -> candle_core::Result<()> {
        if device.is_cpu() {
            return Ok(());
        }
        device.set_seed(self.seed)
    }

    /// Draws an f32 tensor of i.i.d. N(0, 1) samples (Box-Muller).
    pub fn randn<S: Into<Shape>>(&mut self, shape: S, device: &Device) -> candle_core::Result<Tensor> {
        let shape = shape.into();
        let count = shape.elem_count();
        let mut values = Vec::with_capacity(count);
        while values.len() < count {
            // (0, 1] keeps the logarithm finite.
            let u1: f32 = 1.0 - self.rng.gen::<f32>();
            let u2: f32 = self.rng.gen();
            let radius = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f32::consts::PI * u2;
            values.push(radius * theta.cos());
            if values.len() < count {
                values.push(radius * theta.sin());
            }
        }
        Tensor::from_vec(values, shape, &Device::Cpu)?.to_device(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(seed: u64, n: usize) -> Vec<f32> {
        Generator::manual_seed(seed)
            .randn(n, &Device::Cpu)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()
    }

    #[test]
    fn same_seed_same_noise() {
        assert_eq!(draw(42, 101), draw(42, 101));
        assert_ne!(draw(42, 101), draw(43, 101));
    }

    #[test]
    fn shape_is_respected() {
        let mut generator = Generator::manual_seed(7);
        let t = generator.randn((1, 4, 8, 8), &Device::Cpu).unwrap();
        assert_eq!(t.dims(), &[1, 4, 8, 8]);
        assert_eq!(generator.seed(), 7);
    }

    #[test]
    fn samples_look_standard_normal() {
        let values = draw(0, 20_000);
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 1.0).abs() < 0.05, "variance {var}");
        assert!(values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn cpu_seeding_is_a_no_op() {
        Generator::manual_seed(1).seed_device(&Device::Cpu).unwrap();
    }
}
