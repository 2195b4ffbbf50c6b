use candle_core::{DType, Device, Result, Shape, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Source of standard normal noise for reparameterized sampling.
///
/// Every call must draw fresh values; nothing is cached across calls.
pub trait NoiseSource {
    fn standard_normal(&mut self, shape: &Shape, dtype: DType, device: &Device) -> Result<Tensor>;

    /// ε ~ N(0, I) with the shape, dtype and device of `like`
    fn standard_normal_like(&mut self, like: &Tensor) -> Result<Tensor> {
        self.standard_normal(like.shape(), like.dtype(), like.device())
    }
}

/// Reproducible noise from a seeded `StdRng`
///
/// Values are drawn in `f64` on the host, then cast to the requested
/// dtype and moved to the target device.
pub struct SeededNoise {
    rng: StdRng,
}

impl SeededNoise {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl NoiseSource for SeededNoise {
    fn standard_normal(&mut self, shape: &Shape, dtype: DType, device: &Device) -> Result<Tensor> {
        let values: Vec<f64> = (0..shape.elem_count())
            .map(|_| self.rng.sample::<f64, _>(StandardNormal))
            .collect();
        Tensor::from_vec(values, shape.clone(), &Device::Cpu)?
            .to_dtype(dtype)?
            .to_device(device)
    }
}

/// Noise from the backend's own generator (not reproducible on CPU)
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceNoise;

impl NoiseSource for DeviceNoise {
    fn standard_normal(&mut self, shape: &Shape, dtype: DType, device: &Device) -> Result<Tensor> {
        Tensor::randn(0f32, 1f32, shape.clone(), device)?.to_dtype(dtype)
    }
}

///
/// z = mu + sqrt(var) * eps
/// where eps ~ N(0, 1)
///
/// # Arguments
/// * `mean` - mean of Gaussian distribution
/// * `var` - variance of Gaussian distribution (strictly positive)
/// * `noise` - where `eps` comes from
pub fn reparameterize<N: NoiseSource + ?Sized>(
    mean: &Tensor,
    var: &Tensor,
    noise: &mut N,
) -> Result<Tensor> {
    let eps = noise.standard_normal_like(mean)?;
    mean + var.sqrt()?.mul(&eps)?
}
