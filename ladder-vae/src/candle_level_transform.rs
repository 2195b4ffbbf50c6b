use crate::candle_aux_layers::*;
use crate::candle_gaussian::GaussianBelief;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// Floor added to every variance so that log and division stay finite
pub const VARIANCE_FLOOR: f64 = 1e-8;

/// Feed-forward block shared by the bottom-up and top-down passes
///
/// ```text
/// h = lrelu(W2 lrelu(W1 x + b1) + b2)
/// mean = Wm h + bm
/// var = softplus(Wv h + bv) + 1e-8
/// ```
pub struct LevelTransform {
    fc: StackLayers<Linear>,
    z_mean: Linear,
    z_var: Linear,
}

/// What one application of a level transform produces
pub struct LevelOutput {
    /// batch x hidden, fed to the next bottom-up level
    pub hidden: Tensor,
    pub belief: GaussianBelief,
}

impl LevelTransform {
    /// Will create these variables under `vs`:
    ///
    /// * `fc.0.weight`, `fc.0.bias` (in -> hidden)
    /// * `fc.1.weight`, `fc.1.bias` (hidden -> hidden)
    /// * `z.mean.weight`, `z.mean.bias`
    /// * `z.var.weight`, `z.var.bias`
    pub fn new(in_dim: usize, hidden_dim: usize, latent_dim: usize, vs: VarBuilder) -> Result<Self> {
        let fc = leaky_relu_stack(in_dim, &[hidden_dim, hidden_dim], vs.pp("fc"))?;
        let z_mean = candle_nn::linear(hidden_dim, latent_dim, vs.pp("z.mean"))?;
        let z_var = candle_nn::linear(hidden_dim, latent_dim, vs.pp("z.var"))?;

        Ok(Self {
            fc,
            z_mean,
            z_var,
        })
    }

    pub fn forward(&self, x_nd: &Tensor) -> Result<LevelOutput> {
        let h_nh = self.fc.forward(x_nd)?;
        let mean_nk = self.z_mean.forward(&h_nh)?;
        let var_nk = (softplus(&self.z_var.forward(&h_nh)?)? + VARIANCE_FLOOR)?;

        Ok(LevelOutput {
            hidden: h_nh,
            belief: GaussianBelief::new(mean_nk, var_nk),
        })
    }
}
