use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

/// Independent per-dimension Gaussian over one latent level.
///
/// * `mean` - batch x latent
/// * `var` - batch x latent, strictly positive
#[derive(Clone, Debug)]
pub struct GaussianBelief {
    pub mean: Tensor,
    pub var: Tensor,
}

impl GaussianBelief {
    pub fn new(mean: Tensor, var: Tensor) -> Self {
        Self { mean, var }
    }

    /// N(0, I) with the same shape, dtype and device as `like`
    pub fn standard_like(like: &Tensor) -> Result<Self> {
        Ok(Self {
            mean: Tensor::zeros_like(like)?,
            var: Tensor::ones_like(like)?,
        })
    }

    pub fn dims(&self) -> &[usize] {
        self.mean.dims()
    }

    /// Precision-weighted fusion with another belief over the same variable
    pub fn fuse(&self, other: &GaussianBelief, rule: FusionRule) -> Result<GaussianBelief> {
        fuse(&self.mean, &self.var, &other.mean, &other.var, rule)
    }
}

/// How the fused variance is read off the combined precision.
///
/// With `sigma = 1 / (1/var_d + 1/var_up)`:
/// * `Literal` - `var = sigma^2`
/// * `Canonical` - `var = sigma`
///
/// `Literal` is the arithmetic the ladder has always been trained
/// with, even though proper precision-weighted fusion gives `sigma`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionRule {
    #[default]
    Literal,
    Canonical,
}

/// Combine a data-driven belief `(mu_d, var_d)` with a top-down belief
/// `(mu_up, var_up)`:
///
/// ```text
/// x = 1 / var_d,  y = 1 / var_up
/// sigma = 1 / (x + y)
/// mu = (mu_d * x + mu_up * y) * sigma
/// var = sigma^2   (Literal)  or  sigma   (Canonical)
/// ```
///
/// Both variances must be strictly positive.
pub fn fuse(
    mu_d: &Tensor,
    var_d: &Tensor,
    mu_up: &Tensor,
    var_up: &Tensor,
    rule: FusionRule,
) -> Result<GaussianBelief> {
    let x = var_d.recip()?;
    let y = var_up.recip()?;
    let sigma = (&x + &y)?.recip()?;
    let mean = ((mu_d * &x)? + (mu_up * &y)?)?.mul(&sigma)?;
    let var = match rule {
        FusionRule::Literal => sigma.sqr()?,
        FusionRule::Canonical => sigma,
    };
    Ok(GaussianBelief { mean, var })
}
