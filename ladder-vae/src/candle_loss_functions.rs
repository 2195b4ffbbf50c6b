use candle_core::{DType, Result, Tensor, D};
use candle_nn::ops;

use crate::candle_gaussian::GaussianBelief;

/// KL divergence between two diagonal Gaussians, one value per sample
///
/// kl(i) = 0.5 * sum_k [ log p_var - log q_var + q_var / p_var
///                       + (q_mu - p_mu)^2 / p_var - 1 ]
///
/// * `q_mu`, `q_var` - approximate posterior (n x k)
/// * `p_mu`, `p_var` - reference distribution (n x k)
///
pub fn gaussian_kl_divergence(
    q_mu: &Tensor,
    q_var: &Tensor,
    p_mu: &Tensor,
    p_var: &Tensor,
) -> Result<Tensor> {
    let log_ratio = (p_var.log()? - q_var.log()?)?;
    let var_ratio = q_var.div(p_var)?;
    let sq_dist = (q_mu - p_mu)?.sqr()?.div(p_var)?;
    let kl_nk = (((log_ratio + var_ratio)? + sq_dist)? - 1.0)?;
    kl_nk.sum(kl_nk.rank() - 1)? * 0.5
}

/// Same as `gaussian_kl_divergence`, averaged over the batch (scalar)
pub fn gaussian_kl_loss(
    q_mu: &Tensor,
    q_var: &Tensor,
    p_mu: &Tensor,
    p_var: &Tensor,
) -> Result<Tensor> {
    gaussian_kl_divergence(q_mu, q_var, p_mu, p_var)?.mean(0)
}

/// KL(q || p) for two beliefs, averaged over the batch
pub fn belief_kl_loss(q: &GaussianBelief, p: &GaussianBelief) -> Result<Tensor> {
    gaussian_kl_loss(&q.mean, &q.var, &p.mean, &p.var)
}

/// Masked next-token negative log-likelihood
///
/// nll(i) = - sum_t mask(i,t) * log softmax(logits(i,t,:))[target(i,t)]
///
/// * `logits_ntv` - unnormalized scores (n x t x vocab)
/// * `target_nt` - token indices (n x t), `u32`
/// * `mask_nt` - 1 for positions that count, 0 for padding (n x t)
///
/// Returns the batch mean of `nll(i)`.
pub fn masked_token_nll(logits_ntv: &Tensor, target_nt: &Tensor, mask_nt: &Tensor) -> Result<Tensor> {
    let log_prob_ntv = ops::log_softmax(logits_ntv, D::Minus1)?;
    let target_nt1 = target_nt.to_dtype(DType::U32)?.unsqueeze(2)?.contiguous()?;
    let llik_nt = log_prob_ntv.gather(&target_nt1, 2)?.squeeze(2)?;
    let mask_nt = mask_nt.to_dtype(llik_nt.dtype())?;
    llik_nt.mul(&mask_nt)?.sum(1)?.neg()?.mean(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn kl_of_identical_gaussians_is_zero() -> Result<()> {
        let dev = Device::Cpu;
        let mu = Tensor::randn(0f32, 2f32, (5, 3), &dev)?;
        let var = (Tensor::rand(0f32, 1f32, (5, 3), &dev)? + 0.1)?;
        let kl: Vec<f32> = gaussian_kl_divergence(&mu, &var, &mu, &var)?.to_vec1()?;
        assert_eq!(kl.len(), 5);
        for v in kl {
            assert!(v.abs() < 1e-6, "{}", v);
        }
        Ok(())
    }

    #[test]
    fn kl_against_standard_normal() -> Result<()> {
        // KL(N(1, 2) || N(0, 1)) = 0.5 * (0 - ln 2 + 2 + 1 - 1)
        let dev = Device::Cpu;
        let q_mu = Tensor::new(&[[1f64]], &dev)?;
        let q_var = Tensor::new(&[[2f64]], &dev)?;
        let p_mu = Tensor::new(&[[0f64]], &dev)?;
        let p_var = Tensor::new(&[[1f64]], &dev)?;
        let kl = gaussian_kl_loss(&q_mu, &q_var, &p_mu, &p_var)?.to_scalar::<f64>()?;
        let expected = 0.5 * (2.0 - 2f64.ln());
        assert!((kl - expected).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn kl_loss_is_batch_mean_of_per_sample_kl() -> Result<()> {
        let dev = Device::Cpu;
        let q_mu = Tensor::new(&[[0f64, 0.], [1., 0.]], &dev)?;
        let q_var = Tensor::new(&[[1f64, 1.], [1., 1.]], &dev)?;
        let p = GaussianBelief::standard_like(&q_mu)?;
        let q = GaussianBelief::new(q_mu, q_var);
        let per_sample: Vec<f64> = gaussian_kl_divergence(&q.mean, &q.var, &p.mean, &p.var)?.to_vec1()?;
        assert_eq!(per_sample, vec![0.0, 0.5]);
        assert_eq!(belief_kl_loss(&q, &p)?.to_scalar::<f64>()?, 0.25);
        Ok(())
    }

    #[test]
    fn masked_nll_ignores_padding() -> Result<()> {
        let dev = Device::Cpu;
        // uniform logits over 4 tokens: every position costs ln 4
        let logits = Tensor::zeros((2, 3, 4), DType::F32, &dev)?;
        let target = Tensor::new(&[[1u32, 2, 3], [0, 0, 0]], &dev)?;
        let mask = Tensor::new(&[[1f32, 1., 1.], [1., 0., 0.]], &dev)?;
        let nll = masked_token_nll(&logits, &target, &mask)?.to_scalar::<f32>()?;
        let expected = (3.0 + 1.0) * 4f32.ln() / 2.0;
        assert!((nll - expected).abs() < 1e-5);
        Ok(())
    }
}
