use candle_core::{DType, Device, Result, Tensor};

/// Padded token sequences with their true lengths
///
/// * `tokens` - token indices (n x t), stored as `u32`
/// * `lengths` - number of valid tokens per row, each in `1..=t`
#[derive(Clone, Debug)]
pub struct SequenceBatch {
    tokens: Tensor,
    lengths: Vec<usize>,
}

impl SequenceBatch {
    pub fn new(tokens: Tensor, lengths: Vec<usize>) -> Result<Self> {
        let (nbatch, width) = tokens.dims2()?;

        if lengths.len() != nbatch {
            candle_core::bail!("{} lengths for a batch of {} sequences", lengths.len(), nbatch);
        }

        if let Some(bad) = lengths.iter().find(|&&l| l == 0 || l > width) {
            candle_core::bail!("sequence length {} outside 1..={}", bad, width);
        }

        Ok(Self {
            tokens: tokens.to_dtype(DType::U32)?,
            lengths,
        })
    }

    pub fn tokens(&self) -> &Tensor {
        &self.tokens
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }

    /// padded width `t`
    pub fn max_len(&self) -> usize {
        self.tokens.dims()[1]
    }
}

/// `mask[i, t] = 1` if `t < lengths[i]`, else 0 (n x width)
pub fn length_mask(lengths: &[usize], width: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let values: Vec<f32> = lengths
        .iter()
        .flat_map(|&l| (0..width).map(move |t| if t < l { 1f32 } else { 0f32 }))
        .collect();
    Tensor::from_vec(values, (lengths.len(), width), device)?.to_dtype(dtype)
}

pub trait SequenceEncoderT {
    /// Summarize each sequence into one fixed-size vector
    ///
    /// # Arguments
    /// * `tokens_nt` - token indices (n x t)
    /// * `lengths` - valid length of each row
    ///
    /// # Returns `h_nd` (n x `dim_output()`)
    fn encode(&self, tokens_nt: &Tensor, lengths: &[usize]) -> Result<Tensor>;

    fn dim_output(&self) -> usize;
}

pub trait SequenceDecoderT {
    /// Reconstruction loss of `batch` given a latent sample
    ///
    /// # Arguments
    /// * `batch` - the original sequences
    /// * `z_nk` - latent sample (n x `dim_latent()`)
    /// * `train` - whether to use dropout or not
    ///
    /// # Returns a scalar: negative log-likelihood averaged over the batch
    fn reconstruction_loss(&self, batch: &SequenceBatch, z_nk: &Tensor, train: bool) -> Result<Tensor>;

    fn dim_latent(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_marks_valid_prefix() -> Result<()> {
        let mask = length_mask(&[3, 1], 4, DType::F32, &Device::Cpu)?;
        assert_eq!(
            mask.to_vec2::<f32>()?,
            vec![vec![1., 1., 1., 0.], vec![1., 0., 0., 0.]]
        );
        Ok(())
    }

    #[test]
    fn batch_rejects_bad_lengths() -> Result<()> {
        let tokens = Tensor::new(&[[1u32, 2, 3], [4, 5, 0]], &Device::Cpu)?;
        assert!(SequenceBatch::new(tokens.clone(), vec![3]).is_err());
        assert!(SequenceBatch::new(tokens.clone(), vec![3, 0]).is_err());
        assert!(SequenceBatch::new(tokens.clone(), vec![4, 2]).is_err());

        let batch = SequenceBatch::new(tokens, vec![3, 2])?;
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.max_len(), 3);
        Ok(())
    }
}
