use crate::candle_aux_layers::lstm_outputs;
use crate::candle_model_traits::SequenceEncoderT;
use crate::lvae_config::LstmEncoderParam;
use candle_core::{Result, Tensor};
use candle_nn::{Embedding, LSTMConfig, Module, VarBuilder, LSTM};

/// Token embedding followed by a stack of (optionally bidirectional)
/// LSTM layers. The summary vector of a sequence is the last layer's
/// forward hidden state at its final valid position, concatenated with
/// the backward hidden state after reading it right to left.
pub struct LstmSequenceEncoder {
    param: LstmEncoderParam,
    embedding: Embedding,
    forward_layers: Vec<LSTM>,
    backward_layers: Vec<LSTM>,
}

impl LstmSequenceEncoder {
    /// Will create these variables under `vs`:
    ///
    /// * `embedding.weight`
    /// * `lstm.forward.{l}.{weight,bias}_{ih,hh}_l0` for each layer `l`
    /// * `lstm.backward.{l}.*` when bidirectional
    pub fn new(param: &LstmEncoderParam, vs: VarBuilder) -> Result<Self> {
        let embedding = candle_nn::embedding(param.vocab_size, param.embed_size, vs.pp("embedding"))?;

        let ndirections = if param.bidirectional { 2 } else { 1 };
        let mut forward_layers = Vec::with_capacity(param.num_layers);
        let mut backward_layers = Vec::with_capacity(param.num_layers);

        let mut prev_dim = param.embed_size;
        for l in 0..param.num_layers {
            forward_layers.push(candle_nn::lstm(
                prev_dim,
                param.hidden_size,
                LSTMConfig::default(),
                vs.pp(format!("lstm.forward.{}", l)),
            )?);
            if param.bidirectional {
                backward_layers.push(candle_nn::lstm(
                    prev_dim,
                    param.hidden_size,
                    LSTMConfig::default(),
                    vs.pp(format!("lstm.backward.{}", l)),
                )?);
            }
            prev_dim = param.hidden_size * ndirections;
        }

        Ok(Self {
            param: param.clone(),
            embedding,
            forward_layers,
            backward_layers,
        })
    }

    pub fn param(&self) -> &LstmEncoderParam {
        &self.param
    }

    fn check_lengths(&self, lengths: &[usize], width: usize) -> Result<()> {
        if let Some(bad) = lengths.iter().find(|&&l| l == 0 || l > width) {
            candle_core::bail!("sequence length {} outside 1..={}", bad, width);
        }
        if self.param.sorted_seq && lengths.windows(2).any(|w| w[0] < w[1]) {
            candle_core::bail!("sorted_seq requires non-increasing lengths, got {:?}", lengths);
        }
        Ok(())
    }
}

/// Index tensor for `gather` along dim 1 of an (n x t x f) tensor
fn time_index(rows: Vec<u32>, nbatch: usize, ntime: usize, nfeature: usize, x: &Tensor) -> Result<Tensor> {
    Tensor::from_vec(rows, (nbatch, ntime), x.device())?
        .unsqueeze(2)?
        .broadcast_as((nbatch, ntime, nfeature))?
        .contiguous()
}

/// Reverse each row's first `lengths[i]` positions, leaving padding in
/// place. Applying it twice restores the input.
fn reverse_within_length(x_ntf: &Tensor, lengths: &[usize]) -> Result<Tensor> {
    let (nbatch, ntime, nfeature) = x_ntf.dims3()?;
    let rows: Vec<u32> = lengths
        .iter()
        .flat_map(|&l| (0..ntime).map(move |t| if t < l { (l - 1 - t) as u32 } else { t as u32 }))
        .collect();
    x_ntf.gather(&time_index(rows, nbatch, ntime, nfeature, x_ntf)?, 1)
}

/// `x_ntf[i, lengths[i] - 1, :]` for every row (n x f)
fn last_valid(x_ntf: &Tensor, lengths: &[usize]) -> Result<Tensor> {
    let (nbatch, _, nfeature) = x_ntf.dims3()?;
    let rows: Vec<u32> = lengths.iter().map(|&l| (l - 1) as u32).collect();
    x_ntf
        .gather(&time_index(rows, nbatch, 1, nfeature, x_ntf)?, 1)?
        .squeeze(1)
}

impl SequenceEncoderT for LstmSequenceEncoder {
    fn encode(&self, tokens_nt: &Tensor, lengths: &[usize]) -> Result<Tensor> {
        let (_, width) = tokens_nt.dims2()?;
        self.check_lengths(lengths, width)?;

        let mut x_ntf = self.embedding.forward(tokens_nt)?;
        let mut last_fwd = None;
        let mut last_bwd = None;

        for (l, fwd) in self.forward_layers.iter().enumerate() {
            let h_fwd = lstm_outputs(fwd, &x_ntf)?;
            last_fwd = Some(last_valid(&h_fwd, lengths)?);

            x_ntf = match self.backward_layers.get(l) {
                Some(bwd) => {
                    let h_bwd_rev = lstm_outputs(bwd, &reverse_within_length(&x_ntf, lengths)?)?;
                    last_bwd = Some(last_valid(&h_bwd_rev, lengths)?);
                    let h_bwd = reverse_within_length(&h_bwd_rev, lengths)?;
                    Tensor::cat(&[&h_fwd, &h_bwd], 2)?
                }
                None => h_fwd,
            };
        }

        let last_fwd = last_fwd.ok_or_else(|| candle_core::Error::Msg("encoder has no layers".into()))?;
        match last_bwd {
            Some(last_bwd) => Tensor::cat(&[&last_fwd, &last_bwd], 1),
            None => Ok(last_fwd),
        }
    }

    fn dim_output(&self) -> usize {
        self.param.output_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn param(bidirectional: bool, num_layers: usize) -> LstmEncoderParam {
        LstmEncoderParam {
            embed_size: 5,
            hidden_size: 6,
            num_layers,
            vocab_size: 11,
            sorted_seq: false,
            bidirectional,
        }
    }

    #[test]
    fn reverse_within_length_is_an_involution() -> Result<()> {
        let x = Tensor::arange(0f32, 12., &Device::Cpu)?.reshape((2, 3, 2))?;
        let lengths = [3, 2];
        let rev = reverse_within_length(&x, &lengths)?;
        assert_eq!(
            rev.to_vec3::<f32>()?,
            vec![
                vec![vec![4., 5.], vec![2., 3.], vec![0., 1.]],
                vec![vec![8., 9.], vec![6., 7.], vec![10., 11.]],
            ]
        );
        let back = reverse_within_length(&rev, &lengths)?;
        assert_eq!(back.to_vec3::<f32>()?, x.to_vec3::<f32>()?);
        Ok(())
    }

    #[test]
    fn output_width_doubles_when_bidirectional() -> Result<()> {
        let tokens = Tensor::new(&[[1u32, 2, 3, 4], [5, 6, 0, 0]], &Device::Cpu)?;
        for (bidirectional, width) in [(false, 6), (true, 12)] {
            let varmap = VarMap::new();
            let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            let encoder = LstmSequenceEncoder::new(&param(bidirectional, 2), vs.pp("encoder"))?;
            assert_eq!(encoder.dim_output(), width);
            let h = encoder.encode(&tokens, &[4, 2])?;
            assert_eq!(h.dims(), &[2, width]);
        }
        Ok(())
    }

    #[test]
    fn padding_does_not_leak_into_the_summary() -> Result<()> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = LstmSequenceEncoder::new(&param(true, 1), vs)?;

        let a = Tensor::new(&[[3u32, 1, 4, 0, 0]], &Device::Cpu)?;
        let b = Tensor::new(&[[3u32, 1, 4, 9, 2]], &Device::Cpu)?;
        let h_a = encoder.encode(&a, &[3])?.to_vec2::<f32>()?;
        let h_b = encoder.encode(&b, &[3])?.to_vec2::<f32>()?;
        for (x, y) in h_a[0].iter().zip(h_b[0].iter()) {
            assert!((x - y).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn sorted_seq_requires_non_increasing_lengths() -> Result<()> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut p = param(false, 1);
        p.sorted_seq = true;
        let encoder = LstmSequenceEncoder::new(&p, vs)?;

        let tokens = Tensor::new(&[[1u32, 2, 0], [1, 2, 3]], &Device::Cpu)?;
        assert!(encoder.encode(&tokens, &[2, 3]).is_err());
        assert!(encoder.encode(&tokens, &[3, 2]).is_ok());
        Ok(())
    }
}
