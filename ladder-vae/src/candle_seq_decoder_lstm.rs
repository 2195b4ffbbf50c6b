use crate::candle_aux_layers::lstm_outputs;
use crate::candle_loss_functions::masked_token_nll;
use crate::candle_model_traits::{length_mask, SequenceBatch, SequenceDecoderT};
use crate::lvae_config::LstmDecoderParam;
use candle_core::{Result, Tensor};
use candle_nn::{Dropout, Embedding, LSTMConfig, Linear, Module, ModuleT, VarBuilder, LSTM};

/// Teacher-forced LSTM language model conditioned on a latent vector.
///
/// At step `t` the input is the embedding of token `t` concatenated
/// with `z`; the output distribution predicts token `t + 1`.
pub struct LstmSequenceDecoder {
    param: LstmDecoderParam,
    embedding: Embedding,
    layers: Vec<LSTM>,
    dropout: Dropout,
    vocab_logits: Linear,
}

impl LstmSequenceDecoder {
    /// Will create these variables under `vs`:
    ///
    /// * `embedding.weight`
    /// * `lstm.{l}.{weight,bias}_{ih,hh}_l0` for each layer `l`
    /// * `vocab.weight`, `vocab.bias`
    pub fn new(param: &LstmDecoderParam, vs: VarBuilder) -> Result<Self> {
        let embedding = candle_nn::embedding(param.vocab_size, param.embed_size, vs.pp("embedding"))?;

        let mut layers = Vec::with_capacity(param.num_layers);
        let mut prev_dim = param.embed_size + param.latent_size;
        for l in 0..param.num_layers {
            layers.push(candle_nn::lstm(
                prev_dim,
                param.hidden_size,
                LSTMConfig::default(),
                vs.pp(format!("lstm.{}", l)),
            )?);
            prev_dim = param.hidden_size;
        }

        let vocab_logits = candle_nn::linear(param.hidden_size, param.vocab_size, vs.pp("vocab"))?;

        Ok(Self {
            param: param.clone(),
            embedding,
            layers,
            dropout: Dropout::new(param.dropout as f32),
            vocab_logits,
        })
    }

    pub fn param(&self) -> &LstmDecoderParam {
        &self.param
    }

    /// Next-token logits for every input position (n x t x vocab)
    ///
    /// * `inputs_nt` - tokens fed at each step
    /// * `z_nk` - latent conditioning vector
    pub fn logits_t(&self, inputs_nt: &Tensor, z_nk: &Tensor, train: bool) -> Result<Tensor> {
        let emb_nte = self.embedding.forward(inputs_nt)?;
        let (nbatch, ntime, _) = emb_nte.dims3()?;
        let z_ntk = z_nk
            .to_dtype(emb_nte.dtype())?
            .unsqueeze(1)?
            .broadcast_as((nbatch, ntime, self.param.latent_size))?
            .contiguous()?;

        let mut h_nth = Tensor::cat(&[&emb_nte, &z_ntk], 2)?;
        for (l, lstm) in self.layers.iter().enumerate() {
            if l > 0 {
                h_nth = self.dropout.forward_t(&h_nth, train)?;
            }
            h_nth = lstm_outputs(lstm, &h_nth)?;
        }
        let h_nth = self.dropout.forward_t(&h_nth, train)?;
        self.vocab_logits.forward(&h_nth)
    }
}

impl SequenceDecoderT for LstmSequenceDecoder {
    fn reconstruction_loss(&self, batch: &SequenceBatch, z_nk: &Tensor, train: bool) -> Result<Tensor> {
        let width = batch.max_len();

        if width < 2 {
            // nothing to predict
            return Tensor::zeros((), z_nk.dtype(), z_nk.device());
        }

        let inputs_nt = batch.tokens().narrow(1, 0, width - 1)?.contiguous()?;
        let targets_nt = batch.tokens().narrow(1, 1, width - 1)?.contiguous()?;

        let logits_ntv = self.logits_t(&inputs_nt, z_nk, train)?;

        let predicted: Vec<usize> = batch.lengths().iter().map(|&l| l - 1).collect();
        let mask_nt = length_mask(&predicted, width - 1, logits_ntv.dtype(), logits_ntv.device())?;

        masked_token_nll(&logits_ntv, &targets_nt, &mask_nt)
    }

    fn dim_latent(&self) -> usize {
        self.param.latent_size
    }
}
