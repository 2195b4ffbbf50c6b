use crate::candle_gaussian::FusionRule;
use crate::candle_hierarchy::HierarchySpec;
use crate::candle_ladder_inference::{LadderInference, LadderNetwork};
use crate::candle_model_traits::*;
use crate::candle_noise::NoiseSource;
use crate::candle_seq_decoder_lstm::LstmSequenceDecoder;
use crate::candle_seq_encoder_lstm::LstmSequenceEncoder;
use crate::lvae_config::*;
use candle_core::{DType, Device, Result, Tensor};
use candle_nn::VarBuilder;
use log::info;

/// The sequence encoders this model can own
pub enum SequenceEncoder {
    Lstm(LstmSequenceEncoder),
}

impl SequenceEncoder {
    pub fn new(config: &EncoderConfig, vs: VarBuilder) -> Result<Self> {
        match config {
            EncoderConfig::Lstm(param) => Ok(Self::Lstm(LstmSequenceEncoder::new(param, vs)?)),
        }
    }
}

impl SequenceEncoderT for SequenceEncoder {
    fn encode(&self, tokens_nt: &Tensor, lengths: &[usize]) -> Result<Tensor> {
        match self {
            Self::Lstm(enc) => enc.encode(tokens_nt, lengths),
        }
    }

    fn dim_output(&self) -> usize {
        match self {
            Self::Lstm(enc) => enc.dim_output(),
        }
    }
}

/// The sequence decoders this model can own
pub enum SequenceDecoder {
    Lstm(LstmSequenceDecoder),
}

impl SequenceDecoder {
    pub fn new(config: &DecoderConfig, vs: VarBuilder) -> Result<Self> {
        match config {
            DecoderConfig::Lstm(param) => Ok(Self::Lstm(LstmSequenceDecoder::new(param, vs)?)),
        }
    }
}

impl SequenceDecoderT for SequenceDecoder {
    fn reconstruction_loss(&self, batch: &SequenceBatch, z_nk: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::Lstm(dec) => dec.reconstruction_loss(batch, z_nk, train),
        }
    }

    fn dim_latent(&self) -> usize {
        match self {
            Self::Lstm(dec) => dec.dim_latent(),
        }
    }
}

/// Ladder variational autoencoder over token sequences
///
/// ```text
/// tokens -> encoder -> bottom-up beliefs ----.
///                                             fuse -> KL
///          N(0, I) -> top-down priors/samples '
///                          |
///               shallowest sample -> decoder -> reconstruction loss
/// ```
pub struct LadderVae {
    encoder: SequenceEncoder,
    decoder: SequenceDecoder,
    ladder: LadderNetwork,
    batch_size: usize,
}

impl LadderVae {
    /// Will create these variables under `vs`:
    ///
    /// * `encoder.*` - sequence encoder
    /// * `decoder.*` - sequence decoder
    /// * `ladder.bottom_up.{i}.*`, `ladder.top_down.{j}.*`
    pub fn new(config: &LvaeConfig, vs: VarBuilder) -> anyhow::Result<Self> {
        config.validate()?;
        let hierarchy = config.hierarchy();

        info!(
            "ladder: d_size {:?}, z_size {:?}, z2z_layer_size {:?}, fusion {:?}",
            hierarchy.d_size(),
            hierarchy.z_size(),
            hierarchy.z2z_layer_size(),
            config.fusion()
        );

        let encoder = SequenceEncoder::new(config.encoder(), vs.pp("encoder"))?;
        let decoder = SequenceDecoder::new(config.decoder(), vs.pp("decoder"))?;
        let ladder = LadderNetwork::new(encoder.dim_output(), hierarchy, config.fusion(), vs.pp("ladder"))?;

        Ok(Self {
            encoder,
            decoder,
            ladder,
            batch_size: config.batch_size(),
        })
    }

    /// Resolve type tags and level widths, then build. Nothing is
    /// allocated in `vs` unless the whole configuration is valid.
    pub fn from_parts(
        encoder_param: &ModuleSpec,
        decoder_param: &ModuleSpec,
        d_size: &[usize],
        z_size: &[usize],
        z2z_layer_size: &[usize],
        batch_size: usize,
        vs: VarBuilder,
    ) -> anyhow::Result<Self> {
        let config = LvaeConfig::from_parts(
            encoder_param,
            decoder_param,
            d_size,
            z_size,
            z2z_layer_size,
            batch_size,
        )?;
        Self::new(&config, vs)
    }

    /// Run the ladder on already-parsed sequences
    pub fn infer<N: NoiseSource + ?Sized>(
        &self,
        tokens_nt: &Tensor,
        lengths: &[usize],
        noise: &mut N,
    ) -> Result<LadderInference> {
        let h_nd = self.encoder.encode(tokens_nt, lengths)?;
        self.ladder.infer(&h_nd, noise)
    }

    /// Encode sequences into `(z_nk, kl)`: the shallowest top-down
    /// sample and the KL loss summed over levels
    pub fn encode<N: NoiseSource + ?Sized>(
        &self,
        tokens_nt: &Tensor,
        lengths: &[usize],
        noise: &mut N,
    ) -> Result<(Tensor, Tensor)> {
        let inference = self.infer(tokens_nt, lengths, noise)?;
        let z_nk = inference.latent_sample().clone();
        Ok((z_nk, inference.kl_total))
    }

    /// Returns `(kl_loss, reconstruction_loss)`, both scalars
    ///
    /// * `batch` - sequences and their lengths
    /// * `noise` - source of every reparameterization draw
    /// * `train` - whether to use decoder dropout or not
    pub fn forward_t<N: NoiseSource + ?Sized>(
        &self,
        batch: &SequenceBatch,
        noise: &mut N,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (z_nk, kl_loss) = self.encode(batch.tokens(), batch.lengths(), noise)?;
        let recon_loss = self.decoder.reconstruction_loss(batch, &z_nk, train)?;
        Ok((kl_loss, recon_loss))
    }

    pub fn forward<N: NoiseSource + ?Sized>(
        &self,
        batch: &SequenceBatch,
        noise: &mut N,
    ) -> Result<(Tensor, Tensor)> {
        self.forward_t(batch, noise, false)
    }

    /// Latent samples for every level drawn from the generative
    /// hierarchy alone, shallow-to-deep
    pub fn sample_prior<N: NoiseSource + ?Sized>(
        &self,
        num_samples: usize,
        dtype: DType,
        device: &Device,
        noise: &mut N,
    ) -> Result<Vec<Tensor>> {
        self.ladder.sample_prior(num_samples, dtype, device, noise)
    }

    pub fn hierarchy(&self) -> &HierarchySpec {
        self.ladder.hierarchy()
    }

    pub fn fusion_rule(&self) -> FusionRule {
        self.ladder.fusion_rule()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn encoder(&self) -> &SequenceEncoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &SequenceDecoder {
        &self.decoder
    }

    pub fn ladder(&self) -> &LadderNetwork {
        &self.ladder
    }

    pub fn encoder_output_size(&self) -> usize {
        self.encoder.dim_output()
    }
}
