use crate::candle_gaussian::{FusionRule, GaussianBelief};
use crate::candle_hierarchy::HierarchySpec;
use crate::candle_level_transform::LevelTransform;
use crate::candle_loss_functions::belief_kl_loss;
use crate::candle_noise::{reparameterize, NoiseSource};
use candle_core::{DType, Device, Result, Tensor};
use candle_nn::VarBuilder;
use log::debug;

/// Bottom-up and top-down transforms of a ladder hierarchy
///
/// * `bottom_up[i]` maps level `i - 1`'s hidden output (or the encoded
///   input for `i = 0`) to the data-driven belief of level `i`
/// * `top_down[j]` maps a sample of level `L - 1 - j` to the prior
///   belief of level `L - 2 - j` (generation order, deepest first)
pub struct LadderNetwork {
    hierarchy: HierarchySpec,
    fusion: FusionRule,
    bottom_up: Vec<LevelTransform>,
    top_down: Vec<LevelTransform>,
}

/// Result of the top-down pass, indexed shallow-to-deep
pub struct TopDownPass {
    pub priors: Vec<GaussianBelief>,
    pub samples: Vec<Tensor>,
}

/// Everything one inference produces, indexed shallow-to-deep
pub struct LadderInference {
    /// bottom-up beliefs
    pub data: Vec<GaussianBelief>,
    /// top-down beliefs; the deepest one is N(0, I)
    pub priors: Vec<GaussianBelief>,
    /// fusion of `data[i]` and `priors[i]`
    pub posteriors: Vec<GaussianBelief>,
    /// ancestral samples drawn during the top-down pass
    pub samples: Vec<Tensor>,
    /// KL(posterior || prior) per level, each a batch-mean scalar
    pub kl_per_level: Vec<Tensor>,
    /// sum of `kl_per_level`
    pub kl_total: Tensor,
}

impl LadderInference {
    /// The sample handed to reconstruction: the shallowest top-down sample
    pub fn latent_sample(&self) -> &Tensor {
        &self.samples[0]
    }

    pub fn num_levels(&self) -> usize {
        self.samples.len()
    }
}

impl LadderNetwork {
    /// Will create these variables under `vs`:
    ///
    /// * `bottom_up.{i}.*` for each level `i`
    /// * `top_down.{j}.*` for each adjacent pair, deepest pair first
    ///
    /// # Arguments
    /// * `input_dim` - width of the encoded sequence vector
    /// * `hierarchy` - validated level widths
    /// * `fusion` - how fused variances are formed
    /// * `vs` - variable builder
    pub fn new(
        input_dim: usize,
        hierarchy: &HierarchySpec,
        fusion: FusionRule,
        vs: VarBuilder,
    ) -> Result<Self> {
        let nlevels = hierarchy.num_levels();

        let mut bottom_up = Vec::with_capacity(nlevels);
        let mut prev_dim = input_dim;
        for (i, level) in hierarchy.levels().iter().enumerate() {
            bottom_up.push(LevelTransform::new(
                prev_dim,
                level.hidden,
                level.latent,
                vs.pp(format!("bottom_up.{}", i)),
            )?);
            prev_dim = level.hidden;
        }

        let mut top_down = Vec::with_capacity(nlevels.saturating_sub(1));
        for j in 0..nlevels.saturating_sub(1) {
            let upper = hierarchy.level(nlevels - 1 - j);
            let lower = hierarchy.level(nlevels - 2 - j);
            let hidden = lower.prior_hidden.ok_or_else(|| {
                candle_core::Error::Msg(format!("level {} has no top-down width", nlevels - 2 - j))
            })?;
            top_down.push(LevelTransform::new(
                upper.latent,
                hidden,
                lower.latent,
                vs.pp(format!("top_down.{}", j)),
            )?);
        }

        Ok(Self {
            hierarchy: hierarchy.clone(),
            fusion,
            bottom_up,
            top_down,
        })
    }

    pub fn hierarchy(&self) -> &HierarchySpec {
        &self.hierarchy
    }

    pub fn fusion_rule(&self) -> FusionRule {
        self.fusion
    }

    pub fn num_levels(&self) -> usize {
        self.bottom_up.len()
    }

    /// Chain the bottom-up transforms over the encoded input `h_nd`.
    ///
    /// Returns one data-driven belief per level, shallow-to-deep.
    pub fn bottom_up(&self, h_nd: &Tensor) -> Result<Vec<GaussianBelief>> {
        let mut beliefs = Vec::with_capacity(self.bottom_up.len());
        let mut x = h_nd.clone();
        for level in self.bottom_up.iter() {
            let out = level.forward(&x)?;
            beliefs.push(out.belief);
            x = out.hidden;
        }
        Ok(beliefs)
    }

    /// Ancestral sampling through the top-down transforms.
    ///
    /// The deepest level takes `seed_sample` and `seed_prior` as given;
    /// every shallower level gets its prior from the top-down transform
    /// applied to the sample one level deeper, then a fresh sample from
    /// that prior.
    ///
    /// # Arguments
    /// * `seed_sample` - sample at the deepest level (n x z[L-1])
    /// * `seed_prior` - prior reported for the deepest level
    /// * `noise` - source of ε for every new sample
    pub fn top_down<N: NoiseSource + ?Sized>(
        &self,
        seed_sample: Tensor,
        seed_prior: GaussianBelief,
        noise: &mut N,
    ) -> Result<TopDownPass> {
        let nlevels = self.num_levels();
        let deepest = nlevels - 1;

        let mut priors: Vec<Option<GaussianBelief>> = vec![None; nlevels];
        let mut samples: Vec<Option<Tensor>> = vec![None; nlevels];
        priors[deepest] = Some(seed_prior);
        samples[deepest] = Some(seed_sample);

        for (j, transform) in self.top_down.iter().enumerate() {
            let upper = deepest - j;
            let lower = upper - 1;
            let z_upper = samples[upper]
                .as_ref()
                .ok_or_else(|| candle_core::Error::Msg(format!("missing sample at level {}", upper)))?;

            let prior = transform.forward(z_upper)?.belief;
            let z_lower = reparameterize(&prior.mean, &prior.var, noise)?;
            debug!("top-down {} -> {}: prior {:?}", upper, lower, prior.dims());

            priors[lower] = Some(prior);
            samples[lower] = Some(z_lower);
        }

        let priors = priors
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| candle_core::Error::Msg("incomplete top-down priors".into()))?;
        let samples = samples
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| candle_core::Error::Msg("incomplete top-down samples".into()))?;

        Ok(TopDownPass { priors, samples })
    }

    /// Bottom-up, then top-down seeded from the deepest data belief,
    /// then per-level fusion and KL accumulation.
    ///
    /// * `h_nd` - encoded input (n x input_dim)
    /// * `noise` - source of ε for every sample
    pub fn infer<N: NoiseSource + ?Sized>(&self, h_nd: &Tensor, noise: &mut N) -> Result<LadderInference> {
        let data = self.bottom_up(h_nd)?;
        let deepest = &data[data.len() - 1];

        let seed_prior = GaussianBelief::standard_like(&deepest.mean)?;
        let seed_sample = reparameterize(&deepest.mean, &deepest.var, noise)?;

        let TopDownPass { priors, samples } = self.top_down(seed_sample, seed_prior, noise)?;

        let posteriors = data
            .iter()
            .zip(priors.iter())
            .map(|(q_d, p)| q_d.fuse(p, self.fusion))
            .collect::<Result<Vec<_>>>()?;

        let kl_per_level = posteriors
            .iter()
            .zip(priors.iter())
            .map(|(q, p)| belief_kl_loss(q, p))
            .collect::<Result<Vec<_>>>()?;

        for (i, kl) in kl_per_level.iter().enumerate() {
            debug!("level {}: kl = {}", i, kl.to_dtype(DType::F32)?.to_scalar::<f32>()?);
        }

        let kl_total = kl_per_level
            .iter()
            .skip(1)
            .try_fold(kl_per_level[0].clone(), |acc, kl| acc + kl)?;

        Ok(LadderInference {
            data,
            priors,
            posteriors,
            samples,
            kl_per_level,
            kl_total,
        })
    }

    /// Generate latent samples for every level starting from N(0, I)
    /// at the deepest level. Returns `num_samples x z[i]` tensors,
    /// shallow-to-deep.
    pub fn sample_prior<N: NoiseSource + ?Sized>(
        &self,
        num_samples: usize,
        dtype: DType,
        device: &Device,
        noise: &mut N,
    ) -> Result<Vec<Tensor>> {
        let latent = self.hierarchy.deepest().latent;
        let mean = Tensor::zeros((num_samples, latent), dtype, device)?;
        let seed_prior = GaussianBelief::standard_like(&mean)?;
        let seed_sample = reparameterize(&seed_prior.mean, &seed_prior.var, noise)?;
        Ok(self.top_down(seed_sample, seed_prior, noise)?.samples)
    }
}
