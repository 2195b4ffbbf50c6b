use crate::lvae_config::ConfigError;

/// Widths of one latent level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelSpec {
    /// hidden width of the bottom-up transform
    pub hidden: usize,
    /// latent dimensionality
    pub latent: usize,
    /// hidden width of the top-down transform producing this level's
    /// prior; `None` for the deepest level (standard Normal prior)
    pub prior_hidden: Option<usize>,
}

/// Topology of the ladder, validated once and shared by reference.
///
/// Levels are indexed `0` (shallowest, closest to the input) through
/// `L - 1` (deepest). The top-down widths `z2z_layer_size` are stored
/// in generation order, deepest pair first, so `z2z_layer_size[i]`
/// feeds level `L - 2 - i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HierarchySpec {
    levels: Vec<LevelSpec>,
}

impl HierarchySpec {
    /// * `d_size` - hidden width per level (shallow to deep)
    /// * `z_size` - latent width per level (shallow to deep)
    /// * `z2z_layer_size` - hidden width of each top-down transform,
    ///   deepest first; one fewer than the number of levels
    pub fn new(
        d_size: &[usize],
        z_size: &[usize],
        z2z_layer_size: &[usize],
    ) -> Result<Self, ConfigError> {
        if z_size.is_empty() {
            return Err(ConfigError::EmptyHierarchy);
        }

        if d_size.len() != z_size.len() {
            return Err(ConfigError::LevelCountMismatch {
                d_size: d_size.len(),
                z_size: z_size.len(),
            });
        }

        if z2z_layer_size.len() + 1 != z_size.len() {
            return Err(ConfigError::TopDownCountMismatch {
                expected: z_size.len() - 1,
                found: z2z_layer_size.len(),
            });
        }

        for (field, sizes) in [
            ("d_size", d_size),
            ("z_size", z_size),
            ("z2z_layer_size", z2z_layer_size),
        ] {
            if let Some(index) = sizes.iter().position(|&w| w == 0) {
                return Err(ConfigError::ZeroWidth { field, index });
            }
        }

        let nlevels = z_size.len();
        let levels = (0..nlevels)
            .map(|i| LevelSpec {
                hidden: d_size[i],
                latent: z_size[i],
                prior_hidden: (i + 1 < nlevels).then(|| z2z_layer_size[nlevels - 2 - i]),
            })
            .collect();

        Ok(Self { levels })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, i: usize) -> &LevelSpec {
        &self.levels[i]
    }

    pub fn levels(&self) -> &[LevelSpec] {
        &self.levels
    }

    pub fn deepest(&self) -> &LevelSpec {
        &self.levels[self.levels.len() - 1]
    }

    pub fn shallowest(&self) -> &LevelSpec {
        &self.levels[0]
    }

    pub fn d_size(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.hidden).collect()
    }

    pub fn z_size(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.latent).collect()
    }

    /// top-down hidden widths in generation order (deepest pair first)
    pub fn z2z_layer_size(&self) -> Vec<usize> {
        self.levels
            .iter()
            .rev()
            .filter_map(|l| l.prior_hidden)
            .collect()
    }
}
