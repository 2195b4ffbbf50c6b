//! Model configuration.
//!
//! Encoder and decoder are chosen by a type tag plus a free-form
//! parameter bundle, e.g.
//!
//! ```json
//! {
//!   "encoder_param": { "type": "lstm", "param": { "embed_size": 16, ... } },
//!   "decoder_param": { "type": "lstm", "param": { "vocab_size": 100, ... } },
//!   "d_size": [8, 4],
//!   "z_size": [4, 2],
//!   "z2z_layer_size": [2],
//!   "batch_size": 1,
//!   "fusion": "literal"
//! }
//! ```
//!
//! Tags resolve to a closed set of variants; anything else is a
//! `ConfigError` before any parameter is allocated.

use crate::candle_gaussian::FusionRule;
use crate::candle_hierarchy::HierarchySpec;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid encoder type `{0}`, expected one of: lstm")]
    UnsupportedEncoder(String),

    #[error("invalid decoder type `{0}`, expected one of: lstm")]
    UnsupportedDecoder(String),

    #[error("invalid {module} parameters: {message}")]
    InvalidParam {
        module: &'static str,
        message: String,
    },

    #[error("the hierarchy needs at least one level")]
    EmptyHierarchy,

    #[error("d_size has {d_size} levels but z_size has {z_size}")]
    LevelCountMismatch { d_size: usize, z_size: usize },

    #[error("z2z_layer_size should have {expected} entries, found {found}")]
    TopDownCountMismatch { expected: usize, found: usize },

    #[error("{field}[{index}] must be positive")]
    ZeroWidth { field: &'static str, index: usize },

    #[error("decoder latent_size {decoder} does not match the shallowest z_size {shallowest}")]
    LatentSizeMismatch { decoder: usize, shallowest: usize },

    #[error("dropout must be in [0, 1), got {0}")]
    InvalidDropout(f64),

    #[error("batch_size must be positive")]
    ZeroBatchSize,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Raw `{ "type": ..., "param": {...} }` selection of a module
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub param: serde_json::Value,
}

impl ModuleSpec {
    pub fn new(kind: &str, param: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            param,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LstmEncoderParam {
    pub embed_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub vocab_size: usize,
    /// lengths arrive in non-increasing order
    #[serde(default)]
    pub sorted_seq: bool,
    #[serde(default)]
    pub bidirectional: bool,
}

impl LstmEncoderParam {
    /// width of the summary vector handed to the ladder
    pub fn output_size(&self) -> usize {
        self.hidden_size * (1 + usize::from(self.bidirectional))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        positive(
            "encoder",
            &[
                ("embed_size", self.embed_size),
                ("hidden_size", self.hidden_size),
                ("num_layers", self.num_layers),
                ("vocab_size", self.vocab_size),
            ],
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LstmDecoderParam {
    pub vocab_size: usize,
    pub embed_size: usize,
    pub latent_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    #[serde(default)]
    pub dropout: f64,
}

impl LstmDecoderParam {
    fn validate(&self) -> Result<(), ConfigError> {
        positive(
            "decoder",
            &[
                ("vocab_size", self.vocab_size),
                ("embed_size", self.embed_size),
                ("latent_size", self.latent_size),
                ("hidden_size", self.hidden_size),
                ("num_layers", self.num_layers),
            ],
        )?;
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigError::InvalidDropout(self.dropout));
        }
        Ok(())
    }
}

fn positive(module: &'static str, fields: &[(&str, usize)]) -> Result<(), ConfigError> {
    match fields.iter().find(|(_, v)| *v == 0) {
        Some((name, _)) => Err(ConfigError::InvalidParam {
            module,
            message: format!("{} must be positive", name),
        }),
        None => Ok(()),
    }
}

fn parse_param<T: serde::de::DeserializeOwned>(
    module: &'static str,
    param: &serde_json::Value,
) -> Result<T, ConfigError> {
    serde_json::from_value(param.clone()).map_err(|e| ConfigError::InvalidParam {
        module,
        message: e.to_string(),
    })
}

/// Supported sequence encoders
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncoderConfig {
    Lstm(LstmEncoderParam),
}

impl EncoderConfig {
    pub fn from_spec(spec: &ModuleSpec) -> Result<Self, ConfigError> {
        match spec.kind.as_str() {
            "lstm" => {
                let param: LstmEncoderParam = parse_param("encoder", &spec.param)?;
                param.validate()?;
                Ok(Self::Lstm(param))
            }
            other => Err(ConfigError::UnsupportedEncoder(other.to_string())),
        }
    }

    pub fn output_size(&self) -> usize {
        match self {
            Self::Lstm(param) => param.output_size(),
        }
    }
}

/// Supported sequence decoders
#[derive(Clone, Debug, PartialEq)]
pub enum DecoderConfig {
    Lstm(LstmDecoderParam),
}

impl DecoderConfig {
    pub fn from_spec(spec: &ModuleSpec) -> Result<Self, ConfigError> {
        match spec.kind.as_str() {
            "lstm" => {
                let param: LstmDecoderParam = parse_param("decoder", &spec.param)?;
                param.validate()?;
                Ok(Self::Lstm(param))
            }
            other => Err(ConfigError::UnsupportedDecoder(other.to_string())),
        }
    }

    pub fn latent_size(&self) -> usize {
        match self {
            Self::Lstm(param) => param.latent_size,
        }
    }
}

/// Validated configuration of the whole model
#[derive(Clone, Debug)]
pub struct LvaeConfig {
    encoder: EncoderConfig,
    decoder: DecoderConfig,
    hierarchy: HierarchySpec,
    batch_size: usize,
    fusion: FusionRule,
}

#[derive(Deserialize)]
struct RawLvaeConfig {
    encoder_param: ModuleSpec,
    decoder_param: ModuleSpec,
    d_size: Vec<usize>,
    z_size: Vec<usize>,
    z2z_layer_size: Vec<usize>,
    batch_size: usize,
    #[serde(default)]
    fusion: FusionRule,
}

impl LvaeConfig {
    /// Cross-check the parts; the decoder consumes the shallowest sample
    pub fn new(
        encoder: EncoderConfig,
        decoder: DecoderConfig,
        hierarchy: HierarchySpec,
        batch_size: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            encoder,
            decoder,
            hierarchy,
            batch_size,
            fusion: FusionRule::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that span more than one part
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }

        let shallowest = self.hierarchy.shallowest().latent;
        if self.decoder.latent_size() != shallowest {
            return Err(ConfigError::LatentSizeMismatch {
                decoder: self.decoder.latent_size(),
                shallowest,
            });
        }
        Ok(())
    }

    /// Resolve tagged module specs and raw level widths in one go
    pub fn from_parts(
        encoder_param: &ModuleSpec,
        decoder_param: &ModuleSpec,
        d_size: &[usize],
        z_size: &[usize],
        z2z_layer_size: &[usize],
        batch_size: usize,
    ) -> Result<Self, ConfigError> {
        let encoder = EncoderConfig::from_spec(encoder_param)?;
        let decoder = DecoderConfig::from_spec(decoder_param)?;
        let hierarchy = HierarchySpec::new(d_size, z_size, z2z_layer_size)?;
        Self::new(encoder, decoder, hierarchy, batch_size)
    }

    pub fn with_fusion(mut self, fusion: FusionRule) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawLvaeConfig = serde_json::from_str(text)?;
        Ok(Self::from_parts(
            &raw.encoder_param,
            &raw.decoder_param,
            &raw.d_size,
            &raw.z_size,
            &raw.z2z_layer_size,
            raw.batch_size,
        )?
        .with_fusion(raw.fusion))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// width of the encoded vector entering the ladder
    pub fn input_size(&self) -> usize {
        self.encoder.output_size()
    }

    pub fn encoder(&self) -> &EncoderConfig {
        &self.encoder
    }

    pub fn decoder(&self) -> &DecoderConfig {
        &self.decoder
    }

    pub fn hierarchy(&self) -> &HierarchySpec {
        &self.hierarchy
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn fusion(&self) -> FusionRule {
        self.fusion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encoder_spec(kind: &str) -> ModuleSpec {
        ModuleSpec::new(
            kind,
            json!({ "embed_size": 4, "hidden_size": 3, "num_layers": 1,
                    "vocab_size": 10, "bidirectional": true }),
        )
    }

    fn decoder_spec(kind: &str, latent_size: usize) -> ModuleSpec {
        ModuleSpec::new(
            kind,
            json!({ "vocab_size": 10, "embed_size": 4, "latent_size": latent_size,
                    "hidden_size": 5, "num_layers": 1, "dropout": 0.1 }),
        )
    }

    #[test]
    fn lstm_tags_resolve() {
        let config = LvaeConfig::from_parts(
            &encoder_spec("lstm"),
            &decoder_spec("lstm", 4),
            &[8, 4],
            &[4, 2],
            &[2],
            1,
        )
        .unwrap();
        assert_eq!(config.input_size(), 6);
        assert_eq!(config.fusion(), FusionRule::Literal);
        let EncoderConfig::Lstm(param) = config.encoder();
        assert!(param.bidirectional);
        assert!(!param.sorted_seq);
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let err = EncoderConfig::from_spec(&encoder_spec("gru")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedEncoder(ref t) if t == "gru"));

        let err = DecoderConfig::from_spec(&decoder_spec("transformer", 4)).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedDecoder(ref t) if t == "transformer"));
    }

    #[test]
    fn missing_or_zero_params_are_rejected() {
        let spec = ModuleSpec::new("lstm", json!({ "embed_size": 4 }));
        assert!(matches!(
            EncoderConfig::from_spec(&spec),
            Err(ConfigError::InvalidParam { module: "encoder", .. })
        ));

        let spec = ModuleSpec::new(
            "lstm",
            json!({ "embed_size": 4, "hidden_size": 0, "num_layers": 1, "vocab_size": 10 }),
        );
        assert!(matches!(
            EncoderConfig::from_spec(&spec),
            Err(ConfigError::InvalidParam { .. })
        ));

        let spec = ModuleSpec::new(
            "lstm",
            json!({ "vocab_size": 10, "embed_size": 4, "latent_size": 4,
                    "hidden_size": 5, "num_layers": 1, "dropout": 1.0 }),
        );
        assert!(matches!(
            DecoderConfig::from_spec(&spec),
            Err(ConfigError::InvalidDropout(_))
        ));
    }

    #[test]
    fn decoder_must_match_shallowest_latent() {
        let err = LvaeConfig::from_parts(
            &encoder_spec("lstm"),
            &decoder_spec("lstm", 2),
            &[8, 4],
            &[4, 2],
            &[2],
            1,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::LatentSizeMismatch { decoder: 2, shallowest: 4 }
        ));
    }

    #[test]
    fn json_with_canonical_fusion() {
        let text = json!({
            "encoder_param": encoder_spec("lstm"),
            "decoder_param": decoder_spec("lstm", 4),
            "d_size": [8, 4],
            "z_size": [4, 2],
            "z2z_layer_size": [2],
            "batch_size": 3,
            "fusion": "canonical"
        })
        .to_string();
        let config = LvaeConfig::from_json_str(&text).unwrap();
        assert_eq!(config.fusion(), FusionRule::Canonical);
        assert_eq!(config.batch_size(), 3);
        assert_eq!(config.hierarchy().z2z_layer_size(), vec![2]);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            LvaeConfig::from_json_str("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn misspelled_param_keys_are_rejected() {
        let spec = ModuleSpec::new(
            "lstm",
            json!({ "embed_size": 4, "hidden_size": 3, "num_layers": 1,
                    "vocab_size": 10, "bidirectonal": true }),
        );
        let err = EncoderConfig::from_spec(&spec).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidParam { module: "encoder", ref message } if message.contains("bidirectonal"))
        );

        let spec = ModuleSpec::new(
            "lstm",
            json!({ "vocab_size": 10, "embed_size": 4, "latent_size": 4,
                    "hidden_size": 5, "num_layers": 1, "drop_out": 0.1 }),
        );
        assert!(matches!(
            DecoderConfig::from_spec(&spec),
            Err(ConfigError::InvalidParam { module: "decoder", .. })
        ));
    }

    fn unchecked_config(latent_size: usize, batch_size: usize) -> LvaeConfig {
        LvaeConfig {
            encoder: EncoderConfig::from_spec(&encoder_spec("lstm")).unwrap(),
            decoder: DecoderConfig::from_spec(&decoder_spec("lstm", latent_size)).unwrap(),
            hierarchy: HierarchySpec::new(&[8, 4], &[4, 2], &[2]).unwrap(),
            batch_size,
            fusion: FusionRule::default(),
        }
    }

    #[test]
    fn validate_catches_cross_part_mismatch() {
        assert!(unchecked_config(4, 1).validate().is_ok());
        assert!(matches!(
            unchecked_config(4, 0).validate(),
            Err(ConfigError::ZeroBatchSize)
        ));
        assert!(matches!(
            unchecked_config(2, 1).validate(),
            Err(ConfigError::LatentSizeMismatch { decoder: 2, shallowest: 4 })
        ));
    }

    #[test]
    fn model_rejects_unchecked_config_before_allocating() {
        use crate::candle_model_lvae::LadderVae;
        use candle_core::{DType, Device};
        use candle_nn::{VarBuilder, VarMap};

        for config in [unchecked_config(2, 1), unchecked_config(4, 0), unchecked_config(2, 0)] {
            let varmap = VarMap::new();
            let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            let err = LadderVae::new(&config, vs).err().unwrap();
            assert!(err.downcast_ref::<ConfigError>().is_some());
            assert!(varmap.all_vars().is_empty());
        }
    }
}
