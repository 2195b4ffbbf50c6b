pub mod candle_aux_layers;
pub mod candle_gaussian;
pub mod candle_hierarchy;
pub mod candle_ladder_inference;
pub mod candle_level_transform;
pub mod candle_loss_functions;
pub mod candle_model_lvae;
pub mod candle_model_traits;
pub mod candle_noise;
pub mod candle_seq_decoder_lstm;
pub mod candle_seq_encoder_lstm;
pub mod lvae_config;

pub use candle_core;
pub use candle_nn;

pub use candle_gaussian::{FusionRule, GaussianBelief};
pub use candle_hierarchy::HierarchySpec;
pub use candle_ladder_inference::LadderInference;
pub use candle_model_lvae::LadderVae;
pub use candle_model_traits::SequenceBatch;
pub use candle_noise::{DeviceNoise, NoiseSource, SeededNoise};
pub use lvae_config::{ConfigError, LvaeConfig, ModuleSpec};
