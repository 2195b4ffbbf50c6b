use candle_core::{IndexOp, Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder, LSTM, RNN};

/// Default negative slope of the leaky rectifier used inside the ladder
pub const LEAKY_SLOPE: f64 = 0.01;

/// A stack of `M` layers, each followed by an activation
pub struct StackLayers<M>
where
    M: Module,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Activation>,
}

impl<M> Module for StackLayers<M>
where
    M: Module,
{
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            x = activation.forward(&module.forward(&x)?)?;
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: Activation) {
        self.module_layers.push(layer);
        self.activation_layers.push(activation);
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Affine layers with leaky rectification: `in -> layers[0] -> ... -> layers[last]`
///
/// Variables are named `{j}.weight` and `{j}.bias` under `vs`.
pub fn leaky_relu_stack(
    in_dim: usize,
    layers: &[usize],
    vs: VarBuilder,
) -> Result<StackLayers<Linear>> {
    let mut fc = StackLayers::<Linear>::new();
    let mut prev_dim = in_dim;
    for (j, &next_dim) in layers.iter().enumerate() {
        fc.push_with_act(
            candle_nn::linear(prev_dim, next_dim, vs.pp(j.to_string()))?,
            Activation::LeakyRelu(LEAKY_SLOPE),
        );
        prev_dim = next_dim;
    }
    Ok(fc)
}

/// Run an LSTM over every position of `x_ntf` (n x t x features)
/// from the zero state and return the hidden outputs (n x t x hidden)
pub fn lstm_outputs(lstm: &LSTM, x_ntf: &Tensor) -> Result<Tensor> {
    let (nbatch, ntime, _) = x_ntf.dims3()?;
    let mut state = lstm.zero_state(nbatch)?;
    let mut h_t = Vec::with_capacity(ntime);
    for t in 0..ntime {
        let x_t = x_ntf.i((.., t, ..))?.contiguous()?;
        state = lstm.step(&x_t, &state)?;
        h_t.push(state.h().clone());
    }
    Tensor::stack(&h_t, 1)
}

/// softplus(x) = log(1 + exp(x)), evaluated as
/// max(x, 0) + log(1 + exp(-|x|)) so large inputs do not overflow
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    x.relu()? + tail
}
