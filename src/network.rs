//! Feed-forward network: a stack of layers plus a loss.
//!
//! The training-time surface (`forward`, `loss`, `backward`, `apply_optim`) is stateful: each
//! step reads what the previous one cached. [`Network::infer`] and [`Network::evaluate`] are
//! the read-only inference path and never touch those caches.

use std::fmt;

use crate::optim::OptimizerFn;
use crate::tensor::ShapeOf;
use crate::{
    Activation, Error, Init, Layer, LayerBuilder, LayerKind, Loss, LossKind, Matrix, Result, Split,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    layers: Vec<Layer>,
    loss: Loss,
}

impl Network {
    /// Network from prebuilt layers. Adjacent layer widths must agree.
    pub fn new(layers: Vec<Layer>, loss: LossKind) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::Create(
                "network must have at least one layer".to_owned(),
            ));
        }
        for (i, pair) in layers.windows(2).enumerate() {
            if pair[0].neurons() != pair[1].inputs() {
                return Err(Error::Create(format!(
                    "layer {i} outputs {} values, layer {} expects {}",
                    pair[0].neurons(),
                    i + 1,
                    pair[1].inputs()
                )));
            }
        }
        Ok(Self {
            layers,
            loss: Loss::new(loss),
        })
    }

    /// Dense network from a sizes list.
    ///
    /// `sizes` includes the input and output widths, so `activations` must have
    /// `sizes.len() - 1` entries. Layer `i` is seeded with `seed + i`.
    pub fn from_sizes(
        sizes: &[usize],
        activations: &[Activation],
        init: Init,
        loss: LossKind,
        seed: u64,
    ) -> Result<Self> {
        if sizes.len() < 2 {
            return Err(Error::Create(
                "sizes must include input and output widths".to_owned(),
            ));
        }
        if activations.len() != sizes.len() - 1 {
            return Err(Error::Create(format!(
                "{} activations for {} layers",
                activations.len(),
                sizes.len() - 1
            )));
        }

        let mut builder = LayerBuilder::new(LayerKind::Dense);
        builder.reset_after_build(true);
        let mut layers = Vec::with_capacity(activations.len());
        for (i, (w, &act)) in sizes.windows(2).zip(activations).enumerate() {
            let layer = builder
                .inputs(w[0])
                .neurons(w[1])
                .init(init)
                .activation_kind(act)
                .seed(seed.wrapping_add(i as u64))
                .build()
                .map_err(|e| e.into_create(format!("layer {i}")))?;
            layers.push(layer);
        }
        Self::new(layers, loss)
    }

    /// Layers in forward order.
    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[inline]
    pub fn loss_kind(&self) -> LossKind {
        self.loss.kind()
    }

    /// Width of the first layer's input.
    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, Layer::inputs)
    }

    /// Width of the last layer's output.
    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, Layer::neurons)
    }

    /// Training-time forward pass; every layer caches its intermediates.
    pub fn forward(&mut self, x: &Matrix) -> Result<Matrix> {
        let mut out = x.clone();
        for (i, layer) in self.layers.iter_mut().enumerate() {
            out = layer
                .forward(&out)
                .map_err(|e| e.context(format!("layer {i}")))?;
        }
        Ok(out)
    }

    /// Loss of the last `forward` output against `targets`.
    pub fn loss(&mut self, targets: &Matrix) -> Result<f64> {
        let outputs = self
            .layers
            .last()
            .and_then(|l| l.operations().last())
            .and_then(|op| op.output())
            .ok_or_else(|| Error::Exec("loss called before forward".to_owned()))?;
        self.loss.forward(targets, outputs)
    }

    /// Backpropagate the last loss; returns the gradient w.r.t. the network input.
    pub fn backward(&mut self) -> Result<Matrix> {
        let mut grad = self.loss.backward()?;
        for (i, layer) in self.layers.iter_mut().enumerate().rev() {
            grad = layer
                .backward(&grad)
                .map_err(|e| e.context(format!("layer {i}")))?;
        }
        Ok(grad)
    }

    /// Update every learnable parameter from the gradients of the last `backward`.
    pub fn apply_optim(&mut self, optimizer: &OptimizerFn) -> Result<()> {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer
                .apply_optim(optimizer)
                .map_err(|e| e.context(format!("layer {i}")))?;
        }
        Ok(())
    }

    /// Output for `x` on the inference path (dropout disabled).
    pub fn infer(&self, x: &Matrix) -> Result<Matrix> {
        let mut out = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            out = layer
                .infer(&out)
                .map_err(|e| e.context(format!("layer {i}")))?;
        }
        Ok(out)
    }

    /// Loss over a whole split on the inference path.
    pub fn evaluate(&self, split: &Split) -> Result<f64> {
        if split.x().cols() != self.input_dim() || split.y().cols() != self.output_dim() {
            return Err(Error::Data(format!(
                "split is {} -> {}, network maps {} -> {}",
                ShapeOf(split.x()),
                ShapeOf(split.y()),
                self.input_dim(),
                self.output_dim()
            )));
        }
        let outputs = self.infer(split.x())?;
        self.loss.kind().value(split.y(), &outputs)
    }

    /// Compact description such as `2-8t-1s/mse`.
    pub fn short_string(&self) -> String {
        let mut out = self.input_dim().to_string();
        for layer in &self.layers {
            out.push('-');
            out.push_str(&layer.neurons().to_string());
            let tag = layer
                .operations()
                .get(2)
                .map_or("", |op| op.kind_name());
            out.push_str(match tag {
                "linear" => "l",
                "sigmoid" => "s",
                "tanh" => "t",
                "relu" => "r",
                "sigmoid-param" => "p",
                _ => "?",
            });
            if layer.kind() == LayerKind::DenseDrop {
                out.push('d');
            }
        }
        out.push('/');
        out.push_str(self.loss.kind().name());
        out
    }

    /// Same loss and layers, parameters within `eps`.
    pub fn equal_approx(&self, other: &Network, eps: f64) -> bool {
        self.loss == other.loss
            && self.layers.len() == other.layers.len()
            && self
                .layers
                .iter()
                .zip(&other.layers)
                .all(|(a, b)| a.equal_approx(b, eps))
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "network ({})", self.loss.kind())?;
        for (i, layer) in self.layers.iter().enumerate() {
            writeln!(f, "  {i}: {layer}")?;
        }
        Ok(())
    }
}
