//! Network checkpoints as JSON (feature: `serde`).
//!
//! The on-disk format is versioned and independent of the in-memory operation types, so the
//! pipeline internals can change without breaking saved files. Loading validates the version,
//! every shape, parameter finiteness and the widths of adjacent layers.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    Activation, ConstKind, Error, Layer, LayerKind, LossKind, Matrix, Network, Operation, Result,
};

pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNetwork {
    pub format_version: u32,
    pub loss: LossKind,
    pub layers: Vec<SerializedLayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedLayer {
    pub kind: SerializedLayerKind,
    pub inputs: usize,
    pub neurons: usize,
    /// Row-major `(inputs, neurons)`.
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
    pub activation: SerializedActivation,
    /// Present for dense-drop layers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_probability: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializedLayerKind {
    Dense,
    DenseDrop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SerializedActivation {
    Linear,
    Sigmoid,
    Tanh,
    Relu,
    SigmoidParam { coefficients: Vec<f64> },
}

impl From<Activation> for SerializedActivation {
    fn from(value: Activation) -> Self {
        match value {
            Activation::Linear => SerializedActivation::Linear,
            Activation::Sigmoid => SerializedActivation::Sigmoid,
            Activation::Tanh => SerializedActivation::Tanh,
            Activation::ReLU => SerializedActivation::Relu,
        }
    }
}

impl SerializedActivation {
    fn into_operation(self) -> Result<Operation> {
        let act = match self {
            SerializedActivation::Linear => Activation::Linear,
            SerializedActivation::Sigmoid => Activation::Sigmoid,
            SerializedActivation::Tanh => Activation::Tanh,
            SerializedActivation::Relu => Activation::ReLU,
            SerializedActivation::SigmoidParam { coefficients } => {
                return Operation::sigmoid_param(Matrix::row_vector(coefficients));
            }
        };
        Ok(Operation::activation(act))
    }
}

impl SerializedNetwork {
    pub fn validate(&self) -> Result<()> {
        if self.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(Error::Data(format!(
                "unsupported checkpoint format_version {}; expected {}",
                self.format_version, CHECKPOINT_FORMAT_VERSION
            )));
        }
        if self.layers.is_empty() {
            return Err(Error::Data(
                "checkpoint must have at least one layer".to_owned(),
            ));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            layer
                .validate()
                .map_err(|e| e.context(format!("layer {i}")))?;
            if i > 0 && layer.inputs != self.layers[i - 1].neurons {
                return Err(Error::Data(format!(
                    "layer {i} takes {} inputs, previous layer has {} neurons",
                    layer.inputs,
                    self.layers[i - 1].neurons
                )));
            }
        }
        Ok(())
    }
}

impl SerializedLayer {
    fn validate(&self) -> Result<()> {
        if self.inputs == 0 || self.neurons == 0 {
            return Err(Error::Data(format!(
                "dims must be > 0, got inputs={} neurons={}",
                self.inputs, self.neurons
            )));
        }
        let expected = self
            .inputs
            .checked_mul(self.neurons)
            .ok_or_else(|| Error::Data("weight shape overflow".to_owned()))?;
        if self.weights.len() != expected {
            return Err(Error::Data(format!(
                "weights length {} does not match inputs * neurons ({} * {})",
                self.weights.len(),
                self.inputs,
                self.neurons
            )));
        }
        if self.bias.len() != self.neurons {
            return Err(Error::Data(format!(
                "bias length {} does not match neurons {}",
                self.bias.len(),
                self.neurons
            )));
        }
        if self.weights.iter().chain(&self.bias).any(|v| !v.is_finite()) {
            return Err(Error::Data(
                "parameters must contain only finite values".to_owned(),
            ));
        }
        match (self.kind, self.keep_probability) {
            (SerializedLayerKind::Dense, None) | (SerializedLayerKind::DenseDrop, Some(_)) => {
                Ok(())
            }
            (SerializedLayerKind::Dense, Some(_)) => Err(Error::Data(
                "dense layer must not carry a keep probability".to_owned(),
            )),
            (SerializedLayerKind::DenseDrop, None) => Err(Error::Data(
                "dense-drop layer needs a keep probability".to_owned(),
            )),
        }
    }

    fn into_layer(self) -> Result<Layer> {
        let weight = Operation::weight(Matrix::new(self.inputs, self.neurons, self.weights)?)?;
        let bias = Operation::bias(Matrix::row_vector(self.bias))?;
        let activation = self.activation.into_operation()?;
        match self.keep_probability {
            Some(keep) => Layer::dense_drop(weight, bias, activation, Operation::dropout(keep)?),
            None => Layer::dense(weight, bias, activation),
        }
    }
}

impl From<&Layer> for SerializedLayer {
    fn from(layer: &Layer) -> Self {
        let mut out = Self {
            kind: match layer.kind() {
                LayerKind::Dense => SerializedLayerKind::Dense,
                LayerKind::DenseDrop => SerializedLayerKind::DenseDrop,
            },
            inputs: layer.inputs(),
            neurons: layer.neurons(),
            weights: Vec::new(),
            bias: Vec::new(),
            activation: SerializedActivation::Linear,
            keep_probability: None,
        };
        // Layer constructors fix the slot order: weight, bias, activation, [dropout].
        for (i, op) in layer.operations().iter().enumerate() {
            match (i, op) {
                (0, Operation::Param(p)) => out.weights = p.parameter().into_vec(),
                (1, Operation::Param(p)) => out.bias = p.parameter().into_vec(),
                (2, Operation::Activation(a)) => out.activation = a.activation().into(),
                (2, Operation::Const(c)) => {
                    out.activation = SerializedActivation::SigmoidParam {
                        coefficients: c.params()[0].as_slice().to_vec(),
                    }
                }
                (_, Operation::Const(c)) => {
                    if let ConstKind::Dropout { keep_probability } = c.kind() {
                        out.keep_probability = Some(keep_probability);
                    }
                }
                _ => {}
            }
        }
        out
    }
}

impl From<&Network> for SerializedNetwork {
    fn from(network: &Network) -> Self {
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            loss: network.loss_kind(),
            layers: network.layers().iter().map(SerializedLayer::from).collect(),
        }
    }
}

impl TryFrom<SerializedNetwork> for Network {
    type Error = Error;

    fn try_from(value: SerializedNetwork) -> std::result::Result<Self, Self::Error> {
        value.validate()?;
        let mut layers = Vec::with_capacity(value.layers.len());
        for (i, layer) in value.layers.into_iter().enumerate() {
            let layer = layer
                .into_layer()
                .map_err(|e| Error::Data(format!("layer {i} invalid: {e}")))?;
            layers.push(layer);
        }
        Network::new(layers, value.loss).map_err(|e| Error::Data(e.to_string()))
    }
}

impl Network {
    /// Serialize to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(&SerializedNetwork::from(self))
            .map_err(|e| Error::Data(format!("failed to serialize network: {e}")))
    }

    /// Serialize to a compact JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(&SerializedNetwork::from(self))
            .map_err(|e| Error::Data(format!("failed to serialize network: {e}")))
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let ser: SerializedNetwork = serde_json::from_str(s)
            .map_err(|e| Error::Data(format!("failed to parse checkpoint json: {e}")))?;
        ser.try_into()
    }

    /// Save as pretty-printed JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let s = self.to_json_string_pretty()?;
        let p = path.as_ref();
        std::fs::write(p, s)
            .map_err(|e| Error::Io(format!("failed to write {}: {e}", p.display())))
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::Io(format!("failed to read {}: {e}", p.display())))?;
        Self::from_json_str(&s)
    }
}
