//! Builders for operations and layers.
//!
//! A builder accumulates explicit operations and/or sizing hints, then `build()` fills the
//! gaps: weights and biases are sampled with the configured [`Init`], sigmoid coefficients
//! default to a linear spread over `[1, 4]`, and a dense-drop layer without a usable dropout
//! gets an always-keep one.
//!
//! Setters take `&mut self` so one builder can be reused; with `reset_after_build(true)` it
//! forgets everything it accumulated after each successful build.
//!
//! ```rust
//! use rust_nnkit::{Activation, LayerBuilder, LayerKind};
//!
//! # fn main() -> rust_nnkit::Result<()> {
//! let layer = LayerBuilder::new(LayerKind::Dense)
//!     .inputs(2)
//!     .neurons(8)
//!     .activation_kind(Activation::Tanh)
//!     .seed(7)
//!     .build()?;
//! assert_eq!((layer.inputs(), layer.neurons()), (2, 8));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::logging::log_debug;
use crate::{
    Activation, ConstOperation, Error, Init, Layer, LayerKind, Logger, Matrix, Operation, Result,
};

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn random_weight<R: Rng + ?Sized>(
    init: Init,
    inputs: usize,
    neurons: usize,
    rng: &mut R,
) -> Result<Operation> {
    Operation::weight(init.sample(inputs, neurons, inputs, neurons, rng)?)
}

fn random_bias<R: Rng + ?Sized>(
    init: Init,
    inputs: usize,
    neurons: usize,
    rng: &mut R,
) -> Result<Operation> {
    Operation::bias(init.sample(1, neurons, inputs, neurons, rng)?)
}

fn required(value: Option<usize>, name: &str, kind: OperationKind) -> Result<usize> {
    match value {
        Some(n) if n > 0 => Ok(n),
        _ => Err(Error::Builder(format!(
            "{kind}: no parameter given and `{name}` hint is missing"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What an [`OperationBuilder`] produces.
pub enum OperationKind {
    Weight,
    Bias,
    Activation,
    SigmoidParam,
    Dropout,
}

impl OperationKind {
    pub fn name(self) -> &'static str {
        match self {
            OperationKind::Weight => "weight",
            OperationKind::Bias => "bias",
            OperationKind::Activation => "activation",
            OperationKind::SigmoidParam => "sigmoid-param",
            OperationKind::Dropout => "dropout",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weight" => Ok(OperationKind::Weight),
            "bias" => Ok(OperationKind::Bias),
            "activation" => Ok(OperationKind::Activation),
            "sigmoid-param" | "sigmoid_param" => Ok(OperationKind::SigmoidParam),
            "dropout" => Ok(OperationKind::Dropout),
            _ => Err(Error::fabric("operation", s)),
        }
    }
}

/// Builder for a single [`Operation`].
#[derive(Debug, Clone, Default)]
pub struct OperationBuilder {
    kind: Option<OperationKind>,
    parameter: Option<Matrix>,
    inputs: Option<usize>,
    neurons: Option<usize>,
    init: Init,
    activation: Activation,
    keep_probability: Option<f64>,
    seed: Option<u64>,
    reset_after_build: bool,
}

impl OperationBuilder {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Builder with the kind looked up by name (`"weight"`, `"dropout"`, ...).
    pub fn named(kind: &str) -> Result<Self> {
        Ok(Self::new(kind.parse()?))
    }

    pub fn kind(&mut self, kind: OperationKind) -> &mut Self {
        self.kind = Some(kind);
        self
    }

    /// Explicit weight/bias parameter or sigmoid coefficients.
    pub fn parameter(&mut self, parameter: Matrix) -> &mut Self {
        self.parameter = Some(parameter);
        self
    }

    pub fn inputs(&mut self, inputs: usize) -> &mut Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn neurons(&mut self, neurons: usize) -> &mut Self {
        self.neurons = Some(neurons);
        self
    }

    pub fn init(&mut self, init: Init) -> &mut Self {
        self.init = init;
        self
    }

    pub fn activation(&mut self, activation: Activation) -> &mut Self {
        self.activation = activation;
        self
    }

    pub fn keep_probability(&mut self, keep_probability: f64) -> &mut Self {
        self.keep_probability = Some(keep_probability);
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = Some(seed);
        self
    }

    pub fn reset_after_build(&mut self, reset: bool) -> &mut Self {
        self.reset_after_build = reset;
        self
    }

    pub fn build(&mut self) -> Result<Operation> {
        let kind = self
            .kind
            .ok_or_else(|| Error::Builder("operation kind not set".to_owned()))?;
        let op = self.build_kind(kind).map_err(|e| e.into_builder(kind))?;
        if self.reset_after_build {
            *self = Self {
                reset_after_build: true,
                ..Self::default()
            };
        }
        Ok(op)
    }

    fn build_kind(&self, kind: OperationKind) -> Result<Operation> {
        match kind {
            OperationKind::Activation => Ok(Operation::activation(self.activation)),
            OperationKind::Weight => match &self.parameter {
                Some(p) => Operation::weight(p.clone()),
                None => {
                    let inputs = required(self.inputs, "inputs", kind)?;
                    let neurons = required(self.neurons, "neurons", kind)?;
                    random_weight(self.init, inputs, neurons, &mut make_rng(self.seed))
                }
            },
            OperationKind::Bias => match &self.parameter {
                Some(p) => Operation::bias(p.clone()),
                None => {
                    let neurons = required(self.neurons, "neurons", kind)?;
                    let inputs = self.inputs.unwrap_or(0);
                    random_bias(self.init, inputs, neurons, &mut make_rng(self.seed))
                }
            },
            OperationKind::SigmoidParam => match &self.parameter {
                Some(coeffs) => Operation::sigmoid_param(coeffs.clone()),
                None => {
                    let neurons = required(self.neurons, "neurons", kind)?;
                    Operation::sigmoid_param(ConstOperation::default_coefficients(neurons))
                }
            },
            OperationKind::Dropout => {
                let keep = self.keep_probability.ok_or_else(|| {
                    Error::Builder("dropout: keep probability not set".to_owned())
                })?;
                let op = match self.seed {
                    Some(seed) => ConstOperation::dropout_with_seed(keep, seed),
                    None => ConstOperation::dropout(keep),
                };
                op.map(Operation::Const)
            }
        }
    }
}

/// Builder for a [`Layer`].
#[derive(Debug, Clone)]
pub struct LayerBuilder {
    kind: LayerKind,
    weight: Option<Operation>,
    bias: Option<Operation>,
    activation: Option<Operation>,
    dropout: Option<Operation>,
    inputs: Option<usize>,
    neurons: Option<usize>,
    init: Init,
    activation_kind: Activation,
    keep_probability: Option<f64>,
    seed: Option<u64>,
    reset_after_build: bool,
    logger: Logger,
}

impl Default for LayerBuilder {
    fn default() -> Self {
        Self::new(LayerKind::Dense)
    }
}

impl LayerBuilder {
    pub fn new(kind: LayerKind) -> Self {
        Self {
            kind,
            weight: None,
            bias: None,
            activation: None,
            dropout: None,
            inputs: None,
            neurons: None,
            init: Init::Default,
            activation_kind: Activation::Sigmoid,
            keep_probability: None,
            seed: None,
            reset_after_build: false,
            logger: Logger::default(),
        }
    }

    pub fn kind(&mut self, kind: LayerKind) -> &mut Self {
        self.kind = kind;
        self
    }

    pub fn weight(&mut self, weight: Operation) -> &mut Self {
        self.weight = Some(weight);
        self
    }

    pub fn bias(&mut self, bias: Operation) -> &mut Self {
        self.bias = Some(bias);
        self
    }

    /// Explicit activation step (plain activation or parametrized sigmoid).
    pub fn activation(&mut self, activation: Operation) -> &mut Self {
        self.activation = Some(activation);
        self
    }

    pub fn dropout(&mut self, dropout: Operation) -> &mut Self {
        self.dropout = Some(dropout);
        self
    }

    pub fn inputs(&mut self, inputs: usize) -> &mut Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn neurons(&mut self, neurons: usize) -> &mut Self {
        self.neurons = Some(neurons);
        self
    }

    pub fn init(&mut self, init: Init) -> &mut Self {
        self.init = init;
        self
    }

    /// Activation used when no explicit activation operation is set. Defaults to sigmoid.
    pub fn activation_kind(&mut self, activation: Activation) -> &mut Self {
        self.activation_kind = activation;
        self
    }

    pub fn keep_probability(&mut self, keep_probability: f64) -> &mut Self {
        self.keep_probability = Some(keep_probability);
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = Some(seed);
        self
    }

    pub fn reset_after_build(&mut self, reset: bool) -> &mut Self {
        self.reset_after_build = reset;
        self
    }

    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    pub fn build(&mut self) -> Result<Layer> {
        let layer = self.assemble()?;
        if self.reset_after_build {
            *self = Self {
                reset_after_build: true,
                logger: self.logger.clone(),
                ..Self::new(self.kind)
            };
        }
        Ok(layer)
    }

    fn assemble(&self) -> Result<Layer> {
        let kind = self.kind;
        let mut rng = make_rng(self.seed);

        let weight = match &self.weight {
            Some(w) => w.clone(),
            None => {
                let (Some(inputs), Some(neurons)) = (self.inputs, self.neurons) else {
                    return Err(Error::Builder(format!(
                        "{kind}: no weight set and inputs/neurons hints are missing"
                    )));
                };
                if inputs == 0 || neurons == 0 {
                    return Err(Error::Builder(format!(
                        "{kind}: inputs and neurons must be > 0, got {inputs} and {neurons}"
                    )));
                }
                random_weight(self.init, inputs, neurons, &mut rng)
                    .map_err(|e| e.into_builder(format!("{kind} weight")))?
            }
        };
        let Some(param) = weight.as_param() else {
            return Err(Error::Builder(format!(
                "{kind}: weight slot holds {}",
                weight.kind_name()
            )));
        };
        let (inputs, neurons) = (param.inputs(), param.neurons());
        for (hint, actual, name) in [
            (self.inputs, inputs, "inputs"),
            (self.neurons, neurons, "neurons"),
        ] {
            if let Some(hint) = hint.filter(|&h| h != actual) {
                return Err(Error::Builder(format!(
                    "{kind}: {name} hint {hint} does not match weight ({actual})"
                )));
            }
        }

        let bias = match &self.bias {
            Some(b) => b.clone(),
            None => random_bias(self.init, inputs, neurons, &mut rng)
                .map_err(|e| e.into_builder(format!("{kind} bias")))?,
        };
        let activation = self
            .activation
            .clone()
            .unwrap_or_else(|| Operation::activation(self.activation_kind));

        let layer = match kind {
            LayerKind::Dense => Layer::dense(weight, bias, activation),
            LayerKind::DenseDrop => {
                let dropout = self.dropout_or_fallback(rng.r#gen());
                Layer::dense_drop(weight, bias, activation, dropout)
            }
        };
        layer.map_err(|e| e.into_builder(kind))
    }

    fn dropout_or_fallback(&self, seed: u64) -> Operation {
        if let Some(dropout) = &self.dropout {
            return dropout.clone();
        }
        let built = self.keep_probability.map(|keep| {
            ConstOperation::dropout_with_seed(keep, seed).map(Operation::Const)
        });
        match built {
            Some(Ok(op)) => op,
            Some(Err(err)) => {
                log_debug!(self.logger, "dropout not buildable ({err}); keeping every neuron");
                always_keep(seed)
            }
            None => {
                log_debug!(self.logger, "no dropout configured; keeping every neuron");
                always_keep(seed)
            }
        }
    }
}

fn always_keep(seed: u64) -> Operation {
    Operation::Const(ConstOperation::keep_all(seed))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    use crate::logging::testing::Capture;
    use crate::{ConstKind, ParamKind};

    #[test]
    fn dense_without_ops_or_hints_is_builder_error() {
        let err = LayerBuilder::new(LayerKind::Dense).build().unwrap_err();
        assert!(matches!(err, Error::Builder(_)), "{err}");

        let err = LayerBuilder::new(LayerKind::Dense).inputs(3).build().unwrap_err();
        assert!(matches!(err, Error::Builder(_)), "{err}");
    }

    #[test]
    fn dense_from_hints_uses_sigmoid_by_default() {
        let layer = LayerBuilder::new(LayerKind::Dense)
            .inputs(3)
            .neurons(4)
            .seed(1)
            .build()
            .unwrap();
        assert_eq!((layer.inputs(), layer.neurons()), (3, 4));
        assert_eq!(
            layer.operations()[2],
            Operation::activation(Activation::Sigmoid)
        );
        let w = layer.operations()[0].as_param().unwrap().parameter();
        assert!(w.as_slice().iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn seeded_builds_are_reproducible() {
        let mut builder = LayerBuilder::new(LayerKind::Dense);
        builder.inputs(2).neurons(2).init(Init::Glorot).seed(9);
        assert_eq!(builder.build().unwrap(), builder.build().unwrap());
    }

    #[test]
    fn explicit_operations_are_validated_against_hints() {
        let weight = Operation::weight(Matrix::zeros(2, 3)).unwrap();
        let layer = LayerBuilder::new(LayerKind::Dense)
            .weight(weight.clone())
            .activation_kind(Activation::ReLU)
            .build()
            .unwrap();
        assert_eq!(layer.operations()[0], weight);
        assert_eq!(layer.operations()[1].as_param().unwrap().kind(), ParamKind::Bias);

        let err = LayerBuilder::new(LayerKind::Dense)
            .weight(weight.clone())
            .neurons(4)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Builder(_)));

        let err = LayerBuilder::new(LayerKind::Dense)
            .weight(weight)
            .bias(Operation::bias(Matrix::zeros(1, 2)).unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Builder(_)), "{err}");
    }

    #[test]
    fn dense_drop_falls_back_to_always_keep_dropout() {
        let sink = Arc::new(Capture::default());
        let layer = LayerBuilder::new(LayerKind::DenseDrop)
            .inputs(2)
            .neurons(2)
            .keep_probability(3.0)
            .logger(sink.logger("builder"))
            .build()
            .unwrap();

        let dropout = layer.operations()[3].as_const().unwrap();
        assert_eq!(dropout.kind(), ConstKind::Dropout { keep_probability: 1.0 });
        assert_eq!(sink.messages(log::Level::Debug).len(), 1);
    }

    #[test]
    fn dense_drop_uses_configured_keep_probability() {
        let layer = LayerBuilder::new(LayerKind::DenseDrop)
            .inputs(2)
            .neurons(2)
            .keep_probability(0.8)
            .seed(3)
            .build()
            .unwrap();
        assert_eq!(
            layer.operations()[3].as_const().unwrap().kind(),
            ConstKind::Dropout { keep_probability: 0.8 }
        );
    }

    #[test]
    fn reset_after_build_forgets_accumulated_state() {
        let mut builder = LayerBuilder::new(LayerKind::DenseDrop);
        builder.reset_after_build(true).inputs(2).neurons(2);
        builder.build().unwrap();

        let err = builder.build().unwrap_err();
        assert!(matches!(err, Error::Builder(_)));
        builder.inputs(1).neurons(1);
        assert_eq!(builder.build().unwrap().kind(), LayerKind::DenseDrop);
    }

    #[test]
    fn oversized_hints_are_builder_errors() {
        let err = LayerBuilder::new(LayerKind::Dense)
            .inputs(usize::MAX)
            .neurons(2)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Builder(_)), "{err}");

        let err = OperationBuilder::new(OperationKind::Weight)
            .inputs(2)
            .neurons(usize::MAX)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Builder(_)), "{err}");
    }

    #[test]
    fn operation_builder_needs_kind_and_hints() {
        assert!(matches!(
            OperationBuilder::default().build(),
            Err(Error::Builder(_))
        ));
        assert!(matches!(
            OperationBuilder::new(OperationKind::Weight).inputs(2).build(),
            Err(Error::Builder(_))
        ));
        assert!(matches!(
            OperationBuilder::new(OperationKind::Dropout).build(),
            Err(Error::Builder(_))
        ));
        assert!(matches!(
            OperationBuilder::named("conv"),
            Err(Error::Fabric { kind: "operation", .. })
        ));
    }

    #[test]
    fn operation_builder_fills_in_defaults() {
        let coeffs = OperationBuilder::named("sigmoid-param")
            .unwrap()
            .neurons(4)
            .build()
            .unwrap();
        assert_eq!(
            coeffs.as_const().unwrap().params()[0],
            Matrix::row_vector(vec![1.0, 2.0, 3.0, 4.0])
        );

        let bias = OperationBuilder::new(OperationKind::Bias)
            .neurons(3)
            .init(Init::Glorot)
            .seed(0)
            .build()
            .unwrap();
        assert_eq!(bias.as_param().unwrap().parameter().shape(), (1, 3));

        let err = OperationBuilder::new(OperationKind::Dropout)
            .keep_probability(0.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Builder(_)), "{err}");
    }

    #[test]
    fn operation_builder_reset_clears_kind() {
        let mut builder = OperationBuilder::new(OperationKind::Activation);
        builder.activation(Activation::Tanh).reset_after_build(true);
        assert_eq!(
            builder.build().unwrap(),
            Operation::activation(Activation::Tanh)
        );
        assert!(matches!(builder.build(), Err(Error::Builder(_))));
    }
}
