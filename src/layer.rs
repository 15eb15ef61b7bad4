//! Layers: ordered pipelines of operations.
//!
//! A dense layer is `weight -> bias -> activation`; a dense-drop layer appends a dropout
//! step. Construction validates the pipeline once, so `forward`/`backward` only have to
//! thread matrices through it.

use std::fmt;
use std::str::FromStr;

use crate::optim::OptimizerFn;
use crate::{ConstKind, Error, Matrix, Operation, ParamKind, ParamOperation, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Dense,
    DenseDrop,
}

impl LayerKind {
    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Dense => "dense",
            LayerKind::DenseDrop => "dense-drop",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LayerKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dense" => Ok(LayerKind::Dense),
            "dense-drop" | "dense_drop" => Ok(LayerKind::DenseDrop),
            _ => Err(Error::fabric("layer", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    kind: LayerKind,
    ops: Vec<Operation>,
}

impl Layer {
    /// `weight -> bias -> activation`.
    ///
    /// `activation` may be a plain activation or a parametrized sigmoid with one coefficient
    /// per neuron.
    pub fn dense(weight: Operation, bias: Operation, activation: Operation) -> Result<Self> {
        let neurons = match weight.as_param() {
            Some(w) if w.kind() == ParamKind::Weight => w.neurons(),
            _ => {
                return Err(Error::Create(format!(
                    "dense: first operation must be a weight, got {}",
                    weight.kind_name()
                )));
            }
        };
        match bias.as_param() {
            Some(b) if b.kind() == ParamKind::Bias => {
                if b.neurons() != neurons {
                    return Err(Error::Create(format!(
                        "dense: weight has {neurons} neurons, bias has {}",
                        b.neurons()
                    )));
                }
            }
            _ => {
                return Err(Error::Create(format!(
                    "dense: second operation must be a bias, got {}",
                    bias.kind_name()
                )));
            }
        }
        if !activation.is_activation() {
            return Err(Error::Create(format!(
                "dense: third operation must be an activation, got {}",
                activation.kind_name()
            )));
        }
        if let Some(coeffs) = activation.as_const().and_then(|c| c.neurons()) {
            if coeffs != neurons {
                return Err(Error::Create(format!(
                    "dense: weight has {neurons} neurons, sigmoid has {coeffs} coefficients"
                )));
            }
        }

        Ok(Self {
            kind: LayerKind::Dense,
            ops: vec![weight, bias, activation],
        })
    }

    /// [`Layer::dense`] followed by `dropout`.
    pub fn dense_drop(
        weight: Operation,
        bias: Operation,
        activation: Operation,
        dropout: Operation,
    ) -> Result<Self> {
        let mut layer = Self::dense(weight, bias, activation)?;
        if !matches!(
            dropout.as_const().map(|c| c.kind()),
            Some(ConstKind::Dropout { .. })
        ) {
            return Err(Error::Create(format!(
                "dense-drop: fourth operation must be dropout, got {}",
                dropout.kind_name()
            )));
        }
        layer.ops.push(dropout);
        layer.kind = LayerKind::DenseDrop;
        Ok(layer)
    }

    /// `Dense` or `DenseDrop`.
    #[inline]
    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    /// The pipeline in forward order: weight, bias, activation, then dropout if any.
    #[inline]
    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    fn weight(&self) -> Option<&ParamOperation> {
        self.ops.first().and_then(Operation::as_param)
    }

    /// Expected input width.
    pub fn inputs(&self) -> usize {
        self.weight().map_or(0, |w| w.inputs())
    }

    /// Output width.
    pub fn neurons(&self) -> usize {
        self.weight().map_or(0, |w| w.neurons())
    }

    /// Run every operation in order, caching what `backward` needs.
    pub fn forward(&mut self, x: &Matrix) -> Result<Matrix> {
        let mut out = x.clone();
        for (i, op) in self.ops.iter_mut().enumerate() {
            out = op
                .forward(&out)
                .map_err(|e| e.context(format!("operation {i}")))?;
        }
        Ok(out)
    }

    /// Backpropagate `dy` in reverse order; returns the gradient w.r.t. the layer input.
    pub fn backward(&mut self, dy: &Matrix) -> Result<Matrix> {
        let mut grad = dy.clone();
        for (i, op) in self.ops.iter_mut().enumerate().rev() {
            grad = op
                .backward(&grad)
                .map_err(|e| e.context(format!("operation {i}")))?;
        }
        Ok(grad)
    }

    /// Update every learnable operation; others are skipped.
    pub fn apply_optim(&mut self, optimizer: &OptimizerFn) -> Result<()> {
        for (i, op) in self.ops.iter_mut().enumerate() {
            if let Operation::Param(param) = op {
                param
                    .apply_optim(optimizer)
                    .map_err(|e| e.context(format!("operation {i}")))?;
            }
        }
        Ok(())
    }

    /// Output for `x` without touching the caches.
    pub fn infer(&self, x: &Matrix) -> Result<Matrix> {
        let mut out = x.clone();
        for (i, op) in self.ops.iter().enumerate() {
            out = op
                .infer(&out)
                .map_err(|e| e.context(format!("operation {i}")))?;
        }
        Ok(out)
    }

    /// Same kind and operations, parameters within `eps`.
    pub fn equal_approx(&self, other: &Layer, eps: f64) -> bool {
        self.kind == other.kind
            && self.ops.len() == other.ops.len()
            && self
                .ops
                .iter()
                .zip(&other.ops)
                .all(|(a, b)| a.equal_approx(b, eps))
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.kind.name())?;
        for (i, op) in self.ops.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{op}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::Activation;
    use crate::tensor::EPSILON;

    fn tanh_dense() -> Layer {
        let w = Matrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        let b = Matrix::row_vector(vec![7.0, 8.0, 9.0]);
        Layer::dense(
            Operation::weight(w).unwrap(),
            Operation::bias(b).unwrap(),
            Operation::activation(Activation::Tanh),
        )
        .unwrap()
    }

    #[test]
    fn dense_forward_computes_activation_of_affine_map() {
        let mut layer = tanh_dense();
        let y = layer.forward(&Matrix::row_vector(vec![10.0, 11.0])).unwrap();
        let expected = Matrix::row_vector(vec![
            61.0_f64.tanh(),
            83.0_f64.tanh(),
            105.0_f64.tanh(),
        ]);
        assert!(y.approx_eq(&expected, 1e-12));
        assert_eq!((layer.inputs(), layer.neurons()), (2, 3));
    }

    #[test]
    fn backward_returns_input_gradient_and_fills_every_cache() {
        let mut layer = tanh_dense();
        let x = Matrix::from_rows(&[vec![0.01, -0.02], vec![0.03, 0.0]]).unwrap();
        let y = layer.forward(&x).unwrap();
        let dx = layer.backward(&Matrix::filled(2, 3, 1.0)).unwrap();

        assert_eq!(dx.shape(), x.shape());
        assert_eq!(layer.operations()[2].output(), Some(&y));
        for op in layer.operations() {
            assert!(op.input_gradient().is_some(), "{op}");
        }
    }

    #[test]
    fn infer_matches_forward_and_leaves_caches_empty() {
        let mut layer = tanh_dense();
        let x = Matrix::row_vector(vec![-0.1, 0.2]);
        let inferred = layer.infer(&x).unwrap();
        assert!(layer.operations().iter().all(|op| op.input().is_none()));
        assert_eq!(layer.forward(&x).unwrap(), inferred);
    }

    #[test]
    fn forward_error_names_the_operation() {
        let mut layer = tanh_dense();
        let err = layer.forward(&Matrix::zeros(1, 3)).unwrap_err();
        assert!(
            matches!(&err, Error::Exec(msg) if msg.starts_with("operation 0")),
            "{err}"
        );
    }

    #[test]
    fn apply_optim_updates_weight_and_bias_only() {
        let mut layer = tanh_dense();
        let before = layer.clone();
        layer.forward(&Matrix::row_vector(vec![0.0, 0.0])).unwrap();
        layer.backward(&Matrix::row_vector(vec![1.0, 1.0, 1.0])).unwrap();

        let zero =
            |p: &Matrix, _g: &Matrix| -> Result<Matrix> { Ok(Matrix::zeros(p.rows(), p.cols())) };
        layer.apply_optim(&zero).unwrap();

        assert_ne!(layer, before);
        let params: Vec<_> = layer
            .operations()
            .iter()
            .filter_map(Operation::as_param)
            .map(|p| p.parameter())
            .collect();
        assert_eq!(params, vec![Matrix::zeros(2, 3), Matrix::zeros(1, 3)]);
        assert_eq!(layer.operations()[2], Operation::activation(Activation::Tanh));
    }

    #[test]
    fn clone_is_equal_before_and_after_training_the_original() {
        let mut layer = Layer::dense_drop(
            Operation::weight(Matrix::filled(2, 2, 0.5)).unwrap(),
            Operation::bias(Matrix::row_vector(vec![0.0, 0.0])).unwrap(),
            Operation::activation(Activation::ReLU),
            Operation::dropout(0.5).unwrap(),
        )
        .unwrap();
        let copy = layer.clone();
        assert_eq!(layer, copy);

        layer.forward(&Matrix::filled(3, 2, 1.0)).unwrap();
        layer.backward(&Matrix::filled(3, 2, 1.0)).unwrap();
        assert_eq!(layer, copy);
        assert!(layer.equal_approx(&copy, EPSILON));
        assert!(copy.operations().iter().all(|op| op.output().is_none()));
    }

    #[test]
    fn dense_validates_operation_roles_and_sizes() {
        let w = || Operation::weight(Matrix::zeros(2, 3)).unwrap();
        let b = |n| Operation::bias(Matrix::zeros(1, n)).unwrap();
        let act = || Operation::activation(Activation::Sigmoid);

        assert!(matches!(Layer::dense(b(3), b(3), act()), Err(Error::Create(_))));
        assert!(matches!(Layer::dense(w(), w(), act()), Err(Error::Create(_))));
        assert!(matches!(Layer::dense(w(), b(2), act()), Err(Error::Create(_))));
        assert!(matches!(Layer::dense(w(), b(3), b(3)), Err(Error::Create(_))));
        assert!(matches!(
            Layer::dense(w(), b(3), Operation::dropout(0.5).unwrap()),
            Err(Error::Create(_))
        ));

        let coeffs = |n| Operation::sigmoid_param(Matrix::filled(1, n, 1.0)).unwrap();
        assert!(matches!(Layer::dense(w(), b(3), coeffs(2)), Err(Error::Create(_))));
        assert!(Layer::dense(w(), b(3), coeffs(3)).is_ok());

        assert!(matches!(
            Layer::dense_drop(w(), b(3), act(), act()),
            Err(Error::Create(_))
        ));
        let layer = Layer::dense_drop(w(), b(3), act(), Operation::dropout(0.9).unwrap()).unwrap();
        assert_eq!(layer.kind(), LayerKind::DenseDrop);
        assert_eq!(layer.operations().len(), 4);
    }
}
