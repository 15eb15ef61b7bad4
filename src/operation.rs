//! Differentiable operations.
//!
//! An operation is one step of a layer pipeline with a fixed call discipline:
//!
//! - `forward(x)` caches an owned copy of `x` and the output `y`;
//! - `backward(dy)` checks `dy` against `y`, computes `dx` (and, for learnable operations,
//!   the parameter gradient) and caches both;
//! - `apply_optim(optimizer)` (learnable operations only) replaces the parameter using the
//!   gradient cached by the last `backward`.
//!
//! There are three variants sharing the same [`Cache`]:
//!
//! - [`ActivationOp`]: stateless element-wise nonlinearity.
//! - [`ParamOperation`]: owns a learnable parameter (weight matrix or bias row).
//! - [`ConstOperation`]: owns auxiliary tensors that are not learned (dropout mask,
//!   sigmoid coefficients).
//!
//! Equality (`==` and [`Operation::equal_approx`]) compares kind and configuration or
//! parameters, never the forward/backward caches. `Clone` is the deep copy.

use std::fmt;

use crate::optim::OptimizerFn;
use crate::tensor::ShapeOf;
use crate::{Activation, ConstOperation, Error, Matrix, ParamOperation, Result};

/// Tensors remembered between `forward` and `backward`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cache {
    x: Option<Matrix>,
    y: Option<Matrix>,
    dy: Option<Matrix>,
    dx: Option<Matrix>,
}

impl Cache {
    /// Remember a forward pass. Gradients of the previous pass are dropped.
    pub(crate) fn store_forward(&mut self, x: &Matrix, y: &Matrix) {
        self.x = Some(x.clone());
        self.y = Some(y.clone());
        self.dy = None;
        self.dx = None;
    }

    /// Cached `(x, y)`, validating `dy` against `y`.
    pub(crate) fn begin_backward(&self, dy: &Matrix, op: &str) -> Result<(&Matrix, &Matrix)> {
        let (Some(x), Some(y)) = (&self.x, &self.y) else {
            return Err(Error::Exec(format!("{op}: backward called before forward")));
        };
        if !dy.same_shape(y) {
            return Err(Error::Exec(format!(
                "{op}: output gradient is {}, output is {}",
                ShapeOf(dy),
                ShapeOf(y)
            )));
        }
        Ok((x, y))
    }

    /// Validate `dx` against the cached `x` and remember both gradients.
    pub(crate) fn finish_backward(&mut self, dy: &Matrix, dx: &Matrix, op: &str) -> Result<()> {
        let x = self
            .x
            .as_ref()
            .ok_or_else(|| Error::Exec(format!("{op}: backward called before forward")))?;
        if !dx.same_shape(x) {
            return Err(Error::Exec(format!(
                "{op}: input gradient is {}, input is {}",
                ShapeOf(dx),
                ShapeOf(x)
            )));
        }
        self.dy = Some(dy.clone());
        self.dx = Some(dx.clone());
        Ok(())
    }

    #[inline]
    pub(crate) fn input(&self) -> Option<&Matrix> {
        self.x.as_ref()
    }

    #[inline]
    pub(crate) fn output(&self) -> Option<&Matrix> {
        self.y.as_ref()
    }

    #[inline]
    pub(crate) fn output_gradient(&self) -> Option<&Matrix> {
        self.dy.as_ref()
    }

    #[inline]
    pub(crate) fn input_gradient(&self) -> Option<&Matrix> {
        self.dx.as_ref()
    }
}

/// Stateless element-wise activation.
#[derive(Debug, Clone)]
pub struct ActivationOp {
    activation: Activation,
    cache: Cache,
}

impl ActivationOp {
    pub fn new(activation: Activation) -> Self {
        Self {
            activation,
            cache: Cache::default(),
        }
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn infer(&self, x: &Matrix) -> Matrix {
        let act = self.activation;
        x.map(|v| act.forward(v))
    }

    pub fn forward(&mut self, x: &Matrix) -> Result<Matrix> {
        let y = self.infer(x);
        self.cache.store_forward(x, &y);
        Ok(y)
    }

    /// `dx = dy ⊙ f'(y)`, with `f'` expressed through the cached output.
    pub fn backward(&mut self, dy: &Matrix) -> Result<Matrix> {
        let op = self.activation.name();
        let (_, y) = self.cache.begin_backward(dy, op)?;
        let act = self.activation;
        let dx = dy
            .zip_map(y, op, |g, out| g * act.grad_from_output(out))
            .map_err(|e| e.into_exec(op))?;
        self.cache.finish_backward(dy, &dx, op)?;
        Ok(dx)
    }
}

impl PartialEq for ActivationOp {
    fn eq(&self, other: &Self) -> bool {
        self.activation == other.activation
    }
}

/// One step of a layer pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Activation(ActivationOp),
    Param(ParamOperation),
    Const(ConstOperation),
}

impl Operation {
    /// Stateless activation.
    pub fn activation(activation: Activation) -> Self {
        Operation::Activation(ActivationOp::new(activation))
    }

    /// Weight multiply `y = x·p` with `p` of shape `(inputs, neurons)`.
    pub fn weight(p: Matrix) -> Result<Self> {
        ParamOperation::weight(p).map(Operation::Param)
    }

    /// Bias add `y = x + p` with `p` a `1 x neurons` row broadcast over input rows.
    pub fn bias(p: Matrix) -> Result<Self> {
        ParamOperation::bias(p).map(Operation::Param)
    }

    /// Dropout keeping each element with probability `keep_probability`.
    pub fn dropout(keep_probability: f64) -> Result<Self> {
        ConstOperation::dropout(keep_probability).map(Operation::Const)
    }

    /// Sigmoid of the input scaled column-wise by `coeffs` (a `1 x neurons` row).
    pub fn sigmoid_param(coeffs: Matrix) -> Result<Self> {
        ConstOperation::sigmoid_param(coeffs).map(Operation::Const)
    }

    pub fn forward(&mut self, x: &Matrix) -> Result<Matrix> {
        match self {
            Operation::Activation(op) => op.forward(x),
            Operation::Param(op) => op.forward(x),
            Operation::Const(op) => op.forward(x),
        }
    }

    pub fn backward(&mut self, dy: &Matrix) -> Result<Matrix> {
        match self {
            Operation::Activation(op) => op.backward(dy),
            Operation::Param(op) => op.backward(dy),
            Operation::Const(op) => op.backward(dy),
        }
    }

    /// Update the learnable parameter. Fails with [`Error::Exec`] for operations without one.
    pub fn apply_optim(&mut self, optimizer: &OptimizerFn) -> Result<()> {
        match self {
            Operation::Param(op) => op.apply_optim(optimizer),
            other => Err(Error::Exec(format!(
                "{}: operation has no learnable parameter",
                other.kind_name()
            ))),
        }
    }

    /// Output for `x` without touching the caches. Dropout is the identity here.
    pub fn infer(&self, x: &Matrix) -> Result<Matrix> {
        match self {
            Operation::Activation(op) => Ok(op.infer(x)),
            Operation::Param(op) => op.infer(x),
            Operation::Const(op) => op.infer(x),
        }
    }

    /// True for operations usable as a layer's activation step.
    pub fn is_activation(&self) -> bool {
        match self {
            Operation::Activation(_) => true,
            Operation::Const(op) => op.is_activation(),
            Operation::Param(_) => false,
        }
    }

    pub fn as_param(&self) -> Option<&ParamOperation> {
        match self {
            Operation::Param(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<&ConstOperation> {
        match self {
            Operation::Const(op) => Some(op),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Operation::Activation(op) => op.activation.name(),
            Operation::Param(op) => op.kind().name(),
            Operation::Const(op) => op.kind().name(),
        }
    }

    fn cache(&self) -> &Cache {
        match self {
            Operation::Activation(op) => &op.cache,
            Operation::Param(op) => op.cache(),
            Operation::Const(op) => op.cache(),
        }
    }

    /// Input cached by the last `forward`.
    pub fn input(&self) -> Option<&Matrix> {
        self.cache().input()
    }

    /// Output cached by the last `forward`.
    pub fn output(&self) -> Option<&Matrix> {
        self.cache().output()
    }

    /// Output gradient cached by the last `backward`.
    pub fn output_gradient(&self) -> Option<&Matrix> {
        self.cache().output_gradient()
    }

    /// Input gradient cached by the last `backward`.
    pub fn input_gradient(&self) -> Option<&Matrix> {
        self.cache().input_gradient()
    }

    /// Same kind and configuration, parameters within `eps`.
    pub fn equal_approx(&self, other: &Operation, eps: f64) -> bool {
        match (self, other) {
            (Operation::Activation(a), Operation::Activation(b)) => a == b,
            (Operation::Param(a), Operation::Param(b)) => a.equal_approx(b, eps),
            (Operation::Const(a), Operation::Const(b)) => a.equal_approx(b, eps),
            _ => false,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Param(op) => write!(f, "{}[{}]", op.kind().name(), ShapeOf(op.param())),
            Operation::Const(op) => write!(f, "{op}"),
            Operation::Activation(op) => f.write_str(op.activation.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::tensor::EPSILON;

    #[test]
    fn backward_before_forward_is_exec_error() {
        let mut op = Operation::activation(Activation::Tanh);
        let err = op.backward(&Matrix::zeros(1, 2)).unwrap_err();
        assert!(matches!(err, Error::Exec(_)), "{err}");
    }

    #[test]
    fn activation_backward_rejects_mismatched_gradient() {
        let mut op = Operation::activation(Activation::Sigmoid);
        op.forward(&Matrix::zeros(2, 3)).unwrap();
        let err = op.backward(&Matrix::zeros(3, 2)).unwrap_err();
        assert!(matches!(err, Error::Exec(_)));
    }

    #[test]
    fn sigmoid_backward_uses_cached_output() {
        let mut op = Operation::activation(Activation::Sigmoid);
        let x = Matrix::row_vector(vec![0.0, 2.0]);
        let y = op.forward(&x).unwrap();
        let dy = Matrix::row_vector(vec![1.0, 3.0]);
        let dx = op.backward(&dy).unwrap();

        let s = crate::activation::sigmoid(2.0);
        let expected = Matrix::row_vector(vec![0.25, 3.0 * s * (1.0 - s)]);
        assert!(dx.approx_eq(&expected, 1e-12));
        assert_eq!(op.output(), Some(&y));
        assert_eq!(op.output_gradient(), Some(&dy));
        assert_eq!(op.input_gradient(), Some(&dx));
    }

    #[test]
    fn forward_caches_copies_not_aliases() {
        let mut op = Operation::activation(Activation::Linear);
        let mut x = Matrix::row_vector(vec![1.0, 2.0]);
        op.forward(&x).unwrap();
        x = x.scale(10.0);
        assert_eq!(op.input(), Some(&Matrix::row_vector(vec![1.0, 2.0])));
        assert_ne!(op.input(), Some(&x));
    }

    #[test]
    fn activation_has_no_parameter_to_optimize() {
        let mut op = Operation::activation(Activation::Tanh);
        let sgd = |p: &Matrix, _g: &Matrix| -> Result<Matrix> { Ok(p.clone()) };
        assert!(matches!(op.apply_optim(&sgd), Err(Error::Exec(_))));
    }

    #[test]
    fn clone_stays_equal_after_original_runs() {
        let mut op = Operation::activation(Activation::Tanh);
        let copy = op.clone();
        op.forward(&Matrix::row_vector(vec![0.5])).unwrap();
        op.backward(&Matrix::row_vector(vec![1.0])).unwrap();
        assert_eq!(op, copy);
        assert!(op.equal_approx(&copy, EPSILON));
        assert!(copy.output().is_none());
        assert!(!op.equal_approx(&Operation::activation(Activation::Sigmoid), EPSILON));
    }
}
