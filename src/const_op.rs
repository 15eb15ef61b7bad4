//! Operations with auxiliary, non-learned tensors.
//!
//! `p[0]` holds:
//! - dropout: the keep-mask drawn by the most recent `forward` (empty before the first one);
//! - parametrized sigmoid: the constant `1 x neurons` coefficient row.
//!
//! Dropout draws a fresh Bernoulli mask on every `forward` and `backward` routes the
//! gradient through that same mask, so only the neurons kept in the forward pass receive
//! gradient.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::activation::sigmoid;
use crate::operation::Cache;
use crate::tensor::ShapeOf;
use crate::{Error, Matrix, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstKind {
    Dropout { keep_probability: f64 },
    SigmoidParam,
}

impl ConstKind {
    pub fn name(self) -> &'static str {
        match self {
            ConstKind::Dropout { .. } => "dropout",
            ConstKind::SigmoidParam => "sigmoid-param",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConstOperation {
    kind: ConstKind,
    p: Vec<Matrix>,
    rng: StdRng,
    cache: Cache,
}

impl ConstOperation {
    /// Dropout seeded from OS entropy.
    pub fn dropout(keep_probability: f64) -> Result<Self> {
        Self::dropout_with_rng(keep_probability, StdRng::from_entropy())
    }

    /// Dropout with a deterministic mask sequence.
    pub fn dropout_with_seed(keep_probability: f64, seed: u64) -> Result<Self> {
        Self::dropout_with_rng(keep_probability, StdRng::seed_from_u64(seed))
    }

    /// Dropout that keeps every element.
    pub(crate) fn keep_all(seed: u64) -> Self {
        Self {
            kind: ConstKind::Dropout {
                keep_probability: 1.0,
            },
            p: vec![Matrix::default()],
            rng: StdRng::seed_from_u64(seed),
            cache: Cache::default(),
        }
    }

    fn dropout_with_rng(keep_probability: f64, rng: StdRng) -> Result<Self> {
        if !(keep_probability.is_finite() && keep_probability > 0.0 && keep_probability <= 1.0) {
            return Err(Error::Create(format!(
                "dropout keep probability must be in (0, 1], got {keep_probability}"
            )));
        }
        Ok(Self {
            kind: ConstKind::Dropout { keep_probability },
            p: vec![Matrix::default()],
            rng,
            cache: Cache::default(),
        })
    }

    /// Parametrized sigmoid with a `1 x neurons` coefficient row.
    pub fn sigmoid_param(coeffs: Matrix) -> Result<Self> {
        if coeffs.rows() != 1 || coeffs.cols() == 0 {
            return Err(Error::Create(format!(
                "sigmoid coefficients must be a 1xN row, got {}",
                ShapeOf(&coeffs)
            )));
        }
        if !coeffs.is_finite() {
            return Err(Error::Create(
                "sigmoid coefficients must be finite".to_owned(),
            ));
        }
        Ok(Self {
            kind: ConstKind::SigmoidParam,
            p: vec![coeffs],
            rng: StdRng::seed_from_u64(0),
            cache: Cache::default(),
        })
    }

    /// `neurons` coefficients linearly spaced over `[1, 4]`.
    pub fn default_coefficients(neurons: usize) -> Matrix {
        let values = match neurons {
            0 => Vec::new(),
            1 => vec![1.0],
            n => (0..n)
                .map(|i| 1.0 + 3.0 * i as f64 / (n - 1) as f64)
                .collect(),
        };
        Matrix::row_vector(values)
    }

    #[inline]
    pub fn kind(&self) -> ConstKind {
        self.kind
    }

    /// Auxiliary tensors, read-only.
    #[inline]
    pub fn params(&self) -> &[Matrix] {
        &self.p
    }

    pub fn is_activation(&self) -> bool {
        matches!(self.kind, ConstKind::SigmoidParam)
    }

    /// Coefficient count for a parametrized sigmoid.
    pub fn neurons(&self) -> Option<usize> {
        match self.kind {
            ConstKind::SigmoidParam => Some(self.p[0].cols()),
            ConstKind::Dropout { .. } => None,
        }
    }

    #[inline]
    pub(crate) fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn infer(&self, x: &Matrix) -> Result<Matrix> {
        match self.kind {
            ConstKind::Dropout { .. } => Ok(x.clone()),
            ConstKind::SigmoidParam => x
                .mul_row(&self.p[0])
                .map(|z| z.map(sigmoid))
                .map_err(|e| e.into_exec("sigmoid-param forward")),
        }
    }

    pub fn forward(&mut self, x: &Matrix) -> Result<Matrix> {
        let y = match self.kind {
            ConstKind::Dropout { keep_probability } => {
                let rng = &mut self.rng;
                let mask = Matrix::from_fn(x.rows(), x.cols(), |_, _| {
                    if rng.gen_bool(keep_probability) {
                        1.0
                    } else {
                        0.0
                    }
                });
                let y = x
                    .hadamard(&mask)
                    .map_err(|e| e.into_exec("dropout forward"))?;
                self.p[0] = mask;
                y
            }
            ConstKind::SigmoidParam => self.infer(x)?,
        };
        self.cache.store_forward(x, &y);
        Ok(y)
    }

    pub fn backward(&mut self, dy: &Matrix) -> Result<Matrix> {
        let op = self.kind.name();
        let (_, y) = self.cache.begin_backward(dy, op)?;

        let dx = match self.kind {
            ConstKind::Dropout { .. } => dy.hadamard(&self.p[0]),
            ConstKind::SigmoidParam => dy
                .zip_map(y, op, |g, out| g * out * (1.0 - out))
                .and_then(|dz| dz.mul_row(&self.p[0])),
        }
        .map_err(|e| e.into_exec(format!("{op} backward")))?;

        self.cache.finish_backward(dy, &dx, op)?;
        Ok(dx)
    }

    pub fn equal_approx(&self, other: &ConstOperation, eps: f64) -> bool {
        match (self.kind, other.kind) {
            (
                ConstKind::Dropout { keep_probability: a },
                ConstKind::Dropout { keep_probability: b },
            ) => (a - b).abs() <= eps,
            (ConstKind::SigmoidParam, ConstKind::SigmoidParam) => {
                self.p[0].approx_eq(&other.p[0], eps)
            }
            _ => false,
        }
    }
}

impl PartialEq for ConstOperation {
    fn eq(&self, other: &Self) -> bool {
        match (self.kind, other.kind) {
            (ConstKind::SigmoidParam, ConstKind::SigmoidParam) => self.p[0] == other.p[0],
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for ConstOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConstKind::Dropout { keep_probability } => write!(f, "dropout({keep_probability})"),
            ConstKind::SigmoidParam => write!(f, "sigmoid-param[{}]", self.p[0].cols()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::tensor::EPSILON;

    fn zero_pattern(m: &Matrix) -> Vec<bool> {
        m.as_slice().iter().map(|&v| v == 0.0).collect()
    }

    #[test]
    fn dropout_draws_a_fresh_mask_per_forward() {
        let mut op = ConstOperation::dropout_with_seed(0.5, 42).unwrap();
        let x = Matrix::filled(8, 16, 1.0);
        let a = op.forward(&x).unwrap();
        let b = op.forward(&x).unwrap();
        assert_ne!(zero_pattern(&a), zero_pattern(&b));
    }

    #[test]
    fn dropout_backward_reuses_the_forward_mask() {
        let mut op = ConstOperation::dropout_with_seed(0.5, 3).unwrap();
        let x = Matrix::filled(4, 10, 2.0);
        let y = op.forward(&x).unwrap();
        let dx = op.backward(&Matrix::filled(4, 10, 5.0)).unwrap();

        assert_eq!(zero_pattern(&y), zero_pattern(&dx));
        assert!(dx.as_slice().iter().all(|&v| v == 0.0 || v == 5.0));
        assert_eq!(op.params()[0], y.scale(0.5));
    }

    #[test]
    fn always_keep_dropout_is_identity() {
        let mut op = ConstOperation::dropout(1.0).unwrap();
        let x = Matrix::from_fn(3, 3, |r, c| (r * 3 + c) as f64 + 1.0);
        assert_eq!(op.forward(&x).unwrap(), x);
    }

    #[test]
    fn dropout_validates_probability() {
        for p in [0.0, -0.1, 1.5, f64::NAN] {
            assert!(matches!(
                ConstOperation::dropout(p),
                Err(Error::Create(_))
            ));
        }
    }

    #[test]
    fn dropout_infer_does_not_drop() {
        let op = ConstOperation::dropout_with_seed(0.1, 0).unwrap();
        let x = Matrix::filled(2, 2, 3.0);
        assert_eq!(op.infer(&x).unwrap(), x);
    }

    #[test]
    fn default_coefficients_span_one_to_four() {
        let c = ConstOperation::default_coefficients(4);
        assert_eq!(c, Matrix::row_vector(vec![1.0, 2.0, 3.0, 4.0]));
        assert_eq!(
            ConstOperation::default_coefficients(1),
            Matrix::row_vector(vec![1.0])
        );
    }

    #[test]
    fn sigmoid_param_forward_and_backward() {
        let coeffs = Matrix::row_vector(vec![1.0, 2.0]);
        let mut op = ConstOperation::sigmoid_param(coeffs).unwrap();
        let x = Matrix::row_vector(vec![0.5, -0.25]);
        let y = op.forward(&x).unwrap();

        let s0 = sigmoid(0.5);
        let s1 = sigmoid(-0.5);
        assert!(y.approx_eq(&Matrix::row_vector(vec![s0, s1]), 1e-12));

        let dx = op.backward(&Matrix::row_vector(vec![1.0, 1.0])).unwrap();
        let expected = Matrix::row_vector(vec![s0 * (1.0 - s0), 2.0 * s1 * (1.0 - s1)]);
        assert!(dx.approx_eq(&expected, 1e-12));
    }

    #[test]
    fn sigmoid_param_matches_numeric_gradient() {
        let coeffs = Matrix::row_vector(vec![1.5, 3.0]);
        let mut op = ConstOperation::sigmoid_param(coeffs).unwrap();
        let x = Matrix::row_vector(vec![0.2, -0.4]);
        op.forward(&x).unwrap();
        let dx = op.backward(&Matrix::row_vector(vec![1.0, 1.0])).unwrap();

        let eps = 1e-6;
        for i in 0..2 {
            let shift = |d: f64| {
                Matrix::from_fn(1, 2, |_, c| if c == i { x.row(0)[c] + d } else { x.row(0)[c] })
            };
            let plus = op.infer(&shift(eps)).unwrap();
            let minus = op.infer(&shift(-eps)).unwrap();
            let numeric = (plus.row(0)[i] - minus.row(0)[i]) / (2.0 * eps);
            assert!((numeric - dx.row(0)[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn equality_ignores_masks() {
        let mut op = ConstOperation::dropout_with_seed(0.5, 1).unwrap();
        let copy = op.clone();
        op.forward(&Matrix::filled(2, 2, 1.0)).unwrap();
        op.backward(&Matrix::filled(2, 2, 1.0)).unwrap();
        assert_eq!(op, copy);
        assert!(op.equal_approx(&copy, EPSILON));

        let other = ConstOperation::dropout(0.25).unwrap();
        assert_ne!(op, other);
        let sig = ConstOperation::sigmoid_param(Matrix::row_vector(vec![1.0])).unwrap();
        assert!(!op.equal_approx(&sig, EPSILON));
    }
}
