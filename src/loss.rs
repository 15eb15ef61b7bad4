//! Loss functions.
//!
//! [`LossKind`] is the stateless formula; [`Loss`] wraps it with the targets/outputs of the
//! last `forward` so that `backward` can produce `dL/d(outputs)` for the network.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::tensor::ShapeOf;
use crate::{Error, Matrix, Result};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Supported loss functions.
pub enum LossKind {
    /// Mean squared error, `0.5 * mean((y - t)^2)`.
    #[default]
    Mse,
    /// Mean absolute error, `mean(|y - t|)`.
    Mae,
}

impl LossKind {
    pub fn name(self) -> &'static str {
        match self {
            LossKind::Mse => "mse",
            LossKind::Mae => "mae",
        }
    }

    fn check(targets: &Matrix, outputs: &Matrix) -> Result<()> {
        if !targets.same_shape(outputs) {
            return Err(Error::Exec(format!(
                "loss: targets are {}, outputs are {}",
                ShapeOf(targets),
                ShapeOf(outputs)
            )));
        }
        if targets.is_empty() {
            return Err(Error::Exec("loss: empty batch".to_owned()));
        }
        Ok(())
    }

    /// Loss value for `outputs` against `targets`.
    pub fn value(self, targets: &Matrix, outputs: &Matrix) -> Result<f64> {
        Self::check(targets, outputs)?;
        let n = outputs.len() as f64;
        let pairs = outputs.as_slice().iter().zip(targets.as_slice());
        let total = match self {
            LossKind::Mse => 0.5 * pairs.map(|(y, t)| (y - t) * (y - t)).sum::<f64>(),
            LossKind::Mae => pairs.map(|(y, t)| (y - t).abs()).sum::<f64>(),
        };
        Ok(total / n)
    }

    /// `dL/d(outputs)`.
    ///
    /// MAE uses the subgradient 0 where `outputs == targets`.
    pub fn gradient(self, targets: &Matrix, outputs: &Matrix) -> Result<Matrix> {
        Self::check(targets, outputs)?;
        let inv_n = 1.0 / outputs.len() as f64;
        outputs.zip_map(targets, self.name(), |y, t| match self {
            LossKind::Mse => (y - t) * inv_n,
            LossKind::Mae => {
                let diff = y - t;
                if diff > 0.0 {
                    inv_n
                } else if diff < 0.0 {
                    -inv_n
                } else {
                    0.0
                }
            }
        })
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mse" | "mean_squared_error" => Ok(LossKind::Mse),
            "mae" | "mean_absolute_error" => Ok(LossKind::Mae),
            _ => Err(Error::fabric("loss", s)),
        }
    }
}

/// Orders losses with NaN after every number.
pub(crate) fn compare_losses(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// A loss with the operands of its last `forward`.
#[derive(Debug, Clone, Default)]
pub struct Loss {
    kind: LossKind,
    last: Option<(Matrix, Matrix)>,
}

impl Loss {
    pub fn new(kind: LossKind) -> Self {
        Self { kind, last: None }
    }

    #[inline]
    pub fn kind(&self) -> LossKind {
        self.kind
    }

    /// Loss value; remembers both operands for `backward`.
    pub fn forward(&mut self, targets: &Matrix, outputs: &Matrix) -> Result<f64> {
        let value = self.kind.value(targets, outputs)?;
        self.last = Some((targets.clone(), outputs.clone()));
        Ok(value)
    }

    /// `dL/d(outputs)` for the last `forward`.
    pub fn backward(&self) -> Result<Matrix> {
        let (targets, outputs) = self
            .last
            .as_ref()
            .ok_or_else(|| Error::Exec("loss: backward called before forward".to_owned()))?;
        self.kind.gradient(targets, outputs)
    }
}

impl PartialEq for Loss {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}
