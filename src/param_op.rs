//! Operations owning a learnable parameter.
//!
//! - Weight multiply: `y = x·p`, `dx = dy·pᵗ`, `dp = xᵗ·dy`.
//! - Bias add: `y = x + p` (row broadcast), `dx = dy`, `dp = column-sum(dy)`.
//!
//! Broadcasting the bias row over every input row means each row contributes one
//! gradient term, hence the column sum.

use crate::operation::Cache;
use crate::optim::OptimizerFn;
use crate::tensor::ShapeOf;
use crate::{Error, Matrix, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Weight,
    Bias,
}

impl ParamKind {
    pub fn name(self) -> &'static str {
        match self {
            ParamKind::Weight => "weight",
            ParamKind::Bias => "bias",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamOperation {
    kind: ParamKind,
    p: Matrix,
    dp: Option<Matrix>,
    cache: Cache,
}

impl ParamOperation {
    /// Weight matrix of shape `(inputs, neurons)`.
    pub fn weight(p: Matrix) -> Result<Self> {
        if p.is_empty() {
            return Err(Error::Create(format!(
                "weight parameter must be non-empty, got {}",
                ShapeOf(&p)
            )));
        }
        Ok(Self::with_kind(ParamKind::Weight, p))
    }

    /// Bias row of shape `(1, neurons)`.
    pub fn bias(p: Matrix) -> Result<Self> {
        if p.rows() != 1 || p.cols() == 0 {
            return Err(Error::Create(format!(
                "bias parameter must be a 1xN row, got {}",
                ShapeOf(&p)
            )));
        }
        Ok(Self::with_kind(ParamKind::Bias, p))
    }

    fn with_kind(kind: ParamKind, p: Matrix) -> Self {
        Self {
            kind,
            p,
            dp: None,
            cache: Cache::default(),
        }
    }

    #[inline]
    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    /// Defensive copy of the parameter.
    pub fn parameter(&self) -> Matrix {
        self.p.clone()
    }

    #[inline]
    pub(crate) fn param(&self) -> &Matrix {
        &self.p
    }

    /// Parameter gradient from the last `backward`.
    #[inline]
    pub fn param_gradient(&self) -> Option<&Matrix> {
        self.dp.as_ref()
    }

    /// Expected input width.
    #[inline]
    pub fn inputs(&self) -> usize {
        match self.kind {
            ParamKind::Weight => self.p.rows(),
            ParamKind::Bias => self.p.cols(),
        }
    }

    /// Output width.
    #[inline]
    pub fn neurons(&self) -> usize {
        self.p.cols()
    }

    #[inline]
    pub(crate) fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn infer(&self, x: &Matrix) -> Result<Matrix> {
        let y = match self.kind {
            ParamKind::Weight => x.matmul(&self.p),
            ParamKind::Bias => x.add_row(&self.p),
        };
        y.map_err(|e| e.into_exec(format!("{} forward", self.kind.name())))
    }

    pub fn forward(&mut self, x: &Matrix) -> Result<Matrix> {
        let y = self.infer(x)?;
        self.cache.store_forward(x, &y);
        self.dp = None;
        Ok(y)
    }

    pub fn backward(&mut self, dy: &Matrix) -> Result<Matrix> {
        let op = self.kind.name();
        let (x, _) = self.cache.begin_backward(dy, op)?;

        let (dp, dx) = match self.kind {
            ParamKind::Weight => (x.t_matmul(dy), dy.matmul_t(&self.p)),
            ParamKind::Bias => (Ok(dy.sum_cols()), Ok(dy.clone())),
        };
        let dp = dp.map_err(|e| e.into_exec(format!("{op} parameter gradient")))?;
        let dx = dx.map_err(|e| e.into_exec(format!("{op} input gradient")))?;

        if !dp.same_shape(&self.p) {
            return Err(Error::Exec(format!(
                "{op}: parameter gradient is {}, parameter is {}",
                ShapeOf(&dp),
                ShapeOf(&self.p)
            )));
        }
        self.cache.finish_backward(dy, &dx, op)?;
        self.dp = Some(dp);
        Ok(dx)
    }

    /// Replace the parameter with `optimizer(p, dp)`.
    pub fn apply_optim(&mut self, optimizer: &OptimizerFn) -> Result<()> {
        let op = self.kind.name();
        let dp = self
            .dp
            .as_ref()
            .ok_or_else(|| Error::Exec(format!("{op}: apply_optim called before backward")))?;

        let next = optimizer(&self.p, dp).map_err(|e| e.into_exec(format!("{op} optimizer")))?;
        if !next.same_shape(&self.p) {
            return Err(Error::Exec(format!(
                "{op}: optimizer returned {}, parameter is {}",
                ShapeOf(&next),
                ShapeOf(&self.p)
            )));
        }
        self.p = next;
        Ok(())
    }

    pub fn equal_approx(&self, other: &ParamOperation, eps: f64) -> bool {
        self.kind == other.kind && self.p.approx_eq(&other.p, eps)
    }
}

impl PartialEq for ParamOperation {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.p == other.p
    }
}
