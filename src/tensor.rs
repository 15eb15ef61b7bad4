//! Dense row-major matrix kernel.
//!
//! Everything the operations need and nothing more: shape-checked elementwise math,
//! row broadcasting, products (optionally against a transposed operand), column sums,
//! row slicing/permutation and epsilon comparison. Vectors are `1 x n` row matrices.

use std::fmt;
use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::matmul::gemm_f64;
use crate::{Error, Result};

/// Default tolerance for approximate equality.
pub const EPSILON: f64 = 1e-6;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    /// Row-major, `rows * cols` values.
    data: Vec<f64>,
}

impl Matrix {
    /// Build from a flat row-major buffer.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        let expected = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::Shape(format!("{rows}x{cols} overflows")))?;
        if data.len() != expected {
            return Err(Error::Shape(format!(
                "buffer of {} values cannot be {rows}x{cols}",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// All-zero `rows x cols` matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, 0.0)
    }

    /// `rows x cols` matrix with every entry set to `value`.
    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Build from per-row vectors; every row must have the same length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(Error::Shape(format!(
                    "row {i} has {} values, expected {cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    /// Entry `(r, c)` is `f(r, c)`, filled row by row.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    /// A `1 x n` matrix.
    pub fn row_vector(values: Vec<f64>) -> Self {
        Self {
            rows: 1,
            cols: values.len(),
            data: values,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major view of the values.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Value at `(r, c)`; `None` when out of bounds.
    pub fn get(&self, r: usize, c: usize) -> Option<f64> {
        if r < self.rows && c < self.cols {
            Some(self.data[r * self.cols + c])
        } else {
            None
        }
    }

    /// Returns the `r`-th row. Panics if `r >= rows`.
    #[inline]
    pub fn row(&self, r: usize) -> &[f64] {
        let start = r * self.cols;
        &self.data[start..start + self.cols]
    }

    #[inline]
    pub fn same_shape(&self, other: &Matrix) -> bool {
        self.shape() == other.shape()
    }

    fn check_same_shape(&self, other: &Matrix, op: &str) -> Result<()> {
        if !self.same_shape(other) {
            return Err(Error::Shape(format!(
                "{op}: {} vs {}",
                ShapeOf(self),
                ShapeOf(other)
            )));
        }
        Ok(())
    }

    fn check_row_broadcast(&self, row: &Matrix, op: &str) -> Result<()> {
        if row.rows != 1 || row.cols != self.cols {
            return Err(Error::Shape(format!(
                "{op}: cannot broadcast {} over {}",
                ShapeOf(row),
                ShapeOf(self)
            )));
        }
        Ok(())
    }

    /// Elementwise combination of two same-shaped matrices.
    pub fn zip_map(
        &self,
        other: &Matrix,
        op: &str,
        mut f: impl FnMut(f64, f64) -> f64,
    ) -> Result<Matrix> {
        self.check_same_shape(other, op)?;
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    pub fn add(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_map(other, "add", |a, b| a + b)
    }

    pub fn sub(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_map(other, "sub", |a, b| a - b)
    }

    /// Elementwise product.
    pub fn hadamard(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_map(other, "hadamard", |a, b| a * b)
    }

    /// Every entry multiplied by `k`.
    pub fn scale(&self, k: f64) -> Matrix {
        self.map(|v| v * k)
    }

    /// Apply `f` to every entry.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Matrix {
        Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Adds the `1 x cols` row `row` to every row.
    pub fn add_row(&self, row: &Matrix) -> Result<Matrix> {
        self.check_row_broadcast(row, "add_row")?;
        Ok(self.broadcast_row(row, |a, b| a + b))
    }

    /// Multiplies every row elementwise by the `1 x cols` row `row`.
    pub fn mul_row(&self, row: &Matrix) -> Result<Matrix> {
        self.check_row_broadcast(row, "mul_row")?;
        Ok(self.broadcast_row(row, |a, b| a * b))
    }

    fn broadcast_row(&self, row: &Matrix, f: impl Fn(f64, f64) -> f64) -> Matrix {
        let mut data = Vec::with_capacity(self.data.len());
        for r in 0..self.rows {
            data.extend(self.row(r).iter().zip(&row.data).map(|(&a, &b)| f(a, b)));
        }
        Self {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }

    /// `self · other`.
    pub fn matmul(&self, other: &Matrix) -> Result<Matrix> {
        if self.cols != other.rows {
            return Err(Error::Shape(format!(
                "matmul: {} · {}",
                ShapeOf(self),
                ShapeOf(other)
            )));
        }
        let (m, k, n) = (self.rows, self.cols, other.cols);
        let mut out = Matrix::zeros(m, n);
        gemm_f64(
            m,
            n,
            k,
            1.0,
            &self.data,
            k,
            1,
            &other.data,
            n,
            1,
            0.0,
            &mut out.data,
            n,
            1,
        );
        Ok(out)
    }

    /// `self · otherᵗ`.
    pub fn matmul_t(&self, other: &Matrix) -> Result<Matrix> {
        if self.cols != other.cols {
            return Err(Error::Shape(format!(
                "matmul_t: {} · {}ᵗ",
                ShapeOf(self),
                ShapeOf(other)
            )));
        }
        let (m, k, n) = (self.rows, self.cols, other.rows);
        let mut out = Matrix::zeros(m, n);
        // otherᵗ is (k x n) with row stride 1 and column stride k.
        gemm_f64(
            m,
            n,
            k,
            1.0,
            &self.data,
            k,
            1,
            &other.data,
            1,
            k,
            0.0,
            &mut out.data,
            n,
            1,
        );
        Ok(out)
    }

    /// `selfᵗ · other`.
    pub fn t_matmul(&self, other: &Matrix) -> Result<Matrix> {
        if self.rows != other.rows {
            return Err(Error::Shape(format!(
                "t_matmul: {}ᵗ · {}",
                ShapeOf(self),
                ShapeOf(other)
            )));
        }
        let (m, k, n) = (self.cols, self.rows, other.cols);
        let mut out = Matrix::zeros(m, n);
        // selfᵗ is (m x k) with row stride 1 and column stride m.
        gemm_f64(
            m,
            n,
            k,
            1.0,
            &self.data,
            1,
            m,
            &other.data,
            n,
            1,
            0.0,
            &mut out.data,
            n,
            1,
        );
        Ok(out)
    }

    /// New `cols x rows` matrix.
    pub fn transpose(&self) -> Matrix {
        Matrix::from_fn(self.cols, self.rows, |r, c| self.data[c * self.cols + r])
    }

    /// Column-wise sum as a `1 x cols` row.
    pub fn sum_cols(&self) -> Matrix {
        let mut sums = vec![0.0; self.cols];
        for r in 0..self.rows {
            for (acc, &v) in sums.iter_mut().zip(self.row(r)) {
                *acc += v;
            }
        }
        Matrix::row_vector(sums)
    }

    /// Mean over all elements (0 for an empty matrix).
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f64>() / self.data.len() as f64
    }

    /// Copy of the rows in `range`.
    pub fn slice_rows(&self, range: Range<usize>) -> Result<Matrix> {
        if range.start > range.end || range.end > self.rows {
            return Err(Error::Shape(format!(
                "rows {}..{} out of bounds for {}",
                range.start,
                range.end,
                ShapeOf(self)
            )));
        }
        Ok(Self {
            rows: range.len(),
            cols: self.cols,
            data: self.data[range.start * self.cols..range.end * self.cols].to_vec(),
        })
    }

    /// Gathers rows in the order given by `indices` (a permutation when shuffling).
    pub fn select_rows(&self, indices: &[usize]) -> Result<Matrix> {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            if i >= self.rows {
                return Err(Error::Shape(format!(
                    "row {i} out of bounds for {}",
                    ShapeOf(self)
                )));
            }
            data.extend_from_slice(self.row(i));
        }
        Ok(Self {
            rows: indices.len(),
            cols: self.cols,
            data,
        })
    }

    /// Stacks matrices with equal column counts on top of each other.
    pub fn vstack(parts: &[&Matrix]) -> Result<Matrix> {
        let cols = parts.first().map(|m| m.cols).unwrap_or(0);
        let mut rows = 0;
        let mut data = Vec::new();
        for part in parts {
            if part.cols != cols {
                return Err(Error::Shape(format!(
                    "vstack: {} has {} columns, expected {cols}",
                    ShapeOf(part),
                    part.cols
                )));
            }
            rows += part.rows;
            data.extend_from_slice(&part.data);
        }
        Ok(Self { rows, cols, data })
    }

    /// Same shape and every element within `eps`.
    pub fn approx_eq(&self, other: &Matrix, eps: f64) -> bool {
        self.same_shape(other)
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= eps)
    }

    /// True when no entry is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// Displays a matrix shape as `RxC`.
pub(crate) struct ShapeOf<'a>(pub(crate) &'a Matrix);

impl fmt::Display for ShapeOf<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.0.rows, self.0.cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(rows: &[&[f64]]) -> Matrix {
        Matrix::from_rows(&rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn new_validates_buffer_length() {
        assert!(Matrix::new(2, 2, vec![1.0; 4]).is_ok());
        assert!(matches!(
            Matrix::new(2, 2, vec![1.0; 3]),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn transposed_products_match_explicit_transpose() {
        let a = m(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        let b = m(&[&[7.0, 8.0, 9.0], &[1.0, 0.0, -1.0]]);

        assert_eq!(a.matmul_t(&b).unwrap(), a.matmul(&b.transpose()).unwrap());
        assert_eq!(a.t_matmul(&b).unwrap(), a.transpose().matmul(&b).unwrap());
        assert_eq!(
            a.matmul_t(&b).unwrap(),
            m(&[&[50.0, -2.0], &[122.0, -2.0]])
        );
    }

    #[test]
    fn matmul_rejects_inner_dim_mismatch() {
        let a = Matrix::zeros(2, 3);
        assert!(matches!(a.matmul(&a), Err(Error::Shape(_))));
    }

    #[test]
    fn row_broadcast_and_column_sum() {
        let x = m(&[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0]]);
        let row = Matrix::row_vector(vec![10.0, 100.0]);

        assert_eq!(
            x.add_row(&row).unwrap(),
            m(&[&[11.0, 102.0], &[13.0, 104.0], &[15.0, 106.0]])
        );
        assert_eq!(
            x.mul_row(&row).unwrap(),
            m(&[&[10.0, 200.0], &[30.0, 400.0], &[50.0, 600.0]])
        );
        assert_eq!(x.sum_cols(), Matrix::row_vector(vec![9.0, 12.0]));
        assert!(x.add_row(&Matrix::row_vector(vec![1.0])).is_err());
    }

    #[test]
    fn approx_eq_uses_inclusive_tolerance() {
        let a = Matrix::row_vector(vec![1.0, 2.0]);
        let close = Matrix::row_vector(vec![1.0 + 0.5e-6, 2.0]);
        let far = Matrix::row_vector(vec![1.0 + 1e-5, 2.0]);
        assert!(a.approx_eq(&close, EPSILON));
        assert!(!a.approx_eq(&far, EPSILON));
        assert!(!a.approx_eq(&Matrix::zeros(2, 1), EPSILON));
    }

    #[test]
    fn row_selection_and_stacking() {
        let x = m(&[&[1.0], &[2.0], &[3.0]]);
        assert_eq!(x.select_rows(&[2, 0]).unwrap(), m(&[&[3.0], &[1.0]]));
        assert!(x.select_rows(&[3]).is_err());
        assert_eq!(x.slice_rows(1..3).unwrap(), m(&[&[2.0], &[3.0]]));

        let top = x.slice_rows(0..1).unwrap();
        let bottom = x.slice_rows(1..3).unwrap();
        assert_eq!(Matrix::vstack(&[&top, &bottom]).unwrap(), x);
    }
}
