//! Datasets.
//!
//! A [`Split`] is a row-aligned `(x, y)` pair of matrices. A [`Dataset`] holds three
//! non-empty splits: `train` (fitted), `tests` (checkpoint selection during training) and
//! `valid` (final live-vs-checkpoint comparison).

use rand::Rng;
use rand::seq::SliceRandom;

use crate::tensor::ShapeOf;
use crate::{Error, Matrix, Result};

/// Inputs and targets with one sample per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    x: Matrix,
    y: Matrix,
}

impl Split {
    pub fn new(x: Matrix, y: Matrix) -> Result<Self> {
        if x.rows() != y.rows() {
            return Err(Error::Data(format!(
                "inputs {} and targets {} have different sample counts",
                ShapeOf(&x),
                ShapeOf(&y)
            )));
        }
        Ok(Self { x, y })
    }

    /// Build from per-sample rows.
    ///
    /// This is a convenience constructor (it copies into contiguous storage).
    pub fn from_rows(x: &[Vec<f64>], y: &[Vec<f64>]) -> Result<Self> {
        let x = Matrix::from_rows(x).map_err(|e| Error::Data(format!("inputs: {e}")))?;
        let y = Matrix::from_rows(y).map_err(|e| Error::Data(format!("targets: {e}")))?;
        Self::new(x, y)
    }

    #[inline]
    pub fn x(&self) -> &Matrix {
        &self.x
    }

    #[inline]
    pub fn y(&self) -> &Matrix {
        &self.y
    }

    /// Number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.rows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.rows() == 0
    }

    fn select(&self, indices: &[usize]) -> Result<Split> {
        Ok(Self {
            x: self.x.select_rows(indices)?,
            y: self.y.select_rows(indices)?,
        })
    }

    fn slice(&self, start: usize, end: usize) -> Result<Split> {
        Ok(Self {
            x: self.x.slice_rows(start..end)?,
            y: self.y.slice_rows(start..end)?,
        })
    }

    /// Reordered copy plus the row permutation used to build it.
    pub fn shuffled<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<(Split, Vec<usize>)> {
        let mut perm: Vec<usize> = (0..self.len()).collect();
        perm.shuffle(rng);
        Ok((self.select(&perm)?, perm))
    }

    /// Consecutive mini-batches of `size` samples; the last one may be shorter.
    ///
    /// `size == 0` yields no batches.
    pub fn batches(&self, size: usize) -> Batches<'_> {
        Batches {
            split: self,
            size,
            next: 0,
        }
    }
}

/// Iterator returned by [`Split::batches`].
#[derive(Debug)]
pub struct Batches<'a> {
    split: &'a Split,
    size: usize,
    next: usize,
}

impl Iterator for Batches<'_> {
    type Item = Result<Split>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.size == 0 || self.next >= self.split.len() {
            return None;
        }
        let start = self.next;
        let end = (start + self.size).min(self.split.len());
        self.next = end;
        Some(self.split.slice(start, end))
    }
}

/// Train/tests/valid splits of one problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub train: Split,
    pub tests: Split,
    pub valid: Split,
}

impl Dataset {
    /// Build from explicit splits. All splits must be non-empty with matching widths.
    pub fn new(train: Split, tests: Split, valid: Split) -> Result<Self> {
        for (name, split) in [("train", &train), ("tests", &tests), ("valid", &valid)] {
            if split.is_empty() {
                return Err(Error::Data(format!("{name} split must not be empty")));
            }
            if split.x.cols() != train.x.cols() || split.y.cols() != train.y.cols() {
                return Err(Error::Data(format!(
                    "{name} split is {} -> {}, train is {} -> {}",
                    ShapeOf(&split.x),
                    ShapeOf(&split.y),
                    ShapeOf(&train.x),
                    ShapeOf(&train.y)
                )));
            }
        }
        Ok(Self {
            train,
            tests,
            valid,
        })
    }

    /// Split `(x, y)` in row order by the `(train, tests)` fractions; `valid` takes the rest.
    pub fn split(x: Matrix, y: Matrix, train: f64, tests: f64) -> Result<Self> {
        if !(train > 0.0 && tests > 0.0 && train + tests < 1.0) {
            return Err(Error::Data(format!(
                "split fractions must be positive and sum below 1, got {train} + {tests}"
            )));
        }
        let all = Split::new(x, y)?;
        let n = all.len();
        let n_train = (n as f64 * train).round() as usize;
        let n_tests = (n as f64 * tests).round() as usize;
        if n_train == 0 || n_tests == 0 || n_train + n_tests >= n {
            return Err(Error::Data(format!(
                "{n} samples cannot be split {train}/{tests} into non-empty parts"
            )));
        }
        Self::new(
            all.slice(0, n_train)?,
            all.slice(n_train, n_train + n_tests)?,
            all.slice(n_train + n_tests, n)?,
        )
    }

    /// All samples in train, tests, valid order.
    pub fn combine(&self) -> Result<Split> {
        Split::new(
            Matrix::vstack(&[&self.train.x, &self.tests.x, &self.valid.x])?,
            Matrix::vstack(&[&self.train.y, &self.tests.y, &self.valid.y])?,
        )
    }

    pub fn input_dim(&self) -> usize {
        self.train.x.cols()
    }

    pub fn target_dim(&self) -> usize {
        self.train.y.cols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn column(values: impl Iterator<Item = f64>) -> Matrix {
        Matrix::from_rows(&values.map(|v| vec![v]).collect::<Vec<_>>()).unwrap()
    }

    fn counting(n: usize) -> Split {
        let x = column((0..n).map(|i| i as f64));
        let y = column((0..n).map(|i| 10.0 * i as f64));
        Split::new(x, y).unwrap()
    }

    #[test]
    fn split_rejects_misaligned_rows() {
        assert!(matches!(
            Split::new(Matrix::zeros(3, 2), Matrix::zeros(2, 1)),
            Err(Error::Data(_))
        ));
    }

    #[test]
    fn shuffle_keeps_pairs_aligned_and_reports_permutation() {
        let split = counting(20);
        let mut rng = StdRng::seed_from_u64(5);
        let (shuffled, perm) = split.shuffled(&mut rng).unwrap();

        let mut sorted = perm.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
        for (row, &src) in perm.iter().enumerate() {
            assert_eq!(shuffled.x().row(row)[0], src as f64);
            assert_eq!(shuffled.y().row(row)[0], 10.0 * src as f64);
        }
    }

    #[test]
    fn batches_cover_every_sample_once() {
        let split = counting(7);
        let sizes: Vec<usize> = split.batches(3).map(|b| b.unwrap().len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(split.batches(0).count(), 0);
    }

    #[test]
    fn split_by_fraction_and_combine_round_trip() {
        let all = counting(10);
        let ds = Dataset::split(all.x().clone(), all.y().clone(), 0.6, 0.2).unwrap();
        assert_eq!(
            (ds.train.len(), ds.tests.len(), ds.valid.len()),
            (6, 2, 2)
        );
        assert_eq!(ds.combine().unwrap(), all);
    }

    #[test]
    fn dataset_requires_non_empty_compatible_splits() {
        let s = counting(4);
        let empty = Split::new(Matrix::zeros(0, 1), Matrix::zeros(0, 1)).unwrap();
        assert!(Dataset::new(s.clone(), empty, s.clone()).is_err());

        let wide = Split::new(Matrix::zeros(2, 3), Matrix::zeros(2, 1)).unwrap();
        assert!(Dataset::new(s.clone(), wide, s.clone()).is_err());
        assert!(Dataset::split(s.x().clone(), s.y().clone(), 0.9, 0.2).is_err());
    }
}
