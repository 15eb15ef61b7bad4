//! Parameter initialization.
//!
//! - `Init::Default`: uniform noise in `[-1, 1)`.
//! - `Init::Glorot`: normal noise with variance `2 / (inputs + neurons)`.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand::distributions::{Distribution, Uniform};
use rand_distr::Normal;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, Matrix, Result};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Random initialization strategy for weights and biases.
pub enum Init {
    #[default]
    Default,
    Glorot,
}

impl Init {
    /// Random `rows x cols` matrix for a layer with `inputs` fan-in and `neurons` fan-out.
    pub fn sample<R: Rng + ?Sized>(
        self,
        rows: usize,
        cols: usize,
        inputs: usize,
        neurons: usize,
        rng: &mut R,
    ) -> Result<Matrix> {
        if rows.checked_mul(cols).is_none() {
            return Err(Error::Shape(format!("{rows}x{cols} overflows")));
        }
        match self {
            Init::Default => {
                let dist = Uniform::new(-1.0_f64, 1.0_f64);
                Ok(Matrix::from_fn(rows, cols, |_, _| dist.sample(rng)))
            }
            Init::Glorot => {
                let fan = inputs.saturating_add(neurons);
                if fan == 0 {
                    return Err(Error::Create(
                        "glorot init requires inputs + neurons > 0".to_owned(),
                    ));
                }
                let std_dev = (2.0 / fan as f64).sqrt();
                let dist = Normal::new(0.0, std_dev)
                    .map_err(|e| Error::Create(format!("glorot normal: {e}")))?;
                Ok(Matrix::from_fn(rows, cols, |_, _| dist.sample(rng)))
            }
        }
    }
}

impl fmt::Display for Init {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Init::Default => f.write_str("default"),
            Init::Glorot => f.write_str("glorot"),
        }
    }
}

impl FromStr for Init {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "uniform" => Ok(Init::Default),
            "glorot" | "xavier" => Ok(Init::Glorot),
            _ => Err(Error::fabric("init strategy", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn default_init_stays_in_unit_range() {
        let mut rng = StdRng::seed_from_u64(0);
        let m = Init::Default.sample(20, 30, 20, 30, &mut rng).unwrap();
        assert_eq!(m.shape(), (20, 30));
        assert!(m.as_slice().iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn glorot_variance_tracks_fan() {
        let mut rng = StdRng::seed_from_u64(7);
        let m = Init::Glorot.sample(100, 100, 100, 100, &mut rng).unwrap();
        let mean = m.mean();
        let var = m.as_slice().iter().map(|v| (v - mean).powi(2)).sum::<f64>() / m.len() as f64;
        // Expected variance 2 / 200 = 0.01.
        assert!((var - 0.01).abs() < 0.002, "variance {var}");
    }

    #[test]
    fn seeded_sampling_is_deterministic() {
        let a = Init::Glorot
            .sample(3, 4, 3, 4, &mut StdRng::seed_from_u64(11))
            .unwrap();
        let b = Init::Glorot
            .sample(3, 4, 3, 4, &mut StdRng::seed_from_u64(11))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn oversized_shape_is_an_error() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = Init::Default
            .sample(usize::MAX, 2, usize::MAX, 2, &mut rng)
            .unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }

    #[test]
    fn parses_names() {
        assert_eq!("xavier".parse::<Init>().unwrap(), Init::Glorot);
        assert!(matches!("he".parse::<Init>(), Err(Error::Fabric { .. })));
    }
}
