//! Optimizers.
//!
//! An optimizer is a pure update function `(param, grad) -> new_param`. Learning-rate
//! schedules are decoupled from it: [`new_sgd`] returns the update function together with
//! a post-optimize hook that advances the schedule. The training loop calls the hook once
//! per epoch, after every per-batch update of that epoch.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::logging::log_warn;
use crate::{Error, Logger, Matrix, Result};

/// Parameter update function.
pub type OptimizerFn = dyn Fn(&Matrix, &Matrix) -> Result<Matrix> + Send + Sync;

/// Owned optimizer.
pub type Optimizer = Box<OptimizerFn>;

/// Schedule hook run once per epoch.
pub type PostOptimize = Box<dyn FnMut() + Send>;

pub const DEFAULT_LEARN_RATE: f64 = 0.05;
pub const DEFAULT_STOP_RATE: f64 = 0.001;
pub const DEFAULT_DECAY_EPOCHS: usize = 1000;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Learning-rate decay shape.
pub enum Decay {
    /// Subtract a constant every epoch.
    #[default]
    Linear,
    /// Multiply by a constant every epoch.
    Exponential,
}

impl fmt::Display for Decay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decay::Linear => f.write_str("linear"),
            Decay::Exponential => f.write_str("exponential"),
        }
    }
}

impl FromStr for Decay {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Decay::Linear),
            "exponential" | "exp" => Ok(Decay::Exponential),
            _ => Err(Error::fabric("decay", s)),
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
/// SGD configuration. Unset fields take the defaults.
///
/// Setting `stop_rate`, `epochs` or `decay` requests a decay schedule; with none of them
/// set the learning rate stays constant.
pub struct SgdParameters {
    pub learn_rate: Option<f64>,
    pub stop_rate: Option<f64>,
    pub epochs: Option<usize>,
    pub decay: Option<Decay>,
}

impl SgdParameters {
    fn schedule_requested(&self) -> bool {
        self.stop_rate.is_some() || self.epochs.is_some() || self.decay.is_some()
    }

    /// Resolve defaults and correct degenerate configurations.
    fn resolve(&self, logger: &Logger) -> (f64, Schedule) {
        let mut learn_rate = self.learn_rate.unwrap_or(DEFAULT_LEARN_RATE);
        let mut stop_rate = self.stop_rate.unwrap_or(DEFAULT_STOP_RATE);

        if !(learn_rate.is_finite() && learn_rate > 0.0) {
            log_warn!(
                logger,
                "learn rate {learn_rate} is not positive; using default {DEFAULT_LEARN_RATE}"
            );
            learn_rate = DEFAULT_LEARN_RATE;
        }

        if !self.schedule_requested() {
            return (learn_rate, Schedule::Constant);
        }

        let epochs = match self.epochs {
            Some(0) => {
                log_warn!(
                    logger,
                    "decay epochs must be > 0; using default {DEFAULT_DECAY_EPOCHS}"
                );
                DEFAULT_DECAY_EPOCHS
            }
            Some(n) => n,
            None => DEFAULT_DECAY_EPOCHS,
        };

        if !(stop_rate.is_finite() && stop_rate > 0.0 && learn_rate > stop_rate) {
            log_warn!(
                logger,
                "learn rate {learn_rate} must exceed stop rate {stop_rate}; \
                 using defaults {DEFAULT_LEARN_RATE} -> {DEFAULT_STOP_RATE}"
            );
            learn_rate = DEFAULT_LEARN_RATE;
            stop_rate = DEFAULT_STOP_RATE;
        }

        let schedule = match self.decay.unwrap_or_default() {
            Decay::Linear => Schedule::Linear {
                delta: (learn_rate - stop_rate) / epochs as f64,
                stop: stop_rate,
            },
            Decay::Exponential => Schedule::Exponential {
                factor: (stop_rate / learn_rate).powf(1.0 / epochs as f64),
                stop: stop_rate,
            },
        };
        (learn_rate, schedule)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Schedule {
    Constant,
    Linear { delta: f64, stop: f64 },
    Exponential { factor: f64, stop: f64 },
}

impl Schedule {
    fn advance(self, rate: f64) -> f64 {
        match self {
            Schedule::Constant => rate,
            Schedule::Linear { delta, stop } => (rate - delta).max(stop),
            Schedule::Exponential { factor, stop } => (rate * factor).max(stop),
        }
    }
}

/// Plain SGD: `param - grad * learn_rate`.
///
/// The learning rate is read when the optimizer runs, so the returned hook must be called
/// after the epoch's updates, not before.
pub fn new_sgd(params: Option<SgdParameters>, logger: &Logger) -> (Optimizer, PostOptimize) {
    let (learn_rate, schedule) = params.unwrap_or_default().resolve(logger);
    let rate = Arc::new(Mutex::new(learn_rate));

    let optimizer: Optimizer = {
        let rate = Arc::clone(&rate);
        Box::new(move |param: &Matrix, grad: &Matrix| {
            let lr = *rate.lock();
            param.sub(&grad.scale(lr))
        })
    };

    let post_optimize: PostOptimize = Box::new(move || {
        let mut lr = rate.lock();
        *lr = schedule.advance(*lr);
    });

    (optimizer, post_optimize)
}
