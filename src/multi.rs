//! Repeated training runs with best-of selection.
//!
//! Each retry asks the providers for a fresh network, dataset and optimizer, trains once,
//! and the network with the lowest final loss wins. Ties go to the lower retry index, so the
//! winner does not depend on thread scheduling.
//!
//! In parallel mode retries run on a dedicated `rayon` pool and start in index order. The first failing retry stores
//! its error and raises a shared cancellation flag; retries still training stop at their
//! next epoch boundary and that first error is returned once all of them have finished.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::logging::log_info;
use crate::loss::compare_losses;
use crate::optim::{Optimizer, PostOptimize};
use crate::train::{TrainParameters, train};
use crate::{Dataset, Error, Logger, Network, Result};

/// Builds the network for a retry.
pub type NetworkProvider = Box<dyn Fn(usize) -> Result<Network> + Send + Sync>;

/// Builds the dataset for a retry.
pub type DatasetProvider = Box<dyn Fn(usize) -> Result<Dataset> + Send + Sync>;

/// Builds the optimizer and its schedule hook for a retry.
pub type OptimizerProvider =
    Box<dyn Fn(usize) -> Result<(Optimizer, PostOptimize)> + Send + Sync>;

/// Multi-run configuration. Providers receive the retry index.
pub struct MultiParameters {
    pub network: Option<NetworkProvider>,
    pub dataset: Option<DatasetProvider>,
    pub optimizer: Option<OptimizerProvider>,
    pub retries: usize,
    pub epochs: usize,
    pub batch_size: Option<usize>,
    /// Retry `i` shuffles with `seed + i`.
    pub seed: Option<u64>,
    pub parallel: bool,
    /// Pool size for parallel mode; `None` uses one thread per CPU.
    pub workers: Option<usize>,
    pub logger: Logger,
}

impl Default for MultiParameters {
    fn default() -> Self {
        Self {
            network: None,
            dataset: None,
            optimizer: None,
            retries: 1,
            epochs: 100,
            batch_size: None,
            seed: None,
            parallel: false,
            workers: None,
            logger: Logger::default(),
        }
    }
}

impl MultiParameters {
    pub fn validate(&self) -> Result<()> {
        if self.retries == 0 {
            return Err(Error::Parameters("retries must be > 0".to_owned()));
        }
        if self.epochs == 0 {
            return Err(Error::Parameters("epochs must be > 0".to_owned()));
        }
        if self.workers == Some(0) {
            return Err(Error::Parameters("workers must be > 0".to_owned()));
        }
        for (present, what) in [
            (self.network.is_some(), "network provider"),
            (self.dataset.is_some(), "dataset provider"),
            (self.optimizer.is_some(), "optimizer provider"),
        ] {
            if !present {
                return Err(Error::Parameters(format!("{what} is missing")));
            }
        }
        Ok(())
    }
}

/// One finished retry.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub network: Network,
    pub loss: f64,
}

#[derive(Debug, Clone)]
pub struct MultiOutcome {
    pub best: Network,
    pub best_loss: f64,
    pub best_retry: usize,
    /// Every retry, keyed by index.
    pub results: BTreeMap<usize, Attempt>,
}

#[derive(Default)]
struct Leaderboard {
    best: Option<(usize, f64)>,
    results: BTreeMap<usize, Attempt>,
}

impl Leaderboard {
    fn record(&mut self, retry: usize, attempt: Attempt) {
        let better = match self.best {
            None => true,
            Some((r, loss)) => {
                let order = compare_losses(attempt.loss, loss);
                order.is_lt() || (order.is_eq() && retry < r)
            }
        };
        if better {
            self.best = Some((retry, attempt.loss));
        }
        self.results.insert(retry, attempt);
    }

    fn finish(self) -> Result<MultiOutcome> {
        let (best_retry, best_loss) = self
            .best
            .ok_or_else(|| Error::Exec("no retry finished".to_owned()))?;
        let best = self
            .results
            .get(&best_retry)
            .map(|a| a.network.clone())
            .ok_or_else(|| Error::Exec(format!("retry {best_retry} has no result")))?;
        Ok(MultiOutcome {
            best,
            best_loss,
            best_retry,
            results: self.results,
        })
    }
}

fn attempt(
    params: &MultiParameters,
    retry: usize,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<Attempt> {
    let (Some(net), Some(data), Some(opt)) = (&params.network, &params.dataset, &params.optimizer)
    else {
        return Err(Error::Parameters("provider is missing".to_owned()));
    };
    let network =
        net(retry).map_err(|e| e.into_pre_train(format!("retry {retry}: network provider")))?;
    let dataset =
        data(retry).map_err(|e| e.into_pre_train(format!("retry {retry}: dataset provider")))?;
    let (optimizer, post_optimize) =
        opt(retry).map_err(|e| e.into_pre_train(format!("retry {retry}: optimizer provider")))?;

    let outcome = train(TrainParameters {
        network: Some(network),
        dataset: Some(dataset),
        optimizer: Some(optimizer),
        post_optimize: Some(post_optimize),
        epochs: params.epochs,
        batch_size: params.batch_size,
        seed: params.seed.map(|s| s.wrapping_add(retry as u64)),
        logger: params.logger.child(format!("retry-{retry}")),
        cancel,
    })
    .map_err(|e| e.context(format!("retry {retry}")))?;

    log_info!(
        params.logger,
        "retry {retry} finished with loss {:.6}",
        outcome.loss
    );
    Ok(Attempt {
        network: outcome.network,
        loss: outcome.loss,
    })
}

/// Train `retries` networks and keep the best.
pub fn train_many(params: MultiParameters) -> Result<MultiOutcome> {
    params.validate()?;
    if params.parallel {
        train_parallel(&params)
    } else {
        train_sequential(&params)
    }
}

fn train_sequential(params: &MultiParameters) -> Result<MultiOutcome> {
    let mut board = Leaderboard::default();
    for retry in 0..params.retries {
        board.record(retry, attempt(params, retry, None)?);
    }
    board.finish()
}

fn train_parallel(params: &MultiParameters) -> Result<MultiOutcome> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(params.workers.unwrap_or(0))
        .thread_name(|i| format!("nnkit-retry-{i}"))
        .build()
        .map_err(|e| Error::Parameters(format!("cannot start worker pool: {e}")))?;

    let board = Mutex::new(Leaderboard::default());
    let first_error: Mutex<Option<Error>> = Mutex::new(None);
    let cancel = Arc::new(AtomicBool::new(false));

    // FIFO so retries start in index order.
    pool.scope_fifo(|s| {
        for retry in 0..params.retries {
            let (board, first_error, cancel) = (&board, &first_error, &cancel);
            s.spawn_fifo(move |_| {
                if cancel.load(Ordering::Acquire) {
                    return;
                }
                match attempt(params, retry, Some(Arc::clone(cancel))) {
                    Ok(done) => board.lock().record(retry, done),
                    Err(err) => {
                        {
                            let mut slot = first_error.lock();
                            if slot.is_none() {
                                *slot = Some(err);
                            }
                        }
                        cancel.store(true, Ordering::Release);
                    }
                }
            });
        }
    });

    if let Some(err) = first_error.into_inner() {
        return Err(err);
    }
    board.into_inner().finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::logging::testing::Capture;
    use crate::optim::{SgdParameters, new_sgd};
    use std::sync::atomic::AtomicUsize;

    use crate::{Activation, Init, Layer, LossKind, Matrix, Operation, Split};

    fn xor() -> Dataset {
        let xs = vec![
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
        ];
        let ys = vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]];
        let s = Split::from_rows(&xs, &ys).unwrap();
        Dataset::new(s.clone(), s.clone(), s).unwrap()
    }

    fn params(retries: usize, parallel: bool) -> MultiParameters {
        let logger = Logger::new(Arc::new(Capture::default()), "multi");
        let sgd_logger = logger.clone();
        MultiParameters {
            network: Some(Box::new(|retry: usize| {
                Network::from_sizes(
                    &[2, 4, 1],
                    &[Activation::Tanh, Activation::Sigmoid],
                    Init::Glorot,
                    LossKind::Mse,
                    retry as u64 * 17,
                )
            })),
            dataset: Some(Box::new(|_: usize| -> Result<Dataset> { Ok(xor()) })),
            optimizer: Some(Box::new(move |_: usize| -> Result<(Optimizer, PostOptimize)> {
                let sgd = SgdParameters {
                    learn_rate: Some(0.5),
                    ..SgdParameters::default()
                };
                Ok(new_sgd(Some(sgd), &sgd_logger))
            })),
            retries,
            epochs: 40,
            seed: Some(1),
            parallel,
            workers: Some(2),
            logger,
            ..MultiParameters::default()
        }
    }

    #[test]
    fn sequential_keeps_the_lowest_loss() {
        let outcome = train_many(params(4, false)).unwrap();
        assert_eq!(outcome.results.len(), 4);
        let min = outcome
            .results
            .values()
            .map(|a| a.loss)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(outcome.best_loss, min);
        assert_eq!(outcome.best, outcome.results[&outcome.best_retry].network);
    }

    #[test]
    fn parallel_matches_sequential() {
        let seq = train_many(params(4, false)).unwrap();
        let par = train_many(params(4, true)).unwrap();
        assert_eq!(par.results.len(), 4);
        assert_eq!(par.best_retry, seq.best_retry);
        assert_eq!(par.best_loss, seq.best_loss);
        assert_eq!(par.best, seq.best);
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        assert!(matches!(
            train_many(params(0, false)),
            Err(Error::Parameters(_))
        ));
        let mut p = params(2, true);
        p.dataset = None;
        assert!(matches!(train_many(p), Err(Error::Parameters(_))));
    }

    #[test]
    fn provider_errors_are_pre_train_errors() {
        for parallel in [false, true] {
            let mut p = params(3, parallel);
            p.network = Some(Box::new(|retry: usize| {
                if retry == 1 {
                    Err(Error::Create("no network today".to_owned()))
                } else {
                    Network::from_sizes(
                        &[2, 1],
                        &[Activation::Sigmoid],
                        Init::Default,
                        LossKind::Mse,
                        0,
                    )
                }
            }));
            let err = train_many(p).unwrap_err();
            assert!(
                matches!(&err, Error::PreTrain(msg) if msg.contains("no network today")),
                "{err}"
            );
        }
    }

    #[test]
    fn leaderboard_breaks_ties_by_retry_index() {
        let net = params(1, false).network.unwrap()(0).unwrap();
        let mut board = Leaderboard::default();
        for retry in [2, 0, 1] {
            board.record(
                retry,
                Attempt {
                    network: net.clone(),
                    loss: 0.5,
                },
            );
        }
        assert_eq!(board.finish().unwrap().best_retry, 0);
    }

    #[test]
    fn leaderboard_never_prefers_a_nan_loss() {
        let net = params(1, false).network.unwrap()(0).unwrap();
        let attempt = |loss: f64| Attempt {
            network: net.clone(),
            loss,
        };
        let mut board = Leaderboard::default();
        board.record(0, attempt(f64::NAN));
        board.record(1, attempt(0.75));
        board.record(2, attempt(f64::NAN));
        let outcome = board.finish().unwrap();
        assert_eq!(outcome.best_retry, 1);
        assert_eq!(outcome.best_loss, 0.75);
        assert_eq!(outcome.results.len(), 3);
    }

    #[test]
    fn diverged_retry_loses_to_a_finite_one() {
        let mut p = params(2, false);
        p.network = Some(Box::new(|retry: usize| -> Result<Network> {
            let w = if retry == 0 { f64::NAN } else { 0.1 };
            let layer = Layer::dense(
                Operation::weight(Matrix::filled(2, 1, w))?,
                Operation::bias(Matrix::row_vector(vec![0.0]))?,
                Operation::activation(Activation::Sigmoid),
            )?;
            Network::new(vec![layer], LossKind::Mse)
        }));
        let outcome = train_many(p).unwrap();
        assert!(outcome.results[&0].loss.is_nan());
        assert_eq!(outcome.best_retry, 1);
        assert!(outcome.best_loss.is_finite());
    }

    #[test]
    fn parallel_failure_skips_retries_not_yet_started() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut p = params(4, true);
        p.workers = Some(1);
        p.dataset = Some(Box::new(move |retry: usize| -> Result<Dataset> {
            counter.fetch_add(1, Ordering::SeqCst);
            if retry == 0 {
                Err(Error::Data("dataset 0 unavailable".to_owned()))
            } else {
                Ok(xor())
            }
        }));
        let err = train_many(p).unwrap_err();
        assert!(matches!(&err, Error::PreTrain(msg) if msg.contains("retry 0")), "{err}");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
