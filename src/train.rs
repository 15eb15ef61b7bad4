//! Single-run training loop.
//!
//! One run is: validate the parameters, train for `epochs` epochs while checkpointing the
//! network with the best `tests` loss, then keep whichever of the live and checkpointed
//! networks does better on `valid`.
//!
//! Every tenth of the run (at least every epoch) the `tests` loss is measured on the
//! inference path; the checkpoint is replaced only on a strict improvement.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::logging::{log_debug, log_info};
use crate::loss::compare_losses;
use crate::optim::{Optimizer, OptimizerFn, PostOptimize};
use crate::{Dataset, Error, Logger, Network, Result};

/// Everything one training run needs.
///
/// `network`, `dataset`, `optimizer` and `post_optimize` are required; leaving one out makes
/// [`train`] fail with [`Error::Parameters`].
pub struct TrainParameters {
    pub network: Option<Network>,
    pub dataset: Option<Dataset>,
    pub optimizer: Option<Optimizer>,
    /// Called once per epoch, after that epoch's updates.
    pub post_optimize: Option<PostOptimize>,
    pub epochs: usize,
    /// Mini-batch size; `None` trains on the whole split at once.
    pub batch_size: Option<usize>,
    /// Seed for the per-epoch shuffle. `None` draws from OS entropy.
    pub seed: Option<u64>,
    pub logger: Logger,
    /// Checked at the start of every epoch.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for TrainParameters {
    fn default() -> Self {
        Self {
            network: None,
            dataset: None,
            optimizer: None,
            post_optimize: None,
            epochs: 100,
            batch_size: None,
            seed: None,
            logger: Logger::default(),
            cancel: None,
        }
    }
}

impl TrainParameters {
    /// Check the scalar settings. Presence of the collaborators is checked by [`train`].
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::Parameters("epochs must be > 0".to_owned()));
        }
        if self.batch_size == Some(0) {
            return Err(Error::Parameters("batch size must be > 0".to_owned()));
        }
        if let (Some(network), Some(dataset)) = (&self.network, &self.dataset) {
            if network.input_dim() != dataset.input_dim()
                || network.output_dim() != dataset.target_dim()
            {
                return Err(Error::Parameters(format!(
                    "network maps {} -> {}, dataset is {} -> {}",
                    network.input_dim(),
                    network.output_dim(),
                    dataset.input_dim(),
                    dataset.target_dim()
                )));
            }
        }
        Ok(())
    }
}

/// Result of a training run.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    /// The network kept after the final live-vs-checkpoint comparison.
    pub network: Network,
    /// Loss of `network` over train, tests and valid combined.
    pub loss: f64,
    /// True when `network` is the checkpoint rather than the network live at the end.
    pub from_checkpoint: bool,
    /// Epoch at which the checkpoint was taken. Describes the checkpoint even when
    /// `from_checkpoint` is false.
    pub best_epoch: usize,
    /// `tests` loss of the checkpoint when it was taken.
    pub checkpoint_loss: f64,
}

struct Checkpoint {
    network: Network,
    epoch: usize,
    loss: f64,
}

fn missing(what: &str) -> Error {
    Error::Parameters(format!("{what} is missing"))
}

/// Run one training session.
pub fn train(params: TrainParameters) -> Result<TrainOutcome> {
    params.validate()?;
    let TrainParameters {
        network,
        dataset,
        optimizer,
        post_optimize,
        epochs,
        batch_size,
        seed,
        logger,
        cancel,
    } = params;
    let mut network = network.ok_or_else(|| missing("network"))?;
    let dataset = dataset.ok_or_else(|| missing("dataset"))?;
    let optimizer = optimizer.ok_or_else(|| missing("optimizer"))?;
    let mut post_optimize = post_optimize.ok_or_else(|| missing("post-optimize hook"))?;

    let interval = (epochs / 10).max(1);
    let batch_size = batch_size.unwrap_or(dataset.train.len());
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut checkpoint: Option<Checkpoint> = None;

    log_debug!(
        logger,
        "training {} for {epochs} epochs on {} samples",
        network.short_string(),
        dataset.train.len()
    );

    for epoch in 0..epochs {
        if cancel.as_ref().is_some_and(|c| c.load(Ordering::Acquire)) {
            return Err(Error::Cancelled(format!("stopped before epoch {epoch}")));
        }

        if epoch % interval == 0 {
            let loss = network
                .evaluate(&dataset.tests)
                .map_err(|e| e.into_exec(format!("epoch {epoch} test loss")))?;
            log_info!(logger, "epoch {epoch}: test loss {loss:.6}");
            if checkpoint
                .as_ref()
                .is_none_or(|c| compare_losses(loss, c.loss).is_lt())
            {
                checkpoint = Some(Checkpoint {
                    network: network.clone(),
                    epoch,
                    loss,
                });
            }
        }

        run_epoch(&mut network, &dataset, &*optimizer, batch_size, &mut rng)
            .map_err(|e| e.into_exec(format!("epoch {epoch}")))?;
        post_optimize();
    }

    let (network, from_checkpoint, best_epoch, checkpoint_loss) = match checkpoint {
        Some(c) => {
            let live = network.evaluate(&dataset.valid);
            let saved = c.network.evaluate(&dataset.valid);
            match (live, saved) {
                (Ok(live), Ok(saved)) if compare_losses(live, saved).is_lt() => {
                    log_debug!(
                        logger,
                        "live network beats checkpoint on valid: {live:.6} < {saved:.6}"
                    );
                    (network, false, c.epoch, c.loss)
                }
                _ => (c.network, true, c.epoch, c.loss),
            }
        }
        None => (network, false, 0, f64::INFINITY),
    };

    let all = dataset
        .combine()
        .map_err(|e| e.into_exec("combining splits"))?;
    let loss = network
        .evaluate(&all)
        .map_err(|e| e.into_exec("final loss"))?;
    log_info!(
        logger,
        "final loss {loss:.6} (checkpoint epoch {best_epoch} at {checkpoint_loss:.6})"
    );

    Ok(TrainOutcome {
        network,
        loss,
        from_checkpoint,
        best_epoch,
        checkpoint_loss,
    })
}

fn run_epoch(
    network: &mut Network,
    dataset: &Dataset,
    optimizer: &OptimizerFn,
    batch_size: usize,
    rng: &mut StdRng,
) -> Result<()> {
    let (shuffled, _) = dataset.train.shuffled(rng)?;
    for batch in shuffled.batches(batch_size) {
        let batch = batch?;
        network.forward(batch.x())?;
        network.loss(batch.y())?;
        network.backward()?;
        network.apply_optim(optimizer)?;
    }
    Ok(())
}
