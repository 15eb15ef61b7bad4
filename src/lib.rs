//! A small feed-forward neural network toolkit with hand-written reverse-mode autodiff.
//!
//! `rust-nnkit` builds networks out of explicit, differentiable operations and trains them
//! with plain SGD. Everything is shape-checked at runtime and reported through [`Result`].
//!
//! # Building blocks
//!
//! - [`Operation`]: one differentiable step. Three variants:
//!   - activations (linear, sigmoid, tanh, relu) with no state;
//!   - [`ParamOperation`]: weight multiply and bias add, which own a learnable parameter;
//!   - [`ConstOperation`]: dropout and parametrized sigmoid, which own fixed tensors.
//! - [`Layer`]: `weight -> bias -> activation`, optionally followed by dropout.
//! - [`LayerBuilder`] / [`OperationBuilder`]: fill in missing pieces from sizing hints.
//! - [`Network`]: a stack of layers plus a [`Loss`].
//! - [`new_sgd`]: a pure update function plus a per-epoch learning-rate schedule hook.
//! - [`train`] / [`train_many`]: single runs with checkpointing, and best-of-N runs
//!   (optionally on a thread pool).
//!
//! # Call discipline
//!
//! Training-time methods are stateful. `forward` caches what `backward` needs, and
//! `backward` caches what `apply_optim` needs; calling them out of order fails with
//! [`Error::Exec`]. [`Network::infer`] and [`Network::evaluate`] leave those caches alone.
//!
//! # Data layout
//!
//! - Scalars are `f64`.
//! - [`Matrix`] is row-major; one sample per row.
//! - Weights have shape `(inputs, neurons)`, biases `(1, neurons)`.
//!
//! # Logging
//!
//! Components log through an injected [`Logger`]. By default it forwards to the `log`
//! facade; install any `log` backend in your binary to see the output.
//!
//! # Quick start
//!
//! ```rust
//! use rust_nnkit::{
//!     Activation, Dataset, Init, LossKind, Network, Split, TrainParameters, new_sgd, train,
//! };
//!
//! # fn main() -> rust_nnkit::Result<()> {
//! let xs = vec![
//!     vec![0.0, 0.0],
//!     vec![0.0, 1.0],
//!     vec![1.0, 0.0],
//!     vec![1.0, 1.0],
//! ];
//! let ys = vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]];
//! let all = Split::from_rows(&xs, &ys)?;
//! let dataset = Dataset::new(all.clone(), all.clone(), all)?;
//!
//! let network = Network::from_sizes(
//!     &[2, 8, 1],
//!     &[Activation::Tanh, Activation::Sigmoid],
//!     Init::Glorot,
//!     LossKind::Mse,
//!     0,
//! )?;
//! let logger = rust_nnkit::Logger::default();
//! let (optimizer, post_optimize) = new_sgd(None, &logger);
//!
//! let outcome = train(TrainParameters {
//!     network: Some(network),
//!     dataset: Some(dataset),
//!     optimizer: Some(optimizer),
//!     post_optimize: Some(post_optimize),
//!     epochs: 50,
//!     seed: Some(0),
//!     logger,
//!     ..TrainParameters::default()
//! })?;
//! assert!(outcome.loss.is_finite());
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod builder;
pub mod const_op;
pub mod data;
pub mod error;
pub mod init;
pub mod layer;
pub mod logging;
pub mod loss;
pub(crate) mod matmul;
pub mod multi;
pub mod network;
pub mod operation;
pub mod optim;
pub mod param_op;
pub mod tensor;
pub mod train;

#[cfg(feature = "serde")]
pub mod checkpoint;

pub use activation::Activation;
pub use builder::{LayerBuilder, OperationBuilder, OperationKind};
pub use const_op::{ConstKind, ConstOperation};
pub use data::{Batches, Dataset, Split};
pub use error::{Error, Result};
pub use init::Init;
pub use layer::{Layer, LayerKind};
pub use logging::Logger;
pub use loss::{Loss, LossKind};
pub use multi::{
    Attempt, DatasetProvider, MultiOutcome, MultiParameters, NetworkProvider, OptimizerProvider,
    train_many,
};
pub use network::Network;
pub use operation::{ActivationOp, Operation};
pub use optim::{Decay, Optimizer, OptimizerFn, PostOptimize, SgdParameters, new_sgd};
pub use param_op::{ParamKind, ParamOperation};
pub use tensor::{EPSILON, Matrix};
pub use train::{TrainOutcome, TrainParameters, train};
