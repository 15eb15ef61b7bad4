use rand::SeedableRng;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;

use rust_nnkit::{
    Activation, Dataset, Init, Logger, LossKind, Matrix, Network, SgdParameters, Split,
    TrainParameters, new_sgd, train,
};

fn sample(rng: &mut StdRng, n: usize) -> rust_nnkit::Result<Split> {
    let dist = Uniform::new(-1.0_f64, 1.0_f64);
    let x = Matrix::from_fn(n, 2, |_, _| dist.sample(&mut *rng));
    let y = Matrix::from_fn(n, 1, |r, _| (x.row(r)[0] + x.row(r)[1]).tanh());
    Split::new(x, y)
}

fn main() -> rust_nnkit::Result<()> {
    // Task: learn y = tanh(x0 + x1)
    // A single dense tanh layer can represent it exactly.
    let mut rng = StdRng::seed_from_u64(1);
    let dataset = Dataset::new(
        sample(&mut rng, 256)?,
        sample(&mut rng, 64)?,
        sample(&mut rng, 64)?,
    )?;
    let network = Network::from_sizes(&[2, 1], &[Activation::Tanh], Init::Default, LossKind::Mse, 0)?;
    let start = network.evaluate(&dataset.valid)?;

    let logger = Logger::default();
    let (optimizer, post_optimize) = new_sgd(
        Some(SgdParameters {
            learn_rate: Some(0.5),
            stop_rate: Some(0.05),
            epochs: Some(200),
            ..SgdParameters::default()
        }),
        &logger,
    );

    let outcome = train(TrainParameters {
        network: Some(network),
        dataset: Some(dataset),
        optimizer: Some(optimizer),
        post_optimize: Some(post_optimize),
        epochs: 200,
        batch_size: Some(32),
        seed: Some(2),
        logger,
        cancel: None,
    })?;

    println!(
        "start_loss={start:.6} final_loss={:.6} checkpoint_epoch={} net={}",
        outcome.loss,
        outcome.best_epoch,
        outcome.network.short_string()
    );
    Ok(())
}
