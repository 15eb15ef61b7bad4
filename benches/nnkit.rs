use criterion::{Criterion, black_box, criterion_group, criterion_main};

use rust_nnkit::{Activation, Init, LossKind, Matrix, Network};

fn network() -> Network {
    Network::from_sizes(
        &[128, 256, 256, 10],
        &[Activation::ReLU, Activation::ReLU, Activation::Linear],
        Init::Glorot,
        LossKind::Mse,
        0,
    )
    .unwrap()
}

fn network_infer_bench(c: &mut Criterion) {
    let net = network();
    let input = Matrix::filled(32, net.input_dim(), 0.1);

    c.bench_function("network_infer_32x128_256_256_10", |b| {
        b.iter(|| {
            let out = net.infer(black_box(&input)).unwrap();
            black_box(out);
        })
    });
}

fn network_train_step_bench(c: &mut Criterion) {
    let mut net = network();
    let input = Matrix::filled(32, net.input_dim(), 0.1);
    let target = Matrix::zeros(32, net.output_dim());
    let sgd = |p: &Matrix, g: &Matrix| p.sub(&g.scale(1e-4));

    c.bench_function("network_train_step_32x128_256_256_10", |b| {
        b.iter(|| {
            net.forward(black_box(&input)).unwrap();
            net.loss(black_box(&target)).unwrap();
            let dx = net.backward().unwrap();
            net.apply_optim(&sgd).unwrap();
            black_box(dx);
        })
    });
}

criterion_group!(benches, network_infer_bench, network_train_step_bench);
criterion_main!(benches);
