#[cfg(not(feature = "serde"))]
fn main() {
    println!("enable the `serde` feature: cargo run --example save_load_json --features serde");
}

#[cfg(feature = "serde")]
fn main() -> rust_nnkit::Result<()> {
    use rust_nnkit::{Activation, LayerBuilder, LayerKind, LossKind, Matrix, Network};

    let hidden = LayerBuilder::new(LayerKind::DenseDrop)
        .inputs(2)
        .neurons(8)
        .activation_kind(Activation::ReLU)
        .keep_probability(0.9)
        .seed(0)
        .build()?;
    let output = LayerBuilder::new(LayerKind::Dense)
        .inputs(8)
        .neurons(1)
        .seed(1)
        .build()?;
    let network = Network::new(vec![hidden, output], LossKind::Mse)?;

    let path = "target/tmp_network.json";
    network.save_json(path)?;
    let loaded = Network::load_json(path)?;

    let x = Matrix::row_vector(vec![0.25, -0.5]);
    assert_eq!(network.infer(&x)?, loaded.infer(&x)?);
    println!("saved and loaded {}: {path}", loaded.short_string());
    Ok(())
}
