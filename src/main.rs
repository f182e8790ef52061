use std::fs;
use std::fs::File;
use std::path::Path;

use anyhow::{bail, Result};
use clap::Parser;
use gif::{Encoder, Frame, Repeat};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::{Device, Kind, Tensor};

mod centres;
mod config;
mod data;
mod generator;
mod kernel;
mod rbf_layer;
mod solver;
mod train;

use config::{Args, GanVariant, RunConfig, IMG_SIZE};
use train::{write_csv, Trainer};

fn main() -> Result<()> {
    let args = Args::parse();
    let config = RunConfig::from_args(&args)?;

    print_oss_lisence();

    println!("Use Device: {:?}", config.device);
    println!("--------");
    tch::manual_seed(config.seed as i64);

    config.print();

    println!("Loading Dataset...");
    let source = data::open_source(&config)?;
    if let Some(size) = source.num_samples() {
        println!("Dataset Size: {size}");
    }
    println!("Sample Dims: {}", source.dims());
    println!("--------");

    let mut trainer = Trainer::new(&config, source)?;
    let solver = trainer.solver();
    println!("RBF n: {}", solver.rbf_n());
    println!("Kernel Case: {:?}", solver.poly_case());
    if let Some(eta) = solver.poly_case().eta() {
        println!("Kernel Eta: {eta}");
    }
    println!("Kernel Order: {}", solver.order());
    println!("Centres: {}", solver.num_centres());
    let discriminator = trainer.discriminator();
    println!(
        "Discriminator Parameters: {} dims, centres {:?}, rbf_weights {:?}",
        discriminator.dims(),
        discriminator.centres().size(),
        discriminator.weights().size()
    );
    if solver.order() < 0 {
        println!("Warning: negative kernel order, scores at coincident centres are infinite.");
    }
    println!("--------");

    trainer.load_checkpoint()?;

    if args.generate != 0 {
        generate(&trainer, &config, args.generate)?;
        println!("Generated!");
        return Ok(());
    }

    if args.morphing {
        if !config.dataset.is_image() {
            bail!("Morphing needs an image dataset. See the --help option for details.")
        }
        morphing(&trainer, &config)?;
        println!("Generated morphing.gif");
        return Ok(());
    }

    trainer.train()
}

fn results_dir() -> Result<&'static Path> {
    let path = Path::new("results");
    if !path.is_dir() {
        fs::create_dir("results")?;
    }
    Ok(path)
}

fn generate(trainer: &Trainer, config: &RunConfig, num: usize) -> Result<()> {
    let path = results_dir()?;
    if !config.dataset.is_image() {
        return write_csv(&trainer.sample(num as i64), &path.join("generated.csv"));
    }
    for i in 0..num {
        let image = trainer.sample(1).squeeze_dim(0) * 255.0;
        let mut path_buf = path.to_path_buf();
        path_buf.push(format!("generate-{}.png", i + 1));
        tch::vision::image::save(&image, &path_buf)?;
    }
    Ok(())
}

fn morphing(trainer: &Trainer, config: &RunConfig) -> Result<()> {
    let dims = config.generator_input_dims() as usize;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut endpoint = || {
        let values: Vec<f32> = (0..dims)
            .map(|_| match config.gan {
                GanVariant::Wgan => rng.gen_range(0.0..1.0),
                GanVariant::Wae => rng.gen_range(-2.0..2.0),
            })
            .collect();
        Tensor::from_slice(&values).reshape([1, -1]).to_device(config.device)
    };
    let seed_one = endpoint();
    let seed_two = endpoint();

    let mut path_buf = results_dir()?.to_path_buf();
    path_buf.push("morphing.gif");
    let mut image = File::create(path_buf)?;
    let mut encoder = Encoder::new(&mut image, IMG_SIZE as u16, IMG_SIZE as u16, &[])?;
    encoder.set_repeat(Repeat::Infinite)?;

    let generator = trainer.generator();
    for i in 0..100 {
        let l: f64 = i as f64 / 99.0;
        let image = tch::no_grad(|| ((1.0 - l) * &seed_one + l * &seed_two).apply_t(generator, false))
            .squeeze_dim(0)
            .permute_copy([1, 2, 0])
            .flat_view()
            * 255.0;
        let mut data = [0 as u8; 3 * IMG_SIZE as usize * IMG_SIZE as usize];
        image
            .to_device(Device::Cpu)
            .to_kind(Kind::Uint8)
            .copy_data(&mut data, 3 * IMG_SIZE as usize * IMG_SIZE as usize);
        let frame = Frame::from_rgb(IMG_SIZE as u16, IMG_SIZE as u16, &data);
        encoder.write_frame(&frame)?;
    }
    Ok(())
}

fn print_oss_lisence() {
    println!("OSS Library: PyTorch");
    println!("URL: https://github.com/pytorch/pytorch");
    println!("Lisence: 3-Clause BSD License");
    println!("");
    println!("OSS Library: tch-rs");
    println!("URL: https://github.com/LaurentMazare/tch-rs");
    println!("Lisence: MIT Lisence");
    println!("");
    println!("OSS Library: anyhow");
    println!("URL: https://github.com/dtolnay/anyhow");
    println!("Lisence: Apache License Version 2.0");
    println!("");
    println!("OSS Library: rand");
    println!("URL: https://github.com/rust-random/rand");
    println!("Lisence: MIT OR Apache-2.0");
    println!("");
    println!("OSS Library: gif");
    println!("URL: https://github.com/image-rs/image-gif");
    println!("Lisence: MIT OR Apache-2.0");
    println!("");
    println!("OSS Library: tqdm");
    println!("URL: https://github.com/mrlazy1708/tqdm");
    println!("Lisence: MIT OR Apache-2.0");
    println!("");
    println!("OSS Library: clap");
    println!("URL: https://github.com/clap-rs/clap");
    println!("Lisence: MIT OR Apache-2.0");
    println!("--------");
    println!("");
}
