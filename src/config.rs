use std::path::PathBuf;

use anyhow::{bail, ensure, Result};
use clap::{Parser, ValueEnum};
use tch::Device;

pub const IMG_SIZE: i64 = 64;
pub const IMG_CHANNELS: i64 = 3;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "GAN training with a polyharmonic RBF discriminator.", long_about = None)]
pub struct Args {
    #[arg(short, long, value_enum, default_value_t = DatasetKind::G2)]
    pub data: DatasetKind,
    /// Image directory, only read for `--data images`.
    #[arg(long, default_value_t = String::new())]
    pub image_dir: String,
    /// Sample dims of the `gn` dataset.
    #[arg(long, default_value_t = 3)]
    pub data_dims: i64,
    #[arg(long, value_enum, default_value_t = GanVariant::Wgan)]
    pub gan: GanVariant,
    #[arg(long, default_value_t = 64)]
    pub batch_size: i64,
    #[arg(short = 'm', long, default_value_t = 1)]
    pub rbf_m: i64,
    /// Overrides the kernel exponent 2m - n.
    #[arg(long, allow_negative_numbers = true)]
    pub rbf_pow: Option<i64>,
    /// Latent dims of the WAE encoding.
    #[arg(long, default_value_t = 2)]
    pub latent_dims: i64,
    #[arg(long, default_value_t = 64)]
    pub noise_dims: i64,
    #[arg(long, default_value_t = 0.0001)]
    pub lr: f64,
    #[arg(long, default_value_t = 0.5)]
    pub lambda: f64,
    /// Gradient steps on the discriminator after each closed-form assignment.
    #[arg(long, default_value_t = 0)]
    pub disc_steps: i64,
    #[arg(long, default_value_t = 1.0)]
    pub mul_dis_lr: f64,
    #[arg(short, long, default_value_t = 10000)]
    pub iters: i64,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    #[arg(long, default_value_t = String::from("checkpoints"))]
    pub checkpoint_dir: String,
    #[arg(long, default_value_t = false)]
    pub cpu: bool,
    #[arg(short, long, default_value_t = 0)]
    pub generate: usize,
    #[arg(long, default_value_t = false)]
    pub morphing: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum DatasetKind {
    G2,
    Gmm8,
    Gn,
    Images,
}

/// Which sample streams play the target and generator roles.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum GanVariant {
    Wgan,
    Wae,
}

/// A sample stream produced during one training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stream {
    Reals,
    Fakes,
    RealsEncoded,
    FakesEncoded,
}

impl GanVariant {
    /// `(target, generator)` streams.
    pub fn roles(&self) -> (Stream, Stream) {
        match self {
            GanVariant::Wgan => (Stream::Reals, Stream::Fakes),
            GanVariant::Wae => (Stream::FakesEncoded, Stream::RealsEncoded),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatasetFamily {
    /// 2-D single Gaussian.
    G2,
    /// Eight Gaussians on the unit circle.
    Gmm8,
    /// N-dimensional Gaussian.
    Gn { dims: i64 },
    Images { dir: PathBuf },
}

impl DatasetFamily {
    pub fn sample_dims(&self) -> i64 {
        match self {
            DatasetFamily::G2 | DatasetFamily::Gmm8 => 2,
            DatasetFamily::Gn { dims } => *dims,
            DatasetFamily::Images { .. } => IMG_CHANNELS * IMG_SIZE * IMG_SIZE,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, DatasetFamily::Images { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            DatasetFamily::G2 => "g2",
            DatasetFamily::Gmm8 => "gmm8",
            DatasetFamily::Gn { .. } => "gN",
            DatasetFamily::Images { .. } => "images",
        }
    }
}

/// Immutable run configuration, resolved once from the command line.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub dataset: DatasetFamily,
    pub gan: GanVariant,
    pub batch_size: i64,
    pub rbf_m: i64,
    pub rbf_pow: Option<i64>,
    /// Dimensionality n of the points the discriminator sees.
    pub rbf_n: i64,
    pub latent_dims: i64,
    pub noise_dims: i64,
    pub lr: f64,
    pub mul_dis_lr: f64,
    pub lambda: f64,
    pub disc_steps: i64,
    pub iters: i64,
    pub seed: u64,
    pub checkpoint_dir: PathBuf,
    pub device: Device,
}

impl RunConfig {
    pub fn from_args(args: &Args) -> Result<RunConfig> {
        let dataset = match args.data {
            DatasetKind::G2 => DatasetFamily::G2,
            DatasetKind::Gmm8 => DatasetFamily::Gmm8,
            DatasetKind::Gn => DatasetFamily::Gn { dims: args.data_dims },
            DatasetKind::Images => {
                if args.image_dir.is_empty() {
                    bail!("Please specify --image-dir for the images dataset. See the --help option for details.")
                }
                DatasetFamily::Images { dir: PathBuf::from(&args.image_dir) }
            }
        };
        let device = if args.cpu { Device::Cpu } else { Device::cuda_if_available() };
        RunConfig::resolve(dataset, args.gan, args, device)
    }

    fn resolve(dataset: DatasetFamily, gan: GanVariant, args: &Args, device: Device) -> Result<RunConfig> {
        ensure!(args.batch_size > 0, "batch size must be positive, got {}", args.batch_size);
        ensure!(args.rbf_m > 0, "kernel order m must be positive, got {}", args.rbf_m);
        ensure!(args.noise_dims > 0, "noise dims must be positive, got {}", args.noise_dims);
        ensure!(args.disc_steps >= 0, "disc steps must not be negative");
        ensure!(
            dataset.sample_dims() > 0,
            "dataset {} has no resolvable dimensionality",
            dataset.name()
        );

        // Point datasets are compared in their own coordinates, the WAE in its encoding.
        let rbf_n = match gan {
            GanVariant::Wgan => dataset.sample_dims(),
            GanVariant::Wae => args.latent_dims,
        };
        if rbf_n <= 0 {
            bail!("{:?} on {} resolves to dimensionality {rbf_n}", gan, dataset.name())
        }

        Ok(RunConfig {
            dataset,
            gan,
            batch_size: args.batch_size,
            rbf_m: args.rbf_m,
            rbf_pow: args.rbf_pow,
            rbf_n,
            latent_dims: args.latent_dims,
            noise_dims: args.noise_dims,
            lr: args.lr,
            mul_dis_lr: args.mul_dis_lr,
            lambda: args.lambda,
            disc_steps: args.disc_steps,
            iters: args.iters,
            seed: args.seed,
            checkpoint_dir: PathBuf::from(&args.checkpoint_dir),
            device,
        })
    }

    /// Noise fed to the generator. The WAE samples its prior in latent space.
    pub fn generator_input_dims(&self) -> i64 {
        match self.gan {
            GanVariant::Wgan => self.noise_dims,
            GanVariant::Wae => self.latent_dims,
        }
    }

    pub fn print(&self) {
        println!("Dataset: {}", self.dataset.name());
        if let DatasetFamily::Images { dir } = &self.dataset {
            println!("Image Dataset Dir: {}", dir.display());
        }
        println!("GAN Variant: {:?}", self.gan);
        println!("RBF m: {}", self.rbf_m);
        if let Some(pow) = self.rbf_pow {
            println!("RBF Power Override: {pow}");
        }
        println!("Batch Size: {}", self.batch_size);
        println!("Noise Dims: {}", self.noise_dims);
        println!("Latent Dims: {}", self.latent_dims);
        println!("Learning Rate: {}", self.lr);
        println!("Mul Discriminator's LR: {}", self.mul_dis_lr);
        println!("Lambda: {}", self.lambda);
        println!("Discriminator Steps: {}", self.disc_steps);
        println!("Iterations: {}", self.iters);
        println!("Seed: {}", self.seed);
        println!("Checkpoint Dir: {}", self.checkpoint_dir.display());
        println!("--------");
    }
}

#[cfg(test)]
pub(crate) fn test_config(dataset: DatasetFamily, gan: GanVariant, batch_size: i64, rbf_m: i64) -> RunConfig {
    let mut args = Args::parse_from(["phs-rbf-gan", "--noise-dims", "4"]);
    args.batch_size = batch_size;
    args.rbf_m = rbf_m;
    RunConfig::resolve(dataset, gan, &args, Device::Cpu).unwrap()
}
