use std::f64::consts::PI;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::{Device, Kind, Tensor};

use crate::config::{DatasetFamily, RunConfig, IMG_SIZE};

/// Supplies batches of real samples to the training loop.
pub trait SampleSource {
    /// Flattened dimensionality of one sample.
    fn dims(&self) -> i64;
    /// Number of distinct samples, `None` for generative sources.
    fn num_samples(&self) -> Option<i64> {
        None
    }
    fn next_batch(&mut self, batch_size: i64) -> Tensor;
}

/// Isotropic Gaussian with a fixed mean.
pub struct GaussianSource {
    mean: Tensor,
    std: f64,
    device: Device,
}

impl GaussianSource {
    pub fn new(mean: &[f32], std: f64, device: Device) -> GaussianSource {
        GaussianSource {
            mean: Tensor::from_slice(mean).to_device(device),
            std,
            device,
        }
    }
}

impl SampleSource for GaussianSource {
    fn dims(&self) -> i64 {
        self.mean.size()[0]
    }

    fn next_batch(&mut self, batch_size: i64) -> Tensor {
        let noise = Tensor::randn([batch_size, self.dims()], (Kind::Float, self.device));
        noise * self.std + self.mean.unsqueeze(0)
    }
}

/// Equal-weight Gaussian modes placed evenly on a circle.
pub struct RingMixtureSource {
    modes: Tensor,
    std: f64,
    rng: StdRng,
    device: Device,
}

impl RingMixtureSource {
    pub fn new(num_modes: usize, radius: f64, std: f64, seed: u64, device: Device) -> RingMixtureSource {
        let coords: Vec<f32> = (0..num_modes)
            .flat_map(|k| {
                let angle = 2.0 * PI * k as f64 / num_modes as f64;
                [(radius * angle.cos()) as f32, (radius * angle.sin()) as f32]
            })
            .collect();
        let modes = Tensor::from_slice(&coords).reshape([num_modes as i64, 2]).to_device(device);
        RingMixtureSource { modes, std, rng: StdRng::seed_from_u64(seed), device }
    }
}

impl SampleSource for RingMixtureSource {
    fn dims(&self) -> i64 {
        2
    }

    fn next_batch(&mut self, batch_size: i64) -> Tensor {
        let num_modes = self.modes.size()[0];
        let picks: Vec<i64> = (0..batch_size).map(|_| self.rng.gen_range(0..num_modes)).collect();
        let index = Tensor::from_slice(&picks).to_device(self.device);
        let noise = Tensor::randn([batch_size, 2], (Kind::Float, self.device));
        self.modes.index_select(0, &index) + noise * self.std
    }
}

/// Images loaded from a directory, scaled to [0, 1] and drawn with replacement.
pub struct ImageSource {
    images: Tensor,
    device: Device,
}

impl ImageSource {
    pub fn load(dir: &std::path::Path, device: Device) -> Result<ImageSource> {
        let images = tch::vision::image::load_dir(dir, IMG_SIZE, IMG_SIZE)
            .with_context(|| format!("loading images from {}", dir.display()))?;
        println!("Loaded Dataset: {images:?}");
        Ok(ImageSource { images, device })
    }
}

impl SampleSource for ImageSource {
    fn dims(&self) -> i64 {
        self.images.size()[1..].iter().product()
    }

    fn num_samples(&self) -> Option<i64> {
        Some(self.images.size()[0])
    }

    fn next_batch(&mut self, batch_size: i64) -> Tensor {
        let train_size = self.images.size()[0];
        let index = Tensor::randint(train_size, [batch_size], (Kind::Int64, Device::Cpu));
        self.images.index_select(0, &index).to_device(self.device).to_kind(Kind::Float) / 255.0
    }
}

pub fn open_source(config: &RunConfig) -> Result<Box<dyn SampleSource>> {
    let device = config.device;
    let source: Box<dyn SampleSource> = match &config.dataset {
        DatasetFamily::G2 => Box::new(GaussianSource::new(&[1.0, 1.0], 0.2, device)),
        DatasetFamily::Gmm8 => Box::new(RingMixtureSource::new(8, 1.0, 0.02, config.seed, device)),
        DatasetFamily::Gn { dims } => {
            let mean = vec![0.7f32; *dims as usize];
            Box::new(GaussianSource::new(&mean, 0.2, device))
        }
        DatasetFamily::Images { dir } => Box::new(ImageSource::load(dir, device)?),
    };
    Ok(source)
}
