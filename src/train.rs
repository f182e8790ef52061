use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tch::{nn, nn::OptimizerConfig, Kind, Tensor};
use tqdm::tqdm;

use crate::centres::CentresWeights;
use crate::config::{GanVariant, RunConfig, Stream};
use crate::data::SampleSource;
use crate::generator::{builders, Generator};
use crate::rbf_layer::RbfLayer;
use crate::solver::{RbfSolver, StepStreams};

/// Losses of one training step.
#[derive(Debug, Clone, Copy)]
pub struct StepLosses {
    pub d_loss: f64,
    pub g_loss: f64,
    /// Reconstruction error, WAE only.
    pub recon: Option<f64>,
}

/// Training mechanics. Holds the sample source and the kernel solver by
/// composition and owns every parameter store of the run.
pub struct Trainer {
    config: RunConfig,
    solver: RbfSolver,
    source: Box<dyn SampleSource>,
    g_vs: nn::VarStore,
    /// WGAN generator, or the WAE decoder.
    generator: Generator,
    encoder: Option<Generator>,
    d_vs: nn::VarStore,
    discriminator: RbfLayer,
    total_count: Tensor,
}

impl Trainer {
    pub fn new(config: &RunConfig, source: Box<dyn SampleSource>) -> Result<Trainer> {
        let solver = RbfSolver::new(config);
        let table = builders(&config.dataset);

        // Build Generator (decoder and encoder for the WAE)
        let g_vs = nn::VarStore::new(config.device);
        let (generator, encoder) = match config.gan {
            GanVariant::Wgan => ((table.generator)(g_vs.root() / "generator", config), None),
            GanVariant::Wae => (
                (table.decoder)(g_vs.root() / "decoder", config),
                Some((table.encoder)(g_vs.root() / "encoder", config)),
            ),
        };
        let total_count = g_vs.root().zeros_no_train("total_count", &[1]);

        // Build Discriminator
        let d_vs = nn::VarStore::new(config.device);
        let discriminator = solver.discriminator_model_rbf(d_vs.root() / "rbf")?;

        Ok(Trainer {
            config: config.clone(),
            solver,
            source,
            g_vs,
            generator,
            encoder,
            d_vs,
            discriminator,
            total_count,
        })
    }

    pub fn solver(&self) -> &RbfSolver {
        &self.solver
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn discriminator(&self) -> &RbfLayer {
        &self.discriminator
    }

    pub fn total_count(&self) -> i64 {
        self.total_count.int64_value(&[0])
    }

    fn g_weights_path(&self) -> PathBuf {
        self.config.checkpoint_dir.join("g_weights.pt")
    }

    fn d_weights_path(&self) -> PathBuf {
        self.config.checkpoint_dir.join("d_weights.pt")
    }

    /// Restores both stores if checkpoints exist. Returns whether anything was loaded.
    pub fn load_checkpoint(&mut self) -> Result<bool> {
        let mut loaded = false;
        let path = self.g_weights_path();
        if path.is_file() {
            self.g_vs.load(&path).with_context(|| format!("loading {}", path.display()))?;
            println!("Loaded: {}", path.display());
            loaded = true;
        }
        let path = self.d_weights_path();
        if path.is_file() {
            self.d_vs.load(&path).with_context(|| format!("loading {}", path.display()))?;
            println!("Loaded: {}", path.display());
            loaded = true;
        }
        Ok(loaded)
    }

    pub fn save_checkpoint(&self) -> Result<()> {
        fs::create_dir_all(&self.config.checkpoint_dir)
            .with_context(|| format!("creating {}", self.config.checkpoint_dir.display()))?;
        self.g_vs.save(self.g_weights_path())?;
        self.d_vs.save(self.d_weights_path())?;
        Ok(())
    }

    /// Noise for the generator, or prior draws in latent space for the WAE.
    pub fn noise(&self, batch_size: i64) -> Tensor {
        let dims = self.config.generator_input_dims();
        match self.config.gan {
            GanVariant::Wgan => Tensor::rand([batch_size, dims], (Kind::Float, self.config.device)),
            GanVariant::Wae => Tensor::randn([batch_size, dims], (Kind::Float, self.config.device)),
        }
    }

    fn streams(&self, reals: &Tensor, noise: &Tensor) -> StepStreams {
        match &self.encoder {
            None => StepStreams {
                reals: reals.shallow_clone(),
                fakes: Some(noise.apply_t(&self.generator, true)),
                reals_enc: None,
                fakes_enc: None,
            },
            Some(encoder) => StepStreams {
                reals: reals.shallow_clone(),
                fakes: None,
                reals_enc: Some(reals.apply_t(encoder, true)),
                fakes_enc: Some(noise.shallow_clone()),
            },
        }
    }

    /// `mean D(target) - mean D(generator)`.
    fn critic_gap(&self, streams: &StepStreams) -> Result<Tensor> {
        let (target, generator) = self.solver.roles();
        let target_score = self.discriminator.score(streams.get(target)?)?;
        let generator_score = self.discriminator.score(streams.get(generator)?)?;
        Ok(target_score.mean(Kind::Float) - generator_score.mean(Kind::Float))
    }

    fn d_loss(&self, streams: &StepStreams, cw: &CentresWeights) -> Result<Tensor> {
        let gap = self.critic_gap(streams)?;
        let at_centres = self.discriminator.score(&cw.centres)?.squeeze_dim(1);
        let smooth = (&cw.lamb_weights * at_centres.square()).mean(Kind::Float);
        Ok(-gap + self.config.lambda * smooth)
    }

    pub fn train_step(&mut self, optimizer_g: &mut nn::Optimizer, optimizer_d: &mut nn::Optimizer) -> Result<StepLosses> {
        let reals = self.source.next_batch(self.config.batch_size);
        let noise = self.noise(self.config.batch_size);

        // Closed-form discriminator, optionally refined by gradient steps
        self.d_vs.unfreeze();
        self.g_vs.freeze();
        let d_loss = {
            let streams = tch::no_grad(|| self.streams(&reals, &noise));
            let cw = self.solver.find_rbf_centres_weights(&streams)?;
            self.discriminator.assign(&cw)?;
            for _ in 0..self.config.disc_steps {
                let d_loss = self.d_loss(&streams, &cw)?;
                optimizer_d.backward_step(&d_loss);
            }
            tch::no_grad(|| self.d_loss(&streams, &cw))?
        };

        // Train Generator
        self.d_vs.freeze();
        self.g_vs.unfreeze();
        let streams = self.streams(&reals, &noise);
        let g_loss = self.critic_gap(&streams)?;
        let recon = match &self.encoder {
            None => None,
            Some(_) => {
                let codes = streams.get(Stream::RealsEncoded)?;
                let rebuilt = codes.apply_t(&self.generator, true);
                Some(rebuilt.mse_loss(&reals, tch::Reduction::Mean))
            }
        };
        let total = match &recon {
            None => g_loss.shallow_clone(),
            Some(recon) => recon + &g_loss,
        };
        optimizer_g.backward_step(&total);

        let step = self.total_count() + 1;
        tch::no_grad(|| self.total_count.fill_(step));

        Ok(StepLosses {
            d_loss: d_loss.double_value(&[]),
            g_loss: g_loss.double_value(&[]),
            recon: recon.map(|r| r.double_value(&[])),
        })
    }

    pub fn train(&mut self) -> Result<()> {
        let mut optimizer_g = nn::adam(0., 0.9, 0.).build(&self.g_vs, self.config.lr)?;
        let mut optimizer_d = nn::adam(0., 0.9, 0.).build(&self.d_vs, self.config.lr * self.config.mul_dis_lr)?;

        let start = self.total_count();
        let print_step = i64::max(self.config.iters / 10, 1);
        let save_step = i64::max(self.config.iters / 2, 1);
        if start > 0 {
            println!("Starting at Iteration - {start}");
        }

        println!("Train Iteration...");
        for _ in tqdm(start..self.config.iters) {
            let losses = self.train_step(&mut optimizer_g, &mut optimizer_d)?;
            let i = self.total_count();

            if i % print_step == 0 || i <= 2 {
                match losses.recon {
                    None => println!("{}: G_LOSS({:.4e}) D_LOSS({:.4e})", i, losses.g_loss, losses.d_loss),
                    Some(recon) => println!(
                        "{}: G_LOSS({:.4e}) D_LOSS({:.4e}) RECON({:.4e})",
                        i, losses.g_loss, losses.d_loss, recon
                    ),
                }
            }

            if i % save_step == 0 {
                self.save_checkpoint()?;
                self.save_samples(Path::new("results"), i)?;
            }
        }
        self.save_checkpoint()?;

        Ok(())
    }

    /// Draws samples from the trained model without touching the running statistics.
    pub fn sample(&self, num: i64) -> Tensor {
        tch::no_grad(|| self.noise(num).apply_t(&self.generator, false))
    }

    /// One image per save step for image data, a CSV batch for point data.
    pub fn save_samples(&self, dir: &Path, step: i64) -> Result<()> {
        if !dir.is_dir() {
            fs::create_dir_all(dir)?;
        }
        if self.config.dataset.is_image() {
            let image = self.sample(1).squeeze_dim(0) * 255.0;
            tch::vision::image::save(&image, dir.join(format!("{step}.png")))?;
        } else {
            write_csv(&self.sample(self.config.batch_size), &dir.join(format!("{step}.csv")))?;
        }
        Ok(())
    }
}

/// Writes a `[N, n]` tensor as comma separated rows.
pub fn write_csv(points: &Tensor, path: &Path) -> Result<()> {
    let points = points.to_device(tch::Device::Cpu).to_kind(Kind::Double);
    let (rows, cols) = (points.size()[0], points.size()[1]);
    let mut file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    for r in 0..rows {
        let line: Vec<String> = (0..cols).map(|c| points.double_value(&[r, c]).to_string()).collect();
        writeln!(file, "{}", line.join(","))?;
    }
    Ok(())
}
