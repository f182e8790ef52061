use anyhow::{anyhow, Result};
use tch::{nn, Tensor};

use crate::centres::{assemble, CentresWeights};
use crate::config::{RunConfig, Stream};
use crate::kernel::{KernelCase, PhsKernel};
use crate::rbf_layer::{RbfLayer, RbfLayerConfig};

/// Sample streams available in one training step. The encoded streams only
/// exist for the WAE.
#[derive(Debug)]
pub struct StepStreams {
    pub reals: Tensor,
    pub fakes: Option<Tensor>,
    pub reals_enc: Option<Tensor>,
    pub fakes_enc: Option<Tensor>,
}

impl StepStreams {
    pub fn get(&self, stream: Stream) -> Result<&Tensor> {
        let tensor = match stream {
            Stream::Reals => Some(&self.reals),
            Stream::Fakes => self.fakes.as_ref(),
            Stream::RealsEncoded => self.reals_enc.as_ref(),
            Stream::FakesEncoded => self.fakes_enc.as_ref(),
        };
        tensor.ok_or_else(|| anyhow!("stream {stream:?} was not produced this step"))
    }
}

/// Owns the kernel setup of a run and wires assembly into the RBF layer.
#[derive(Debug, Clone)]
pub struct RbfSolver {
    rbf_n: i64,
    rbf_m: i64,
    rbf_pow: Option<i64>,
    kernel: PhsKernel,
    batch_size: i64,
    target_data: Stream,
    generator_data: Stream,
}

impl RbfSolver {
    pub fn new(config: &RunConfig) -> RbfSolver {
        let (target_data, generator_data) = config.gan.roles();
        RbfSolver {
            rbf_n: config.rbf_n,
            rbf_m: config.rbf_m,
            rbf_pow: config.rbf_pow,
            kernel: PhsKernel::new(config.rbf_n, config.rbf_m, config.rbf_pow),
            batch_size: config.batch_size,
            target_data,
            generator_data,
        }
    }

    pub fn poly_case(&self) -> KernelCase {
        self.kernel.case()
    }

    pub fn rbf_n(&self) -> i64 {
        self.rbf_n
    }

    /// Exponent actually used by the kernel.
    pub fn order(&self) -> i64 {
        self.kernel.order()
    }

    pub fn roles(&self) -> (Stream, Stream) {
        (self.target_data, self.generator_data)
    }

    /// One centre per target and generator sample of a batch.
    pub fn num_centres(&self) -> i64 {
        2 * self.batch_size
    }

    pub fn discriminator_model_rbf(&self, path: nn::Path) -> Result<RbfLayer> {
        let mut layer = RbfLayerConfig::new(self.num_centres(), self.rbf_m);
        layer.rbf_pow = self.rbf_pow;
        layer.bind(path, self.rbf_n)
    }

    pub fn find_rbf_centres_weights(&self, streams: &StepStreams) -> Result<CentresWeights> {
        let c_d = streams.get(self.target_data)?;
        let c_g = streams.get(self.generator_data)?;
        assemble(c_d, c_g)
    }
}
