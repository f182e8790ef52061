use anyhow::{ensure, Result};
use tch::{Kind, Tensor};

/// Interpolation centres for one training step together with their signed
/// mass weights and the uniform weights of the regularisation term.
#[derive(Debug)]
pub struct CentresWeights {
    /// `[p + q, n]`, target rows first.
    pub centres: Tensor,
    /// `-1/p` for target rows, `+1/q` for generator rows.
    pub weights: Tensor,
    /// All ones, same length as `weights`.
    pub lamb_weights: Tensor,
}

impl CentresWeights {
    pub fn num_centres(&self) -> i64 {
        self.weights.size()[0]
    }
}

/// Collapses every axis after the batch axis, so image batches become rows.
pub fn flatten_samples(xs: &Tensor) -> Tensor {
    if xs.dim() > 2 {
        xs.flatten(1, -1)
    } else {
        xs.shallow_clone()
    }
}

/// Builds the centre set from a target batch and a generator batch.
///
/// Each side carries a total mass of one, sized by its own row count, so the
/// weights sum to zero even when the two batches differ in length. Nothing
/// beyond that is normalised.
pub fn assemble(target: &Tensor, generator: &Tensor) -> Result<CentresWeights> {
    let c_d = flatten_samples(target).detach();
    let c_g = flatten_samples(generator).detach().to_kind(c_d.kind());
    ensure!(
        c_d.dim() == 2 && c_g.dim() == 2,
        "centre batches must be [batch, dims], got {:?} and {:?}",
        target.size(),
        generator.size()
    );
    let (p, n_d) = (c_d.size()[0], c_d.size()[1]);
    let (q, n_g) = (c_g.size()[0], c_g.size()[1]);
    ensure!(p > 0 && q > 0, "centre batches must not be empty");
    ensure!(n_d == n_g, "target samples have {n_d} dims but generator samples have {n_g}");

    let options = (c_d.kind(), c_d.device());
    let centres = Tensor::cat(&[c_d, c_g.to_device(options.1)], 0);
    let d_d = Tensor::full([p], -1.0 / p as f64, options);
    let d_g = Tensor::full([q], 1.0 / q as f64, options);
    let weights = Tensor::cat(&[d_d, d_g], 0);
    let lamb_weights = Tensor::ones([p + q], options);
    Ok(CentresWeights { centres, weights, lamb_weights })
}
