use anyhow::{ensure, Result};
use tch::{nn, Tensor};

use crate::centres::{flatten_samples, CentresWeights};
use crate::kernel::PhsKernel;

// cdist compute mode that never takes the matmul shortcut, so distances stay exact.
const CDIST_NO_MM: i64 = 2;

/// Settings of an RBF layer before it knows its input dimensionality.
#[derive(Debug, Clone, Copy)]
pub struct RbfLayerConfig {
    pub num_centres: i64,
    pub order_m: i64,
    /// Replaces the default exponent `2m - n`.
    pub rbf_pow: Option<i64>,
    pub centre_init: nn::Init,
    pub weight_init: nn::Init,
}

impl RbfLayerConfig {
    pub fn new(num_centres: i64, order_m: i64) -> RbfLayerConfig {
        RbfLayerConfig {
            num_centres,
            order_m,
            rbf_pow: None,
            centre_init: nn::Init::Uniform { lo: 0.0, up: 1.0 },
            weight_init: nn::Init::Const(1.0),
        }
    }

    /// Creates the `centres` and `rbf_weights` variables under `path` for
    /// `n`-dimensional inputs. The kernel regime is fixed here for good.
    pub fn bind(self, path: nn::Path, n: i64) -> Result<RbfLayer> {
        ensure!(n > 0, "rbf layer needs a positive input dimensionality, got {n}");
        ensure!(self.num_centres > 0, "rbf layer needs at least one centre");
        ensure!(self.order_m > 0, "kernel order m must be positive, got {}", self.order_m);
        let centres = path.var("centres", &[self.num_centres, n], self.centre_init);
        let weights = path.var("rbf_weights", &[self.num_centres], self.weight_init);
        Ok(RbfLayer {
            centres,
            weights,
            kernel: PhsKernel::new(n, self.order_m, self.rbf_pow),
            n,
        })
    }
}

/// Polyharmonic kernel expansion `D(x) = sum_i w_i phi(|x - c_i|)`.
#[derive(Debug)]
pub struct RbfLayer {
    centres: Tensor,
    weights: Tensor,
    kernel: PhsKernel,
    n: i64,
}

impl RbfLayer {
    pub fn dims(&self) -> i64 {
        self.n
    }

    pub fn num_centres(&self) -> i64 {
        self.weights.size()[0]
    }

    pub fn centres(&self) -> &Tensor {
        &self.centres
    }

    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// Overwrites centres and mixing weights in place with a freshly
    /// assembled set. Gradients do not flow through the assignment.
    pub fn assign(&mut self, cw: &CentresWeights) -> Result<()> {
        ensure!(
            cw.centres.size() == self.centres.size(),
            "assembled centres {:?} do not fit the layer's {:?}",
            cw.centres.size(),
            self.centres.size()
        );
        ensure!(
            cw.num_centres() == self.num_centres(),
            "assembled {} weights for a layer with {} centres",
            cw.num_centres(),
            self.num_centres()
        );
        let kind = self.centres.kind();
        let device = self.centres.device();
        tch::no_grad(|| {
            self.centres.copy_(&cw.centres.to_device(device).to_kind(kind));
            self.weights.copy_(&cw.weights.to_device(device).to_kind(kind));
        });
        Ok(())
    }

    /// `[B, num_centres]` matrix of `|x_b - c_i|`, computed in f64.
    ///
    /// Differences are taken pairwise inside the kernel without the `[B, N, n]`
    /// intermediate, and coincident points give exactly zero.
    pub fn distances(&self, xs: &Tensor) -> Tensor {
        let x = xs.to_kind(tch::Kind::Double);
        let c = self.centres.to_kind(tch::Kind::Double);
        Tensor::cdist(&x, &c, 2.0, CDIST_NO_MM)
    }

    /// Flattens `xs` and rejects queries whose width differs from the built dims.
    fn check(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = flatten_samples(xs);
        ensure!(xs.dim() == 2, "rbf layer expects [batch, {}] inputs, got {:?}", self.n, xs.size());
        let n = xs.size()[1];
        ensure!(n == self.n, "rbf layer was built for {} dims but got inputs with {n}", self.n);
        Ok(xs)
    }

    /// Scores `[B, n]` queries (or image batches that flatten to `n`) and
    /// returns a `[B, 1]` tensor.
    pub fn score(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.check(xs)?;
        Ok(self.forward_unchecked(&xs))
    }

    fn forward_unchecked(&self, xs: &Tensor) -> Tensor {
        let phi = self.kernel.apply(&self.distances(xs));
        let w = self.weights.to_kind(tch::Kind::Double).unsqueeze(1);
        phi.matmul(&w).to_kind(xs.kind())
    }
}

impl nn::Module for RbfLayer {
    /// Panics on a dimensionality mismatch, use [`RbfLayer::score`] to get the error instead.
    fn forward(&self, xs: &Tensor) -> Tensor {
        match self.check(xs) {
            Ok(xs) => self.forward_unchecked(&xs),
            Err(err) => panic!("{err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::centres::assemble;
    use tch::{Device, Kind};

    fn unit_square() -> Tensor {
        Tensor::from_slice(&[0f32, 0., 1., 0., 0., 1., 1., 1.]).reshape([4, 2])
    }

    #[test]
    fn bind_creates_trainable_parameters() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layer = RbfLayerConfig::new(6, 1).bind(vs.root() / "rbf", 3).unwrap();
        assert_eq!(layer.centres().size(), vec![6, 3]);
        assert_eq!(layer.weights().size(), vec![6]);
        assert_eq!(vs.trainable_variables().len(), 2);
        let min = layer.centres().min().double_value(&[]);
        let max = layer.centres().max().double_value(&[]);
        assert!(min >= 0.0 && max <= 1.0);
        assert_eq!(layer.weights().sum(Kind::Double).double_value(&[]), 6.0);
    }

    #[test]
    fn unit_square_snapshot() {
        // n = 2, m = 1: phi(r) = log(r + eps), weights all one.
        let vs = nn::VarStore::new(Device::Cpu);
        let mut layer = RbfLayerConfig::new(4, 1).bind(vs.root(), 2).unwrap();
        let cw = CentresWeights {
            centres: unit_square(),
            weights: Tensor::ones([4], (Kind::Float, Device::Cpu)),
            lamb_weights: Tensor::ones([4], (Kind::Float, Device::Cpu)),
        };
        layer.assign(&cw).unwrap();
        let out = layer.score(&unit_square()).unwrap();
        assert_eq!(out.size(), vec![4, 1]);
        // Each corner: itself (log eps), two neighbours at 1 (log 1 = 0), one at sqrt 2.
        let expected = 1e-100f64.ln() + 0.5 * 2f64.ln();
        for row in 0..4 {
            let v = out.double_value(&[row, 0]);
            assert!((v - expected).abs() < 1e-3, "row {row}: {v} vs {expected}");
        }
    }

    #[test]
    fn forward_is_idempotent() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layer = RbfLayerConfig::new(8, 2).bind(vs.root(), 3).unwrap();
        let xs = Tensor::rand([5, 3], (Kind::Float, Device::Cpu));
        let a = layer.score(&xs).unwrap();
        let b = layer.score(&xs).unwrap();
        assert!(a.equal(&b));
    }

    #[test]
    fn module_forward_matches_checked_score() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layer = RbfLayerConfig::new(4, 1).bind(vs.root(), 2).unwrap();
        let xs = Tensor::rand([3, 2], (Kind::Float, Device::Cpu));
        let scored = layer.score(&xs).unwrap();
        assert!(xs.apply(&layer).equal(&scored));
    }

    #[test]
    fn query_dims_mismatch_is_an_error() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layer = RbfLayerConfig::new(4, 1).bind(vs.root(), 2).unwrap();
        let xs = Tensor::rand([5, 3], (Kind::Float, Device::Cpu));
        assert!(layer.score(&xs).is_err());
        // A single column would broadcast against every coordinate.
        let xs = Tensor::rand([5, 1], (Kind::Float, Device::Cpu));
        assert!(layer.score(&xs).is_err());
    }

    #[test]
    #[should_panic(expected = "built for 2 dims but got inputs with 1")]
    fn module_forward_rejects_narrow_queries() {
        let vs = nn::VarStore::new(Device::Cpu);
        let layer = RbfLayerConfig::new(4, 1).bind(vs.root(), 2).unwrap();
        let xs = Tensor::rand([5, 1], (Kind::Float, Device::Cpu));
        let _ = xs.apply(&layer);
    }

    #[test]
    fn distances_match_explicit_differences() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut layer = RbfLayerConfig::new(4, 1).bind(vs.root(), 2).unwrap();
        let cw = CentresWeights {
            centres: unit_square(),
            weights: Tensor::ones([4], (Kind::Float, Device::Cpu)),
            lamb_weights: Tensor::ones([4], (Kind::Float, Device::Cpu)),
        };
        layer.assign(&cw).unwrap();
        let queries = Tensor::from_slice(&[0f32, 0., 0.5, 0.5, 3., 4.]).reshape([3, 2]);
        let dist = layer.distances(&queries);
        assert_eq!(dist.size(), vec![3, 4]);
        assert_eq!(dist.double_value(&[0, 0]), 0.0);
        assert!((dist.double_value(&[0, 3]) - 2f64.sqrt()).abs() < 1e-12);
        assert!((dist.double_value(&[1, 2]) - 0.5f64.sqrt()).abs() < 1e-12);
        assert!((dist.double_value(&[2, 0]) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn assign_rejects_wrong_centre_count() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut layer = RbfLayerConfig::new(4, 1).bind(vs.root(), 2).unwrap();
        let target = Tensor::rand([3, 2], (Kind::Float, Device::Cpu));
        let cw = assemble(&target, &target).unwrap();
        assert!(layer.assign(&cw).is_err());
    }

    #[test]
    fn energy_distance_form_for_odd_dims() {
        // n = 1, m = 1: phi(r) = r, so D(x) = mean |x - g| - mean |x - d|.
        let vs = nn::VarStore::new(Device::Cpu);
        let mut layer = RbfLayerConfig::new(4, 1).bind(vs.root(), 1).unwrap();
        let target = Tensor::from_slice(&[0f32, 2.]).reshape([2, 1]);
        let generator = Tensor::from_slice(&[4f32, 6.]).reshape([2, 1]);
        layer.assign(&assemble(&target, &generator).unwrap()).unwrap();
        let out = layer.score(&Tensor::from_slice(&[1f32]).reshape([1, 1])).unwrap();
        // (3 + 5)/2 - (1 + 1)/2 = 3
        assert!((out.double_value(&[0, 0]) - 3.0).abs() < 1e-5);
    }

    #[test]
    fn coincident_centre_under_negative_order_gives_inf() {
        // n = 4, m = 1: order -2, no log factor.
        let vs = nn::VarStore::new(Device::Cpu);
        let mut layer = RbfLayerConfig::new(2, 1).bind(vs.root(), 4).unwrap();
        let target = Tensor::zeros([1, 4], (Kind::Float, Device::Cpu));
        let generator = Tensor::ones([1, 4], (Kind::Float, Device::Cpu));
        layer.assign(&assemble(&target, &generator).unwrap()).unwrap();
        let out = layer.score(&target).unwrap();
        let v = out.double_value(&[0, 0]);
        // -1 * inf + 1 * (1/4)
        assert!(v.is_infinite() && v < 0.0);
    }

    #[test]
    fn gradients_reach_queries_through_coincident_centres() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut layer = RbfLayerConfig::new(4, 1).bind(vs.root(), 2).unwrap();
        let target = Tensor::rand([2, 2], (Kind::Float, Device::Cpu));
        let generator = Tensor::rand([2, 2], (Kind::Float, Device::Cpu));
        layer.assign(&assemble(&target, &generator).unwrap()).unwrap();
        let queries = generator.set_requires_grad(true);
        let loss = layer.score(&queries).unwrap().mean(Kind::Float);
        loss.backward();
        let grad = queries.grad();
        assert_eq!(grad.size(), vec![2, 2]);
        assert!(grad.isfinite().all().int64_value(&[]) == 1);
    }
}
