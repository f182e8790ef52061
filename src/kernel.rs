use tch::{Kind, Tensor};

/// Added inside the logarithm so that `log` stays finite when a query sits on a centre.
pub const LOG_EPS: f64 = 1e-100;

/// Closed-form regime of the polyharmonic kernel, fixed by the sample
/// dimensionality `n` and the kernel order `m`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelCase {
    /// n odd, m < (n+1)/2.
    OddLowOrder,
    /// n odd, m >= (n+1)/2.
    OddHighOrder,
    /// n even, m <= n/2 - 1. The exponent 2m - n is negative.
    EvenNegative { eta: f64 },
    /// n even, m > n/2 - 1. The exponent 2m - n is non-negative.
    EvenPositive { eta: f64 },
}

impl KernelCase {
    pub fn select(n: i64, m: i64) -> KernelCase {
        if n % 2 == 1 {
            // m < (n+1)/2  <=>  2m < n+1
            if 2 * m < n + 1 {
                KernelCase::OddLowOrder
            } else {
                KernelCase::OddHighOrder
            }
        } else {
            let eta = n as f64 / 2.0;
            // m <= n/2 - 1  <=>  2m <= n - 2
            if 2 * m <= n - 2 {
                KernelCase::EvenNegative { eta }
            } else {
                KernelCase::EvenPositive { eta }
            }
        }
    }

    pub fn eta(&self) -> Option<f64> {
        match self {
            KernelCase::EvenNegative { eta } | KernelCase::EvenPositive { eta } => Some(*eta),
            _ => None,
        }
    }

    /// Only the even, non-negative exponent regime carries the `log r` factor.
    pub fn has_log(&self) -> bool {
        matches!(self, KernelCase::EvenPositive { .. })
    }
}

/// Polyharmonic spline kernel `phi(r) = r^k` or `phi(r) = r^k log(r + eps)`.
///
/// The exponent defaults to `2m - n` and may be overridden. The log form is
/// chosen from `n` and `2m - n` only, so an override changes the power but
/// never the regime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhsKernel {
    case: KernelCase,
    order: i64,
}

impl PhsKernel {
    pub fn new(n: i64, m: i64, order_override: Option<i64>) -> PhsKernel {
        PhsKernel {
            case: KernelCase::select(n, m),
            order: order_override.unwrap_or(2 * m - n),
        }
    }

    pub fn case(&self) -> KernelCase {
        self.case
    }

    pub fn order(&self) -> i64 {
        self.order
    }

    /// Scalar form, used to check the tensor path.
    ///
    /// At `r = 0` with a negative exponent this returns `inf`, the singularity is not clamped.
    #[cfg(test)]
    pub fn phi(&self, r: f64) -> f64 {
        let power = r.powf(self.order as f64);
        if self.case.has_log() {
            power * (r + LOG_EPS).ln()
        } else {
            power
        }
    }

    /// Elementwise kernel over a distance tensor. The computation runs in f64
    /// (1e-100 underflows in f32) and the result keeps the kind of `dist`.
    pub fn apply(&self, dist: &Tensor) -> Tensor {
        let kind = dist.kind();
        let r = dist.to_kind(Kind::Double);
        let power = r.pow_tensor_scalar(self.order as f64);
        let phi = if self.case.has_log() {
            power * (r + LOG_EPS).log()
        } else {
            power
        };
        phi.to_kind(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    #[test]
    fn cases_are_exhaustive_and_stable() {
        for n in 1..=16 {
            for m in 1..=16 {
                let case = KernelCase::select(n, m);
                assert_eq!(case, KernelCase::select(n, m));
                let odd = n % 2 == 1;
                match case {
                    KernelCase::OddLowOrder => assert!(odd && (m as f64) < (n as f64 + 1.) / 2.),
                    KernelCase::OddHighOrder => assert!(odd && (m as f64) >= (n as f64 + 1.) / 2.),
                    KernelCase::EvenNegative { eta } => {
                        assert!(!odd && (m as f64) <= n as f64 / 2. - 1.);
                        assert_eq!(eta, n as f64 / 2.);
                    }
                    KernelCase::EvenPositive { eta } => {
                        assert!(!odd && (m as f64) > n as f64 / 2. - 1.);
                        assert_eq!(eta, n as f64 / 2.);
                    }
                }
            }
        }
    }

    #[test]
    fn even_n2_m1_is_pure_log() {
        let kernel = PhsKernel::new(2, 1, None);
        assert_eq!(kernel.case(), KernelCase::EvenPositive { eta: 1.0 });
        assert_eq!(kernel.order(), 0);
        for r in [0.5, 1.0, 3.0] {
            assert!((kernel.phi(r) - (r + LOG_EPS).ln()).abs() < 1e-12);
        }
        assert!((kernel.phi(0.0) - LOG_EPS.ln()).abs() < 1e-9);
    }

    #[test]
    fn odd_n1_m1_is_identity() {
        let kernel = PhsKernel::new(1, 1, None);
        assert_eq!(kernel.case(), KernelCase::OddHighOrder);
        assert_eq!(kernel.order(), 1);
        assert_eq!(kernel.phi(0.0), 0.0);
        assert_eq!(kernel.phi(2.5), 2.5);
    }

    #[test]
    fn override_changes_power_not_regime() {
        let kernel = PhsKernel::new(2, 1, Some(2));
        assert!(kernel.case().has_log());
        assert!((kernel.phi(2.0) - 4.0 * 2f64.ln()).abs() < 1e-12);
        assert_eq!(kernel.phi(0.0), 0.0);
    }

    #[test]
    fn tensor_path_matches_scalar() {
        let kernel = PhsKernel::new(4, 3, None);
        let rs = [0.0f32, 0.25, 1.0, 2.0];
        let out = kernel.apply(&Tensor::from_slice(&rs));
        assert_eq!(out.kind(), Kind::Float);
        for (i, r) in rs.iter().enumerate() {
            let expected = kernel.phi(*r as f64);
            assert!((out.double_value(&[i as i64]) - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn log_guard_survives_f32_input() {
        let kernel = PhsKernel::new(2, 1, None);
        let out = kernel.apply(&Tensor::zeros([1], (Kind::Float, Device::Cpu)));
        let v = out.double_value(&[0]);
        assert!(v.is_finite());
        assert!((v - LOG_EPS.ln()).abs() < 1e-3);
    }

    #[test]
    fn negative_order_at_zero_distance_is_infinite() {
        // n = 6, m = 1: EvenNegative, order -4.
        let kernel = PhsKernel::new(6, 1, None);
        assert_eq!(kernel.order(), -4);
        assert!(kernel.phi(0.0).is_infinite());
        let out = kernel.apply(&Tensor::zeros([1], (Kind::Float, Device::Cpu)));
        let v = out.double_value(&[0]);
        assert!(v.is_infinite() && v > 0.0);
        // n = 3, m = 1: OddLowOrder, order -1.
        let kernel = PhsKernel::new(3, 1, None);
        assert_eq!(kernel.case(), KernelCase::OddLowOrder);
        assert!(kernel.phi(0.0).is_infinite());
        assert!((kernel.phi(2.0) - 0.5).abs() < 1e-12);
    }
}
