//! RMSprop optimizer for candle `Var`s.
//!
//! Centered variant with momentum and L2 weight decay, the update rule the
//! melody model was tuned with:
//!
//! ```text
//! g   = ∇ + λ·p
//! v   = α·v + (1-α)·g²
//! m   = α·m + (1-α)·g              (centered only)
//! den = sqrt(v - m²) + ε           (sqrt(v) + ε when not centered)
//! b   = μ·b + g / den              (b = g / den when μ = 0)
//! p   = p - lr·b
//! ```
//!
//! Implements [`candle_nn::Optimizer`], so it is interchangeable with
//! `candle_nn::SGD` and `candle_nn::AdamW` in the trainer.

use candle_core::backprop::GradStore;
use candle_core::{Result, Var};
use candle_nn::Optimizer;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RmsPropConfig {
    pub lr: f64,
    /// Smoothing constant for the running averages.
    pub alpha: f64,
    pub eps: f64,
    pub weight_decay: f64,
    pub momentum: f64,
    /// Normalize by the running variance instead of the raw second moment.
    pub centered: bool,
}

impl Default for RmsPropConfig {
    fn default() -> Self {
        Self {
            lr: 5e-4,
            alpha: 0.99,
            eps: 1e-8,
            weight_decay: 0.0,
            momentum: 0.5,
            centered: true,
        }
    }
}

#[derive(Debug)]
struct VarState {
    var: Var,
    square_avg: Var,
    grad_avg: Var,
    momentum_buffer: Var,
}

#[derive(Debug)]
pub struct RmsProp {
    vars: Vec<VarState>,
    config: RmsPropConfig,
}

impl RmsProp {
    pub fn config(&self) -> &RmsPropConfig {
        &self.config
    }
}

impl Optimizer for RmsProp {
    type Config = RmsPropConfig;

    fn new(vars: Vec<Var>, config: RmsPropConfig) -> Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let zeros = || Var::zeros(var.shape(), var.dtype(), var.device());
                Ok(VarState {
                    square_avg: zeros()?,
                    grad_avg: zeros()?,
                    momentum_buffer: zeros()?,
                    var,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { vars, config })
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        let cfg = &self.config;
        for state in &self.vars {
            let Some(grad) = grads.get(state.var.as_tensor()) else {
                continue;
            };
            let grad = if cfg.weight_decay != 0.0 {
                (grad + (state.var.as_tensor() * cfg.weight_decay)?)?
            } else {
                grad.clone()
            };

            let square_avg = ((state.square_avg.as_tensor() * cfg.alpha)?
                + (grad.sqr()? * (1.0 - cfg.alpha))?)?;
            let denom = if cfg.centered {
                let grad_avg = ((state.grad_avg.as_tensor() * cfg.alpha)?
                    + (&grad * (1.0 - cfg.alpha))?)?;
                // relu clamps rounding noise below zero before the sqrt.
                let variance = (&square_avg - grad_avg.sqr()?)?.relu()?;
                state.grad_avg.set(&grad_avg)?;
                (variance.sqrt()? + cfg.eps)?
            } else {
                (square_avg.sqrt()? + cfg.eps)?
            };
            state.square_avg.set(&square_avg)?;

            let scaled = (&grad / &denom)?;
            let delta = if cfg.momentum > 0.0 {
                let buffer = ((state.momentum_buffer.as_tensor() * cfg.momentum)? + scaled)?;
                state.momentum_buffer.set(&buffer)?;
                buffer
            } else {
                scaled
            };

            state
                .var
                .set(&(state.var.as_tensor() - (delta * cfg.lr)?)?)?;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.config.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    fn quadratic_descent(config: RmsPropConfig, steps: usize) -> f32 {
        let dev = Device::Cpu;
        let x = Var::from_tensor(&Tensor::new(&[3.0f32, -2.0], &dev).unwrap()).unwrap();
        let mut opt = RmsProp::new(vec![x.clone()], config).unwrap();
        for _ in 0..steps {
            let loss = x.as_tensor().sqr().unwrap().sum_all().unwrap();
            opt.backward_step(&loss).unwrap();
        }
        x.as_tensor()
            .sqr()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    #[test]
    fn centered_momentum_minimizes_quadratic() {
        let config = RmsPropConfig {
            lr: 0.05,
            ..Default::default()
        };
        let loss = quadratic_descent(config, 200);
        assert!(loss < 1.0, "loss after descent = {loss}");
    }

    #[test]
    fn plain_rmsprop_minimizes_quadratic() {
        let config = RmsPropConfig {
            lr: 0.05,
            momentum: 0.0,
            centered: false,
            weight_decay: 1e-4,
            ..Default::default()
        };
        let loss = quadratic_descent(config, 200);
        assert!(loss < 1.0, "loss after descent = {loss}");
    }

    #[test]
    fn first_step_moves_against_gradient() {
        let dev = Device::Cpu;
        let x = Var::from_tensor(&Tensor::new(&[1.0f32], &dev).unwrap()).unwrap();
        let mut opt = RmsProp::new(
            vec![x.clone()],
            RmsPropConfig {
                lr: 0.01,
                momentum: 0.0,
                centered: false,
                ..Default::default()
            },
        )
        .unwrap();
        let loss = x.as_tensor().sqr().unwrap().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();
        // v = 0.01 * g², so the first update is lr * g / (0.1|g|) = 10 * lr.
        let after = x.as_tensor().to_vec1::<f32>().unwrap()[0];
        assert!((after - 0.9).abs() < 1e-4, "x after one step = {after}");
    }

    #[test]
    fn learning_rate_is_adjustable() {
        let mut opt = RmsProp::new(vec![], RmsPropConfig::default()).unwrap();
        assert_eq!(opt.learning_rate(), 5e-4);
        opt.set_learning_rate(1e-3);
        assert_eq!(opt.learning_rate(), 1e-3);
    }
}
