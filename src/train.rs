//! Training loop.
//!
//! Two schedules over a fixed number of epochs:
//!
//! - **stochastic**: forward, loss, backward and optimizer step per example
//! - **batch**: mean loss over every example against one parameter snapshot,
//!   then a single backward and step per epoch
//!
//! A failing example aborts before `backward`, so no gradient from a partial
//! forward pass ever reaches the parameters.

use candle_core::{DType, Tensor};
use candle_nn::Optimizer;

use crate::config::{LossKind, TrainConfig, TrainMode};
use crate::dataset::Dataset;
use crate::model::generation::MelodyModel;
use crate::{Error, Result};

/// Scalar loss of one example.
pub fn example_loss(
    model: &MelodyModel,
    events: &Tensor,
    signals: &Tensor,
    kind: LossKind,
) -> Result<Tensor> {
    let out = model.forward(events, signals)?;
    let target = signals.to_dtype(DType::F32)?;
    let loss = match kind {
        LossKind::Mse => candle_nn::loss::mse(&model.normalize(&out.logits)?, &target)?,
        LossKind::BceWithLogits => {
            candle_nn::loss::binary_cross_entropy_with_logit(&out.logits, &target)?
        }
    };
    Ok(loss)
}

/// Drives an optimizer over a dataset.
pub struct Trainer<O: Optimizer> {
    optimizer: O,
    config: TrainConfig,
}

impl<O: Optimizer> Trainer<O> {
    pub fn new(optimizer: O, config: TrainConfig) -> Self {
        Self { optimizer, config }
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Loss of example `index`. Degenerate examples come back as
    /// `Ok(None)`; every other failure carries the example index.
    fn loss_at(
        &self,
        model: &MelodyModel,
        dataset: &Dataset,
        index: usize,
    ) -> Result<Option<Tensor>> {
        let (events, signals) = dataset.example(index)?;
        match example_loss(model, &events, signals, self.config.loss) {
            Ok(loss) => Ok(Some(loss)),
            Err(Error::DegenerateSequence { events, signals }) => {
                tracing::warn!(example = index, events, signals, "skipping degenerate example");
                Ok(None)
            }
            Err(err) => Err(err.in_example(index)),
        }
    }

    /// Arithmetic mean of the per-example losses, skipping degenerate examples.
    pub fn mean_loss(&self, model: &MelodyModel, dataset: &Dataset) -> Result<Tensor> {
        let mut losses = Vec::with_capacity(dataset.len());
        for index in 0..dataset.len() {
            if let Some(loss) = self.loss_at(model, dataset, index)? {
                losses.push(loss);
            }
        }
        if losses.is_empty() {
            return Err(Error::Dataset("no trainable examples".into()));
        }
        Ok(Tensor::stack(&losses, 0)?.mean_all()?)
    }

    /// Train for the configured number of epochs and return the loss history.
    ///
    /// Stochastic mode records one entry per optimizer step, batch mode one
    /// per epoch.
    pub fn fit(&mut self, model: &MelodyModel, dataset: &Dataset) -> Result<Vec<f64>> {
        tracing::info!(
            parameters = model.parameters().count(),
            examples = dataset.len(),
            epochs = self.config.epochs,
            mode = ?self.config.mode,
            loss = ?self.config.loss,
            "starting training"
        );
        match self.config.mode {
            TrainMode::Stochastic => self.fit_stochastic(model, dataset),
            TrainMode::Batch => self.fit_batch(model, dataset),
        }
    }

    fn fit_stochastic(&mut self, model: &MelodyModel, dataset: &Dataset) -> Result<Vec<f64>> {
        let log_every = self.config.log_every.max(1);
        let mut history = Vec::with_capacity(self.config.epochs * dataset.len());
        for epoch in 1..=self.config.epochs {
            for index in 0..dataset.len() {
                let Some(loss) = self.loss_at(model, dataset, index)? else {
                    continue;
                };
                self.optimizer.backward_step(&loss)?;
                let cost = f64::from(loss.to_scalar::<f32>()?);
                history.push(cost);
                if index % log_every == 0 {
                    tracing::info!(epoch, examples_trained = index, cost, "training");
                }
            }
        }
        Ok(history)
    }

    fn fit_batch(&mut self, model: &MelodyModel, dataset: &Dataset) -> Result<Vec<f64>> {
        let mut history = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            let loss = self.mean_loss(model, dataset)?;
            self.optimizer.backward_step(&loss)?;
            let cost = f64::from(loss.to_scalar::<f32>()?);
            history.push(cost);
            tracing::info!(epoch, cost, "training");
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::model::durations::DurationVector;
    use crate::model::groups::OutputGroups;
    use crate::optim::{RmsProp, RmsPropConfig};
    use candle_core::Device;

    fn toy_dataset(dev: &Device) -> Dataset {
        let events = Tensor::new(
            &[
                [
                    [0f32, 1., 0., 0., 0.],
                    [0., 0., 1., 0., 0.],
                    [0., 0., 0., 1., 0.],
                    [0., 0., 0., 0., 1.],
                ],
                [
                    [0., 0., 0., 1., 0.],
                    [0., 0., 0., 0., 1.],
                    [0., 1., 0., 0., 0.],
                    [0., 0., 1., 0., 0.],
                ],
            ],
            dev,
        )
        .unwrap();
        let signals = vec![
            Tensor::new(&[[0f32, 1., 0.], [0., 0., 1.], [0., 1., 0.]], dev).unwrap(),
            Tensor::new(&[[0f32, 1., 0.], [0., 1., 0.], [0., 1., 0.], [0., 1., 0.]], dev).unwrap(),
        ];
        Dataset::from_parts(events, signals, None).unwrap()
    }

    fn toy_model(dev: &Device) -> MelodyModel {
        let cfg = ModelConfig {
            event_emb_size: 5,
            signal_emb_size: 3,
            event_hidden_size: 8,
            signal_hidden_size: 8,
        };
        let durations = DurationVector::linear(3, 0, 2, 1.0).unwrap();
        MelodyModel::new(cfg, durations, OutputGroups::single(3).unwrap(), 123, dev).unwrap()
    }

    fn snapshot(model: &MelodyModel) -> Vec<Vec<f32>> {
        model
            .vars()
            .iter()
            .map(|v| v.flatten_all().unwrap().to_vec1::<f32>().unwrap())
            .collect()
    }

    #[test]
    fn test_batch_training_reduces_loss() {
        let dev = Device::Cpu;
        let dataset = toy_dataset(&dev);
        let model = toy_model(&dev);
        let opt = RmsProp::new(
            model.vars(),
            RmsPropConfig {
                lr: 1e-3,
                ..Default::default()
            },
        )
        .unwrap();
        let config = TrainConfig {
            epochs: 60,
            mode: TrainMode::Batch,
            loss: LossKind::Mse,
            log_every: 1,
        };
        let mut trainer = Trainer::new(opt, config);
        let history = trainer.fit(&model, &dataset).unwrap();
        assert_eq!(history.len(), 60);
        let first = history[0];
        let last = *history.last().unwrap();
        assert!(last < first, "loss did not decrease: {first} -> {last}");
    }

    #[test]
    fn test_stochastic_history_has_one_entry_per_step() {
        let dev = Device::Cpu;
        let dataset = toy_dataset(&dev);
        let model = toy_model(&dev);
        let before = snapshot(&model);
        let opt = candle_nn::SGD::new(model.vars(), 0.01).unwrap();
        let config = TrainConfig {
            epochs: 3,
            mode: TrainMode::Stochastic,
            loss: LossKind::BceWithLogits,
            log_every: 1,
        };
        let history = Trainer::new(opt, config).fit(&model, &dataset).unwrap();
        assert_eq!(history.len(), 6);
        assert!(history.iter().all(|c| c.is_finite() && *c > 0.0));
        assert_ne!(before, snapshot(&model), "parameters should move");
    }

    #[test]
    fn test_mean_loss_is_average_of_examples() {
        let dev = Device::Cpu;
        let dataset = toy_dataset(&dev);
        let model = toy_model(&dev);
        let opt = candle_nn::SGD::new(model.vars(), 0.01).unwrap();
        let trainer = Trainer::new(opt, TrainConfig::default());

        let mean = trainer
            .mean_loss(&model, &dataset)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        let mut sum = 0.0f32;
        for j in 0..dataset.len() {
            let (e, s) = dataset.example(j).unwrap();
            sum += example_loss(&model, &e, s, LossKind::BceWithLogits)
                .unwrap()
                .to_scalar::<f32>()
                .unwrap();
        }
        assert!((mean - sum / 2.0).abs() < 1e-6, "{mean} vs {}", sum / 2.0);
    }

    #[test]
    fn test_overrun_aborts_batch_without_touching_parameters() {
        let dev = Device::Cpu;
        let events = Tensor::zeros((2, 2, 5), DType::F32, &dev).unwrap();
        let signals = vec![
            Tensor::new(&[[0f32, 1., 0.], [0., 1., 0.]], &dev).unwrap(),
            // Slot 2 lasts 2 units but there are only 2 events.
            Tensor::new(&[[0f32, 0., 1.], [0., 1., 0.]], &dev).unwrap(),
        ];
        let dataset = Dataset::from_parts(events, signals, None).unwrap();
        let model = toy_model(&dev);
        let before = snapshot(&model);

        let opt = candle_nn::SGD::new(model.vars(), 0.1).unwrap();
        let config = TrainConfig {
            epochs: 1,
            mode: TrainMode::Batch,
            loss: LossKind::Mse,
            log_every: 1,
        };
        let err = Trainer::new(opt, config).fit(&model, &dataset).unwrap_err();
        match err {
            Error::Example { index, source } => {
                assert_eq!(index, 1);
                assert!(matches!(
                    *source,
                    Error::AlignmentOverrun {
                        step: 1,
                        index: 2,
                        num_events: 2
                    }
                ));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(before, snapshot(&model));
    }

    #[test]
    fn test_degenerate_examples_are_skipped() {
        let dev = Device::Cpu;
        let events = Tensor::zeros((2, 3, 5), DType::F32, &dev).unwrap();
        let signals = vec![
            Tensor::zeros((0, 3), DType::F32, &dev).unwrap(),
            Tensor::new(&[[0f32, 1., 0.], [0., 1., 0.]], &dev).unwrap(),
        ];
        let dataset = Dataset::from_parts(events, signals, None).unwrap();
        let model = toy_model(&dev);
        let opt = candle_nn::SGD::new(model.vars(), 0.01).unwrap();
        let config = TrainConfig {
            epochs: 2,
            mode: TrainMode::Stochastic,
            loss: LossKind::Mse,
            log_every: 10,
        };
        let history = Trainer::new(opt, config).fit(&model, &dataset).unwrap();
        assert_eq!(history.len(), 2);
    }
}
