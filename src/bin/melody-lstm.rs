//! melody-lstm CLI: train and sample the chord-conditioned melody model.
//!
//! # Subcommands
//!
//! - `train` fits a fresh model on a JSON dataset and writes its parameters
//!   to a safetensors file, with the model sizes next to it as `<output>.json`.
//!   Prints `{"path":...,"steps":...,"final_loss":...}` on success.
//! - `generate` loads those parameters and prints one JSON line for a
//!   dataset example:
//!
//! ```json
//! {"example":0,"steps":3,"stop":"Completed","slots":[[1],[2],[1]],"event_indices":[0,1,3]}
//! ```
//!
//! - `demo` trains on two toy chord/melody pairs and prints predictions for
//!   the training chords plus two unseen progressions.
//!
//! Datasets without a pitch/duration layout use the slot-index encoding:
//! slot `i` lasts `i` event-time units.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::Optimizer;
use clap::{Parser, Subcommand, ValueEnum};
use melody_lstm_rs::{
    config::{GenerationConfig, LossKind, ModelConfig, TrainConfig, TrainMode},
    dataset::Dataset,
    model::{DurationVector, MelodyModel, OutputGroups},
    optim::{RmsProp, RmsPropConfig},
    train::Trainer,
};

#[derive(Parser, Debug)]
#[command(
    name = "melody-lstm",
    about = "Chord-conditioned melody generation with a dual-clock LSTM"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a fresh model on a JSON dataset.
    Train {
        #[arg(long)]
        dataset: PathBuf,

        /// Where to write the trained parameters (safetensors).
        #[arg(long, short = 'o')]
        output: PathBuf,

        #[arg(long, default_value_t = 10)]
        epochs: usize,

        #[arg(long, value_enum, default_value_t = Mode::Stochastic)]
        mode: Mode,

        #[arg(long, value_enum, default_value_t = Loss::Bce)]
        loss: Loss,

        #[arg(long, default_value_t = 5e-4)]
        lr: f64,

        /// Seed for parameter initialization.
        #[arg(long, short = 's', default_value_t = 123)]
        seed: u64,

        /// Hidden width of the chord encoder.
        #[arg(long, default_value_t = 16)]
        event_hidden: usize,

        /// Hidden width of the melody decoder.
        #[arg(long, default_value_t = 48)]
        signal_hidden: usize,
    },
    /// Generate a melody for one dataset example with trained parameters.
    Generate {
        #[arg(long)]
        dataset: PathBuf,

        /// Parameters written by `train`.
        #[arg(long)]
        params: PathBuf,

        /// Index of the example whose chords condition the melody.
        #[arg(long, default_value_t = 0)]
        example: usize,

        /// Step cap per event, raised automatically for short durations.
        #[arg(long, default_value_t = 16)]
        max_steps_per_event: usize,
    },
    /// Train on a toy two-example dataset and print predictions.
    Demo {
        #[arg(long, default_value_t = 1500)]
        epochs: usize,

        #[arg(long, default_value_t = 0.01)]
        lr: f64,

        #[arg(long, short = 's', default_value_t = 123)]
        seed: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Stochastic,
    Batch,
}

impl From<Mode> for TrainMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Stochastic => TrainMode::Stochastic,
            Mode::Batch => TrainMode::Batch,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Loss {
    Mse,
    Bce,
}

impl From<Loss> for LossKind {
    fn from(loss: Loss) -> Self {
        match loss {
            Loss::Mse => LossKind::Mse,
            Loss::Bce => LossKind::BceWithLogits,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let device = Device::Cpu;

    match args.command {
        Command::Train {
            dataset,
            output,
            epochs,
            mode,
            loss,
            lr,
            seed,
            event_hidden,
            signal_hidden,
        } => {
            let dataset = Dataset::load_json(&dataset, &device)?;
            let dims = dataset.dims();
            let config = ModelConfig {
                event_emb_size: dims.event_emb_size,
                signal_emb_size: dims.signal_emb_size,
                event_hidden_size: event_hidden,
                signal_hidden_size: signal_hidden,
            };
            let (durations, groups) = model_layout(&dataset, dims.signal_emb_size)?;
            let model = MelodyModel::new(config.clone(), durations, groups, seed, &device)?;

            let optimizer = RmsProp::new(
                model.vars(),
                RmsPropConfig {
                    lr,
                    ..Default::default()
                },
            )?;
            let train = TrainConfig {
                epochs,
                mode: mode.into(),
                loss: loss.into(),
                ..Default::default()
            };
            let history = Trainer::new(optimizer, train).fit(&model, &dataset)?;

            if let Some(parent) = output.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            model.save(&output)?;
            std::fs::write(config_path(&output), serde_json::to_string_pretty(&config)?)?;
            tracing::info!(path = %output.display(), "saved parameters");

            println!("{}", train_summary(&output, &history));
        }
        Command::Generate {
            dataset,
            params,
            example,
            max_steps_per_event,
        } => {
            let dataset = Dataset::load_json(&dataset, &device)?;
            let config: ModelConfig =
                serde_json::from_str(&std::fs::read_to_string(config_path(&params))?)?;
            let (durations, groups) = model_layout(&dataset, config.signal_emb_size)?;
            let model = MelodyModel::load(&params, config, durations, groups, &device)?;

            let (events, _) = dataset.example(example)?;
            let generation = model.generate(&events, &GenerationConfig { max_steps_per_event })?;

            println!(
                "{}",
                serde_json::json!({
                    "example": example,
                    "steps": generation.len(),
                    "stop": format!("{:?}", generation.stop),
                    "elapsed": generation.elapsed,
                    "slots": generation.slots,
                    "event_indices": generation.event_indices,
                })
            );
        }
        Command::Demo { epochs, lr, seed } => demo(epochs, lr, seed, &device)?,
    }

    Ok(())
}

/// Durations and output groups from the dataset layout, or the slot-index
/// encoding over a single group when the dataset has none.
fn model_layout(
    dataset: &Dataset,
    signal_emb_size: usize,
) -> anyhow::Result<(DurationVector, OutputGroups)> {
    match dataset.layout() {
        Some(layout) => Ok((
            DurationVector::from_layout(layout, signal_emb_size)?,
            OutputGroups::from_layout(layout)?,
        )),
        None => {
            if signal_emb_size == 0 {
                anyhow::bail!("dataset has no signal rows to infer the embedding width from");
            }
            tracing::info!("dataset has no layout, using slot-index durations");
            Ok((
                DurationVector::linear(signal_emb_size, 0, signal_emb_size - 1, 1.0)?,
                OutputGroups::single(signal_emb_size)?,
            ))
        }
    }
}

fn train_summary(output: &Path, history: &[f64]) -> serde_json::Value {
    serde_json::json!({
        "path": output.display().to_string(),
        "steps": history.len(),
        "final_loss": history.last().copied(),
    })
}

fn config_path(params: &Path) -> PathBuf {
    params.with_extension("json")
}

fn demo(epochs: usize, lr: f64, seed: u64, device: &Device) -> anyhow::Result<()> {
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
        device,
    )?;
    let signals = vec![
        Tensor::new(&[[0f32, 1., 0.], [0., 0., 1.], [0., 1., 0.]], device)?,
        Tensor::new(
            &[[0f32, 1., 0.], [0., 1., 0.], [0., 1., 0.], [0., 1., 0.]],
            device,
        )?,
    ];
    let dataset = Dataset::from_parts(events, signals, None)?;

    let config = ModelConfig {
        event_emb_size: 5,
        signal_emb_size: 3,
        event_hidden_size: 16,
        signal_hidden_size: 16,
    };
    let (durations, groups) = model_layout(&dataset, 3)?;
    let model = MelodyModel::new(config, durations, groups, seed, device)?;

    let optimizer = RmsProp::new(
        model.vars(),
        RmsPropConfig {
            lr,
            eps: 1e-6,
            weight_decay: 1e-6,
            momentum: 0.0,
            ..Default::default()
        },
    )?;
    let train = TrainConfig {
        epochs,
        mode: TrainMode::Stochastic,
        loss: LossKind::Mse,
        log_every: 1,
    };
    let history = Trainer::new(optimizer, train).fit(&model, &dataset)?;
    tracing::info!(
        final_loss = history.last().copied().unwrap_or(f64::NAN),
        "demo training done"
    );

    let unseen = Tensor::new(
        &[
            [0f32, 0., 1., 0., 0.],
            [0., 0., 0., 1., 0.],
            [0., 0., 0., 0., 1.],
            [0., 1., 0., 0., 0.],
        ],
        device,
    )?;
    let unseen_long = Tensor::cat(&[dataset.example(0)?.0, dataset.example(0)?.0], 0)?;

    let cfg = GenerationConfig::default();
    let mut cases = Vec::new();
    for j in 0..dataset.len() {
        let (events, truth) = dataset.example(j)?;
        cases.push((format!("example {j}"), events, Some(truth.clone())));
    }
    cases.push((
        "unseen".to_string(),
        unseen,
        Some(Tensor::new(&[[0f32, 0., 1.], [0., 1., 0.], [0., 1., 0.]], device)?),
    ));
    cases.push(("unseen long".to_string(), unseen_long, None));

    for (name, events, truth) in cases {
        let generation = model.generate(&events, &cfg)?;
        let truth = truth
            .map(|t| t.to_dtype(DType::F32)?.to_vec2::<f32>())
            .transpose()?;
        println!(
            "{}",
            serde_json::json!({
                "case": name,
                "ground_truth": truth,
                "prediction": generation.signals.to_vec2::<f32>()?,
                "event_indices": generation.event_indices,
                "stop": format!("{:?}", generation.stop),
            })
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn train_summary_escapes_path() {
        let path = Path::new(r#"out/"quoted"\params.safetensors"#);
        let line = train_summary(path, &[0.5, 0.25]).to_string();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["path"], path.display().to_string());
        assert_eq!(parsed["steps"], 2);
        assert_eq!(parsed["final_loss"], 0.25);
    }

    #[test]
    fn train_summary_without_steps_has_null_loss() {
        let line = train_summary(Path::new("p.safetensors"), &[]).to_string();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert!(parsed["final_loss"].is_null());
    }
}
