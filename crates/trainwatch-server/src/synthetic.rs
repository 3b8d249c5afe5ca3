//! Synthetic training collaborator
//!
//! Stands in for a real model: loss starts near `ln(num_classes)` (chance
//! level for a classifier) and decays with noise, predictions agree with the
//! ground truth more often as loss falls. Good enough to exercise the whole
//! control and streaming path without a GPU.

use crate::trainer::{RunContext, RunSummary, TrainError, Trainer};
use garde::Validate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use trainwatch_common::MetricEvent;

fn default_batches_per_epoch() -> u32 {
    3750
}

fn default_batch_size() -> u32 {
    16
}

fn default_num_classes() -> u32 {
    10
}

fn default_tolerance() -> f64 {
    0.005
}

/// Synthetic trainer parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SyntheticConfig {
    /// Batches per epoch
    #[serde(default = "default_batches_per_epoch")]
    #[garde(range(min = 1))]
    pub batches_per_epoch: u32,

    /// Samples per batch
    #[serde(default = "default_batch_size")]
    #[garde(range(min = 1, max = 4096))]
    pub batch_size: u32,

    /// Number of output classes
    #[serde(default = "default_num_classes")]
    #[garde(range(min = 2, max = 1000))]
    pub num_classes: u32,

    /// Simulated compute time per batch
    #[serde(default)]
    #[garde(skip)]
    pub batch_delay_ms: u64,

    /// Stop early once the epoch mean loss moves less than this
    #[serde(default = "default_tolerance")]
    #[garde(range(min = 0.0))]
    pub tolerance: f64,

    /// RNG seed; random when unset
    #[serde(default)]
    #[garde(skip)]
    pub seed: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            batches_per_epoch: default_batches_per_epoch(),
            batch_size: default_batch_size(),
            num_classes: default_num_classes(),
            batch_delay_ms: 0,
            tolerance: default_tolerance(),
            seed: None,
        }
    }
}

/// Trainer producing plausible metrics from a random walk
pub struct SyntheticTrainer {
    config: SyntheticConfig,
}

impl SyntheticTrainer {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Loss after `step` batches overall, before noise
    fn base_loss(&self, step: u64) -> f64 {
        let total = u64::from(self.config.batches_per_epoch) as f64;
        let chance = f64::from(self.config.num_classes).ln();
        let floor = 0.05;
        floor + (chance - floor) * (-(step as f64) / total).exp()
    }

    fn batch(&self, rng: &mut StdRng, epoch: u32, batch: u32, step: u64) -> MetricEvent {
        let chance = f64::from(self.config.num_classes).ln();
        let loss = self.base_loss(step) * rng.gen_range(0.9..1.1);
        // 0 at chance-level loss, approaching 1 as loss falls
        let skill = (1.0 - loss / chance).clamp(0.0, 1.0);
        let accuracy = 1.0 / f64::from(self.config.num_classes)
            + skill * (1.0 - 1.0 / f64::from(self.config.num_classes));

        let classes = self.config.num_classes as i32;
        let mut predictions = Vec::with_capacity(self.config.batch_size as usize);
        let mut truths = Vec::with_capacity(self.config.batch_size as usize);
        for _ in 0..self.config.batch_size {
            let truth = rng.gen_range(0..classes);
            let prediction = if rng.gen_bool(accuracy) {
                truth
            } else {
                rng.gen_range(0..classes)
            };
            truths.push(truth);
            predictions.push(prediction);
        }

        MetricEvent {
            epoch,
            batch,
            batch_size: self.config.batch_size,
            batch_loss: loss,
            predictions,
            truths,
        }
    }
}

impl Trainer for SyntheticTrainer {
    fn run(&self, epochs: u32, ctx: &RunContext) -> Result<RunSummary, TrainError> {
        let mut rng = self.rng();
        let delay = Duration::from_millis(self.config.batch_delay_ms);
        let num_batches = self.config.batches_per_epoch;
        let mut prev_epoch_loss: Option<f64> = None;
        let mut step: u64 = 0;

        info!(
            run_id = ctx.run_id(),
            epochs,
            batches_per_epoch = num_batches,
            batch_size = self.config.batch_size,
            "Synthetic training started"
        );

        for epoch in 0..epochs {
            ctx.begin_epoch(epoch);
            let mut loss_sum = 0.0;

            for batch in 0..num_batches {
                if ctx.is_cancelled() {
                    return Err(TrainError::Cancelled {
                        epochs_completed: epoch,
                    });
                }

                let event = self.batch(&mut rng, epoch, batch, step);
                loss_sum += event.batch_loss;
                step += 1;

                if ctx.should_report(batch, num_batches) {
                    ctx.report(event)?;
                }

                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }

            let epoch_loss = loss_sum / f64::from(num_batches);
            debug!(run_id = ctx.run_id(), epoch, epoch_loss, "Epoch finished");

            let converged = prev_epoch_loss
                .is_some_and(|prev| (prev - epoch_loss).abs() < self.config.tolerance);
            if converged {
                info!(run_id = ctx.run_id(), epoch, epoch_loss, "Loss converged");
                return Ok(RunSummary {
                    epochs_completed: epoch + 1,
                    converged: true,
                });
            }
            prev_epoch_loss = Some(epoch_loss);
        }

        Ok(RunSummary {
            epochs_completed: epochs,
            converged: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusConfig, Consumed, MetricBus};
    use crate::trainer::RunProgress;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn small_config() -> SyntheticConfig {
        SyntheticConfig {
            batches_per_epoch: 10,
            batch_size: 16,
            num_classes: 10,
            batch_delay_ms: 0,
            tolerance: 0.0,
            seed: Some(42),
        }
    }

    fn run_context(bus: &Arc<MetricBus>, interval: u32, cancel: CancellationToken) -> RunContext {
        RunContext::new(
            1,
            Arc::clone(bus),
            Arc::new(RunProgress::default()),
            interval,
            cancel,
        )
    }

    fn unbounded_bus() -> Arc<MetricBus> {
        Arc::new(MetricBus::new(BusConfig {
            queue_capacity: 1024,
            history_capacity: 1024,
            max_subscribers: 4,
        }))
    }

    async fn drain(sub: &mut crate::bus::Subscription) -> Vec<MetricEvent> {
        let mut events = Vec::new();
        while let Consumed::Event(event) = sub.try_consume(Duration::from_millis(100)).await {
            events.push((*event).clone());
        }
        events
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: SyntheticConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SyntheticConfig::default());
        assert_eq!(config.batch_size, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_single_class() {
        let config = SyntheticConfig {
            num_classes: 1,
            ..SyntheticConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_unknown_fields() {
        let result: Result<SyntheticConfig, _> = serde_json::from_str(r#"{"epochs": 3}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_first_batch_loss_near_chance() {
        let trainer = SyntheticTrainer::new(small_config());
        let mut rng = trainer.rng();
        let event = trainer.batch(&mut rng, 0, 0, 0);

        let chance = 10f64.ln();
        assert!((event.batch_loss - chance).abs() <= chance * 0.1 + 1e-9);
        assert!(event.validate().is_ok());
        assert!(event.truths.iter().all(|&t| (0..10).contains(&t)));
    }

    #[test]
    fn test_base_loss_decreases() {
        let trainer = SyntheticTrainer::new(small_config());
        assert!(trainer.base_loss(0) > trainer.base_loss(10));
        assert!(trainer.base_loss(10) > trainer.base_loss(100));
    }

    #[tokio::test]
    async fn test_reports_at_interval_and_last_batch() {
        let bus = unbounded_bus();
        let mut sub = bus.subscribe().unwrap();
        let trainer = SyntheticTrainer::new(small_config());
        let ctx = run_context(&bus, 4, CancellationToken::new());

        let summary = tokio::task::spawn_blocking(move || trainer.run(2, &ctx))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            summary,
            RunSummary {
                epochs_completed: 2,
                converged: false
            }
        );

        let reported: Vec<(u32, u32)> = drain(&mut sub)
            .await
            .iter()
            .map(|e| (e.epoch, e.batch))
            .collect();
        assert_eq!(
            reported,
            vec![(0, 0), (0, 4), (0, 8), (0, 9), (1, 0), (1, 4), (1, 8), (1, 9)]
        );
    }

    #[tokio::test]
    async fn test_same_seed_same_metrics() {
        let mut runs = Vec::new();
        for _ in 0..2 {
            let bus = unbounded_bus();
            let mut sub = bus.subscribe().unwrap();
            let trainer = SyntheticTrainer::new(small_config());
            let ctx = run_context(&bus, 1, CancellationToken::new());
            tokio::task::spawn_blocking(move || trainer.run(1, &ctx))
                .await
                .unwrap()
                .unwrap();
            runs.push(drain(&mut sub).await);
        }
        assert_eq!(runs[0].len(), 10);
        assert_eq!(runs[0], runs[1]);
    }

    #[tokio::test]
    async fn test_large_tolerance_converges_after_second_epoch() {
        let bus = unbounded_bus();
        let trainer = SyntheticTrainer::new(SyntheticConfig {
            tolerance: 100.0,
            ..small_config()
        });
        let ctx = run_context(&bus, 1, CancellationToken::new());

        let summary = tokio::task::spawn_blocking(move || trainer.run(5, &ctx))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            summary,
            RunSummary {
                epochs_completed: 2,
                converged: true
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let bus = unbounded_bus();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let trainer = SyntheticTrainer::new(small_config());
        let ctx = run_context(&bus, 1, cancel);

        let result = tokio::task::spawn_blocking(move || trainer.run(3, &ctx))
            .await
            .unwrap();
        assert!(matches!(
            result,
            Err(TrainError::Cancelled {
                epochs_completed: 0
            })
        ));
        assert_eq!(bus.history_len(), 0);
    }
}
