//! Canned metric events

use trainwatch_common::MetricEvent;

/// Batch size of [`sample_metric`] events
pub const SAMPLE_BATCH_SIZE: u32 = 16;

/// Loss of [`sample_metric`] events, roughly chance level for 10 classes
pub const SAMPLE_BATCH_LOSS: f64 = 2.31;

/// A well-formed event for `epoch`/`batch`: 16 samples, loss 2.31, half of
/// the predictions correct.
pub fn sample_metric(epoch: u32, batch: u32) -> MetricEvent {
    let truths: Vec<i32> = (0..SAMPLE_BATCH_SIZE as i32).map(|i| i % 10).collect();
    let predictions = truths
        .iter()
        .enumerate()
        .map(|(i, &t)| if i % 2 == 0 { t } else { (t + 1) % 10 })
        .collect();

    MetricEvent {
        epoch,
        batch,
        batch_size: SAMPLE_BATCH_SIZE,
        batch_loss: SAMPLE_BATCH_LOSS,
        predictions,
        truths,
    }
}
