//! Objective evaluation over a batch of samples.
//!
//! Samples are independent, so they are evaluated in parallel when the
//! `parallel` feature is enabled.
use crate::error::DepthError;
use crate::loss::{
    ObjectiveGradients, ObjectiveOutput, ObjectiveSample, ViewSynthesisObjective,
};
use log::debug;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::time::Instant;

/// Per-sample outputs and the batch mean.
#[derive(Clone, Debug)]
pub struct BatchOutput {
    pub mean_total: f32,
    pub samples: Vec<ObjectiveOutput>,
}

/// Per-sample outputs and gradients; gradients are those of each sample's
/// own total, not of the batch mean.
#[derive(Clone, Debug)]
pub struct BatchGradients {
    pub mean_total: f32,
    pub samples: Vec<(ObjectiveOutput, ObjectiveGradients)>,
}

fn mean_of(totals: impl Iterator<Item = f32>, n: usize) -> f32 {
    if n == 0 {
        0.0
    } else {
        totals.sum::<f32>() / n as f32
    }
}

pub fn evaluate_batch(
    objective: &ViewSynthesisObjective,
    samples: &[ObjectiveSample],
) -> Result<BatchOutput, DepthError> {
    let start = Instant::now();
    #[cfg(feature = "parallel")]
    let outputs: Result<Vec<_>, _> = samples.par_iter().map(|s| objective.evaluate(s)).collect();
    #[cfg(not(feature = "parallel"))]
    let outputs: Result<Vec<_>, _> = samples.iter().map(|s| objective.evaluate(s)).collect();
    let samples_out = outputs?;
    let mean_total = mean_of(samples_out.iter().map(|o| o.total), samples_out.len());
    debug!(
        "evaluate_batch: {} samples mean={mean_total:.6} in {:.2} ms",
        samples_out.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(BatchOutput {
        mean_total,
        samples: samples_out,
    })
}

pub fn evaluate_batch_with_gradients(
    objective: &ViewSynthesisObjective,
    samples: &[ObjectiveSample],
) -> Result<BatchGradients, DepthError> {
    let start = Instant::now();
    #[cfg(feature = "parallel")]
    let outputs: Result<Vec<_>, _> = samples
        .par_iter()
        .map(|s| objective.evaluate_with_gradients(s))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let outputs: Result<Vec<_>, _> = samples
        .iter()
        .map(|s| objective.evaluate_with_gradients(s))
        .collect();
    let samples_out = outputs?;
    let mean_total = mean_of(samples_out.iter().map(|(o, _)| o.total), samples_out.len());
    debug!(
        "evaluate_batch_with_gradients: {} samples mean={mean_total:.6} in {:.2} ms",
        samples_out.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(BatchGradients {
        mean_total,
        samples: samples_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraModel;
    use crate::depth::{DepthNormalizer, DepthRange};
    use crate::image::ImageF32;
    use crate::loss::{FrameTriplet, LossParams};

    fn sample(phase: f32) -> ObjectiveSample {
        let frame = |shift: f32| {
            ImageF32::from_fn(6, 6, 3, move |x, y, c| {
                0.5 + 0.3 * ((x as f32 + shift + phase) * 0.8 + y as f32 * 0.5 + c as f32).sin()
            })
        };
        ObjectiveSample {
            frames: FrameTriplet::new(frame(-0.4), frame(0.0), frame(0.4)).unwrap(),
            disparities: vec![ImageF32::filled(6, 6, 1, 0.5), ImageF32::filled(3, 3, 1, 0.5)],
            pose_prev: [1.0, 0.0, 0.0, 0.0, 0.1, 0.0],
            pose_next: [-1.0, 0.0, 0.0, 0.0, -0.1, 0.0],
        }
    }

    fn objective() -> ViewSynthesisObjective {
        ViewSynthesisObjective::new(
            CameraModel::default(),
            DepthNormalizer::new(DepthRange::default()).unwrap(),
            LossParams::default(),
        )
    }

    #[test]
    fn batch_matches_individual_evaluation() {
        let obj = objective();
        let samples = vec![sample(0.0), sample(1.0), sample(2.0)];
        let batch = evaluate_batch(&obj, &samples).unwrap();
        assert_eq!(batch.samples.len(), 3);
        for (out, s) in batch.samples.iter().zip(&samples) {
            assert_eq!(out.total, obj.evaluate(s).unwrap().total);
        }
        let mean = batch.samples.iter().map(|o| o.total).sum::<f32>() / 3.0;
        assert!((batch.mean_total - mean).abs() < 1e-7);
    }

    #[test]
    fn invalid_sample_fails_the_batch() {
        let mut bad = sample(0.0);
        bad.disparities.clear();
        let result = evaluate_batch_with_gradients(&objective(), &[sample(0.0), bad]);
        assert!(matches!(result, Err(DepthError::InvalidSample(_))));
    }

    #[test]
    fn empty_batch_has_zero_mean() {
        let batch = evaluate_batch(&objective(), &[]).unwrap();
        assert_eq!(batch.mean_total, 0.0);
    }
}
