//! Reduces per-frame predictions into a single verdict.
//!
//! Confidence is the distance of the mean fake probability from 0.5, scaled
//! to [0, 1], then multiplied by an agreement factor that falls to zero as
//! the frames disagree (stdDev >= 0.5).
//!
//! A mean of exactly 0.5 resolves to `REAL`. That tie-break is a policy
//! choice; the raw confidence is zero there either way.

use crate::models::{AnalysisResult, FramePrediction, FrameScore, ProcessingTimeline, Verdict};

const HIGH_CONFIDENCE: f64 = 0.75;
const MODERATE_CONFIDENCE: f64 = 0.4;

/// Pure: the same predictions and timeline always give the same result.
pub fn aggregate(predictions: &[FramePrediction], timeline: ProcessingTimeline) -> AnalysisResult {
    if predictions.is_empty() {
        return AnalysisResult {
            verdict: Verdict::Inconclusive,
            confidence: 0.0,
            real_probability: 0.5,
            fake_probability: 0.5,
            explanation: "No frames could be analyzed. Please try a different video.".to_string(),
            frame_scores: Vec::new(),
            timeline,
            frames_analyzed: 0,
            model_version: None,
        };
    }

    let count = predictions.len() as f64;
    let mean = predictions.iter().map(|p| p.fake_probability).sum::<f64>() / count;
    let variance = predictions
        .iter()
        .map(|p| (p.fake_probability - mean).powi(2))
        .sum::<f64>()
        / count;
    let std_dev = variance.sqrt();

    let verdict = if mean > 0.5 {
        Verdict::AiGenerated
    } else {
        Verdict::Real
    };

    let raw_confidence = (mean - 0.5).abs() * 2.0;
    let agreement_factor = (1.0 - std_dev * 2.0).max(0.0);
    let confidence = round3(raw_confidence * agreement_factor).clamp(0.0, 1.0);

    let frame_scores = predictions
        .iter()
        .map(|p| FrameScore {
            frame_index: p.frame_index,
            real_probability: round3(p.real_probability),
            fake_probability: round3(p.fake_probability),
        })
        .collect();

    tracing::info!(%verdict, confidence, frames = predictions.len(), "Aggregated result");

    AnalysisResult {
        verdict,
        confidence,
        real_probability: round3(1.0 - mean),
        fake_probability: round3(mean),
        explanation: explanation(verdict, confidence, predictions.len(), mean),
        frame_scores,
        timeline,
        frames_analyzed: predictions.len(),
        model_version: predictions[0].model_version.clone(),
    }
}

fn round3(n: f64) -> f64 {
    (n * 1000.0).round() / 1000.0
}

fn explanation(verdict: Verdict, confidence: f64, frame_count: usize, mean_fake: f64) -> String {
    let pct = (mean_fake * 100.0).round() as i64;
    let real_pct = 100 - pct;

    match verdict {
        Verdict::AiGenerated if confidence > HIGH_CONFIDENCE => format!(
            "This video is very likely AI-generated. {}% of the {} analyzed frames show strong indicators of synthetic generation, including inconsistencies in facial features, lighting artifacts, and temporal discontinuities.",
            pct, frame_count
        ),
        Verdict::AiGenerated if confidence > MODERATE_CONFIDENCE => format!(
            "This video shows moderate signs of AI generation. About {}% of analyzed frames contain artifacts commonly associated with AI-generated content. Some frames appear authentic while others show synthetic patterns.",
            pct
        ),
        Verdict::AiGenerated => format!(
            "This video has weak indicators of AI generation. While {}% of frames lean toward synthetic, the results are not highly conclusive. The video may contain a mix of real and generated content, or the quality may be limiting analysis accuracy.",
            pct
        ),
        _ if confidence > HIGH_CONFIDENCE => format!(
            "This video appears to be authentic. {}% of the {} analyzed frames show natural image characteristics consistent with real camera footage. No significant AI generation artifacts were detected.",
            real_pct, frame_count
        ),
        _ if confidence > MODERATE_CONFIDENCE => format!(
            "This video is likely authentic, though some frames show minor anomalies. {}% of analyzed frames appear to be real footage. The detected anomalies may be due to video compression or editing rather than AI generation.",
            real_pct
        ),
        _ => format!(
            "Results are inconclusive. While the video leans toward being authentic ({}% of frames), the confidence is low. Manual review is recommended for a definitive assessment.",
            real_pct
        ),
    }
}
