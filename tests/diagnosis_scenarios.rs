//! End-to-end diagnosis scenarios over synthetic footage.

use std::collections::HashMap;
use std::sync::Arc;

use vqdiag::detectors::registry::DetectorRegistry;
use vqdiag::detectors::{DetectionLevel, Severity};
use vqdiag::diagnosis_service::{
    DiagnoseParams, DiagnosisConfig, DiagnosisService, NoVideoDecoder, VideoParams,
};
use vqdiag::frame::{Frame, CHANNELS_BGR, CHANNELS_GRAY};
use vqdiag::media::SyntheticVideoSource;
use vqdiag::pipeline::ImagePipeline;
use vqdiag::profiles::ProfileStore;
use vqdiag::video_pipeline::VideoPipeline;

fn service() -> DiagnosisService {
    let registry = Arc::new(DetectorRegistry::with_builtin());
    let image_pipeline = Arc::new(ImagePipeline::new(registry.clone()));
    DiagnosisService::new(
        registry,
        Arc::new(ProfileStore::new()),
        image_pipeline.clone(),
        Arc::new(VideoPipeline::new(image_pipeline)),
        Arc::new(NoVideoDecoder),
        DiagnosisConfig::default(),
    )
}

/// Deterministic pseudo-noise in [-amplitude, amplitude].
fn noise_at(i: u32, amplitude: i32) -> i32 {
    let h = (i.wrapping_mul(2654435761)) >> 7;
    (h % (2 * amplitude as u32 + 1)) as i32 - amplitude
}

/// 640x480 grayscale gradient, heavily smoothed, with additive noise.
fn blurred_noisy_gradient() -> Frame {
    const W: usize = 640;
    const H: usize = 480;
    // Horizontal ramp is already band-limited; the "blur" is its lack of
    // any fine detail.
    let mut data = Vec::with_capacity(W * H);
    for y in 0..H {
        for x in 0..W {
            let ramp = (x as f32 / W as f32 * 255.0) as i32;
            let value = ramp + noise_at((y * W + x) as u32, 15);
            data.push(value.clamp(0, 255) as u8);
        }
    }
    Frame::new(W as u32, H as u32, CHANNELS_GRAY, data).unwrap()
}

#[tokio::test]
async fn blur_wins_over_noise_via_suppression() {
    let svc = service();
    let params = DiagnoseParams {
        profile: "strict".into(),
        level: DetectionLevel::Standard,
        detectors: None,
        custom_thresholds: Some(HashMap::from([
            ("blur_threshold".to_string(), 120.0f32),
            ("noise_threshold".to_string(), 5.0f32),
            ("occlusion_threshold".to_string(), 0.3f32),
        ])),
    };
    let verdict = svc
        .diagnose_frame(&blurred_noisy_gradient(), &params)
        .await
        .unwrap();

    assert!(verdict.is_abnormal);
    assert_eq!(verdict.primary_issue.as_deref(), Some("blur"));
    // The noise finding is silenced, not merely outranked
    assert!(verdict.suppressed.contains(&"noise".to_string()));
    assert!(verdict.findings.iter().all(|f| f.detector != "noise"));
    let blur = verdict
        .findings
        .iter()
        .find(|f| f.detector == "blur")
        .expect("blur finding");
    assert!(blur.is_abnormal);
    assert!(blur.score < blur.threshold);
}

#[tokio::test]
async fn solid_bright_frame_is_over_bright() {
    let svc = service();
    let frame = Frame::new(320, 240, CHANNELS_BGR, vec![250u8; 320 * 240 * 3]).unwrap();
    let verdict = svc
        .diagnose_frame(&frame, &DiagnoseParams::default())
        .await
        .unwrap();

    assert!(verdict.is_abnormal);
    assert_eq!(verdict.primary_issue.as_deref(), Some("over_bright"));
    let brightness = verdict
        .findings
        .iter()
        .find(|f| f.detector == "brightness")
        .expect("brightness finding");
    assert_eq!(brightness.severity, Severity::Warning);
    assert!(brightness.is_abnormal);
}

#[tokio::test]
async fn black_frame_signal_loss_dominates() {
    let svc = service();
    let frame = Frame::new(1920, 1080, CHANNELS_BGR, vec![0u8; 1920 * 1080 * 3]).unwrap();
    let verdict = svc
        .diagnose_frame(&frame, &DiagnoseParams::default())
        .await
        .unwrap();

    assert!(verdict.is_abnormal);
    assert_eq!(verdict.primary_issue.as_deref(), Some("black_screen"));
    assert_eq!(verdict.severity, Severity::Error);
    for silenced in ["blur", "brightness"] {
        assert!(
            verdict.suppressed.contains(&silenced.to_string()),
            "{silenced} not suppressed: {:?}",
            verdict.suppressed
        );
        assert!(verdict.findings.iter().all(|f| f.detector != silenced));
    }
}

/// Cell-textured frame with a luminance offset; identical offsets make
/// identical frames.
fn clip_frame(offset: u8, t: f64, idx: u64) -> Frame {
    let data: Vec<u8> = (0..96u32)
        .flat_map(|y| {
            (0..128u32).map(move |x| {
                let cell = (x / 4) + 32 * (y / 4);
                (60 + ((cell.wrapping_mul(2654435761)) >> 8) % 140) as u8 + offset
            })
        })
        .collect();
    Frame::new(128, 96, CHANNELS_GRAY, data)
        .unwrap()
        .with_timestamp(t)
        .with_index(idx)
}

#[tokio::test]
async fn freeze_segment_spans_the_identical_run() {
    let svc = service();
    // 11 frames at 1 fps; frames 2..=5 are byte-identical
    let offsets = [0u8, 4, 0, 0, 0, 0, 8, 4, 8, 4, 8];
    let frames: Vec<Frame> = offsets
        .iter()
        .enumerate()
        .map(|(i, &offset)| clip_frame(offset, i as f64, i as u64))
        .collect();
    let source = SyntheticVideoSource::new(frames, 1.0);

    let verdict = svc
        .diagnose_video_source(Box::new(source), &VideoParams::default())
        .await
        .unwrap();

    assert!(verdict.is_abnormal);
    let freeze = verdict
        .issues
        .iter()
        .find(|i| i.issue_type == "freeze")
        .expect("freeze issue");
    assert_eq!(freeze.segments.len(), 1);
    assert_eq!(freeze.segments[0].start_time, 2.0);
    assert_eq!(freeze.segments[0].end_time, 5.0);
    assert!((freeze.total_duration - 3.0).abs() < 1e-9);

    // overall score = 1 - abnormal/duration over an 11 s clip
    let expected = 1.0 - 3.0 / verdict.duration;
    assert!(
        (verdict.overall_score - expected).abs() < 1e-9,
        "score {} vs {expected}",
        verdict.overall_score
    );

    // Segment monotonicity across all issues
    for issue in &verdict.issues {
        for pair in issue.segments.windows(2) {
            assert!(pair[0].end_time <= pair[1].start_time);
        }
    }
}

#[tokio::test]
async fn repeated_diagnosis_is_deterministic() {
    let svc = service();
    let frame = blurred_noisy_gradient();
    let params = DiagnoseParams::default();
    let a = svc.diagnose_frame(&frame, &params).await.unwrap();
    let b = svc.diagnose_frame(&frame, &params).await.unwrap();

    let strip = |v: &vqdiag::pipeline::ImageVerdict| {
        v.findings
            .iter()
            .map(|f| {
                (
                    f.detector.clone(),
                    f.issue_type.clone(),
                    f.is_abnormal,
                    f.score.to_bits(),
                    f.confidence.to_bits(),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(strip(&a), strip(&b));
    assert_eq!(a.primary_issue, b.primary_issue);
    assert_eq!(a.suppressed, b.suppressed);
}
