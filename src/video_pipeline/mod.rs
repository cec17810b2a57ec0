//! Video diagnosis pipeline
//!
//! ## Responsibilities
//!
//! - Drive the sampler over a `VideoSource` on a blocking worker
//! - Hand sampled frames through the bounded buffer to the image pipeline
//! - Run the video detectors over the sampled window
//! - Merge per-frame image findings into time segments
//! - Roll everything up into a `VideoVerdict`
//!
//! A decoder error mid-stream degrades the verdict (warning + note)
//! instead of failing it; frames sampled before a soft deadline fires are
//! still diagnosed.

pub mod buffer;
pub mod sampler;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::detectors::video::{builtin_video_detectors, VideoFinding, VideoSegment};
use crate::detectors::Severity;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::media::{VideoMetadata, VideoSource};
use crate::pipeline::{ImagePipeline, ImageVerdict, PipelineOptions};

use buffer::{frame_channel, DEFAULT_MAX_FRAME_BYTES};
use sampler::{FrameSampler, SamplerConfig};

/// Options for one video diagnosis run.
#[derive(Debug, Clone)]
pub struct VideoPipelineOptions {
    pub pipeline: PipelineOptions,
    pub sampler: SamplerConfig,
    /// Image-issue hits shorter than this are dropped as noise (seconds).
    pub min_event_duration: f64,
    /// Keep the per-sampled-frame verdicts in the result.
    pub include_frame_verdicts: bool,
    pub max_frame_bytes: usize,
    /// Soft deadline for the sampling phase.
    pub deadline: Option<Duration>,
}

impl VideoPipelineOptions {
    pub fn new(pipeline: PipelineOptions, sampler: SamplerConfig) -> Self {
        Self {
            pipeline,
            sampler,
            min_event_duration: 1.0,
            include_frame_verdicts: false,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            deadline: None,
        }
    }
}

/// One sampled frame's image verdict with its position on the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameVerdict {
    pub timestamp: f64,
    pub frame_index: u64,
    pub verdict: ImageVerdict,
}

/// One issue type across the whole video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoIssue {
    pub issue_type: String,
    pub severity: Severity,
    /// Non-overlapping, ordered by start time.
    pub segments: Vec<VideoSegment>,
    pub total_duration: f64,
    pub explanation: String,
}

/// Aggregated verdict for one video input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoVerdict {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub video_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub video_path: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration: f64,
    pub frame_count: u64,
    pub sampled_frames: usize,
    pub is_abnormal: bool,
    /// 1 - abnormal_duration / duration, clamped to [0, 1].
    pub overall_score: f64,
    pub primary_issue: Option<String>,
    pub severity: Severity,
    pub issues: Vec<VideoIssue>,
    pub video_findings: Vec<VideoFinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_verdicts: Option<Vec<FrameVerdict>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_note: Option<String>,
    pub process_time_ms: f32,
}

/// VideoPipeline instance
pub struct VideoPipeline {
    image: Arc<ImagePipeline>,
}

impl VideoPipeline {
    pub fn new(image: Arc<ImagePipeline>) -> Self {
        Self { image }
    }

    /// Diagnose a finite video source.
    pub async fn diagnose(
        &self,
        source: Box<dyn VideoSource>,
        options: &VideoPipelineOptions,
    ) -> Result<VideoVerdict> {
        let start = Instant::now();
        let metadata = source.metadata();
        let frame_sampler = FrameSampler::new(options.sampler.clone())?;
        let workers = options.pipeline.max_workers;
        let (producer, mut consumer) = frame_channel(workers, options.max_frame_bytes);
        let deadline = options.deadline.map(|d| Instant::now() + d);

        // Decoder + sampler on a blocking worker; back-pressure through the
        // bounded buffer keeps it paced with detection.
        let decode_task = tokio::task::spawn_blocking(move || {
            let mut source = source;
            frame_sampler.sample_into(source.as_mut(), deadline, |frame| {
                producer.blocking_push(frame)
            })
        });

        let mut sampled: Vec<Frame> = Vec::new();
        let mut frame_verdicts: Vec<FrameVerdict> = Vec::new();
        let mut diagnose_error: Option<Error> = None;
        while let Some(frame) = consumer.next().await {
            match self.image.diagnose(&frame, &options.pipeline).await {
                Ok(verdict) => {
                    frame_verdicts.push(FrameVerdict {
                        timestamp: frame.timestamp.unwrap_or(0.0),
                        frame_index: frame.index.unwrap_or(0),
                        verdict,
                    });
                    sampled.push(frame);
                }
                Err(e) => {
                    diagnose_error = Some(e);
                    break;
                }
            }
        }
        drop(consumer);

        let run = decode_task
            .await
            .map_err(|e| Error::Internal(format!("sampler task panicked: {e}")))?;
        if let Some(e) = diagnose_error {
            return Err(e);
        }
        let run = match run {
            Ok(run) => run,
            // The sink fails once the consumer is gone; only real decode
            // errors reach here because diagnose_error was None.
            Err(e) => return Err(e),
        };

        if sampled.is_empty() {
            return Err(Error::Input("source decoded zero frames".into()));
        }

        let fps = if metadata.fps > 0.0 { metadata.fps } else { 25.0 };
        let video_findings = self.run_video_detectors(&sampled, fps).await;

        let mut verdict = Self::aggregate(
            &metadata,
            &sampled,
            &frame_verdicts,
            video_findings,
            options,
        );
        if let Some(e) = &run.decode_error {
            verdict.error_note = Some(format!("decoder error mid-stream: {e}"));
            verdict.severity = verdict.severity.max(Severity::Warning);
            verdict.is_abnormal = true;
        } else if run.deadline_hit {
            verdict.error_note = Some("sampling stopped at the soft deadline".into());
        }
        if options.include_frame_verdicts {
            verdict.frame_verdicts = Some(frame_verdicts);
        }
        verdict.process_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        Ok(verdict)
    }

    async fn run_video_detectors(&self, sampled: &[Frame], fps: f64) -> Vec<VideoFinding> {
        let frames = sampled.to_vec();
        let outcome = tokio::task::spawn_blocking(move || {
            builtin_video_detectors()
                .iter()
                .map(|detector| (detector.name(), detector.detect(&frames, fps)))
                .map(|(name, result)| match result {
                    Ok(finding) => Some(finding),
                    Err(e) => {
                        tracing::warn!(detector = name, error = %e, "Video detector failed");
                        None
                    }
                })
                .collect::<Vec<Option<VideoFinding>>>()
        })
        .await;
        match outcome {
            Ok(findings) => findings.into_iter().flatten().collect(),
            Err(e) => {
                tracing::error!(error = %e, "Video detector task panicked");
                Vec::new()
            }
        }
    }

    /// Merge abnormal image findings on consecutive sampled frames into
    /// per-issue segments.
    fn merge_image_issues(
        frame_verdicts: &[FrameVerdict],
        min_event_duration: f64,
    ) -> BTreeMap<String, (Severity, Vec<VideoSegment>)> {
        // issue type -> sample positions where it is abnormal
        let mut hits: BTreeMap<String, Vec<(usize, Severity)>> = BTreeMap::new();
        for (pos, fv) in frame_verdicts.iter().enumerate() {
            for finding in fv.verdict.abnormal_findings() {
                hits.entry(finding.issue_type.clone())
                    .or_default()
                    .push((pos, finding.severity));
            }
        }

        let mut merged = BTreeMap::new();
        for (issue, positions) in hits {
            let mut segments = Vec::new();
            let mut severity = Severity::Normal;
            let mut run: Option<(usize, usize)> = None;
            for &(pos, sev) in &positions {
                severity = severity.max(sev);
                run = match run {
                    None => Some((pos, pos)),
                    Some((start, end)) if pos == end + 1 => Some((start, pos)),
                    Some((start, end)) => {
                        Self::push_image_segment(
                            frame_verdicts,
                            start,
                            end,
                            min_event_duration,
                            &mut segments,
                        );
                        Some((pos, pos))
                    }
                };
            }
            if let Some((start, end)) = run {
                Self::push_image_segment(
                    frame_verdicts,
                    start,
                    end,
                    min_event_duration,
                    &mut segments,
                );
            }
            if !segments.is_empty() {
                merged.insert(issue, (severity, segments));
            }
        }
        merged
    }

    fn push_image_segment(
        frame_verdicts: &[FrameVerdict],
        start: usize,
        end: usize,
        min_event_duration: f64,
        segments: &mut Vec<VideoSegment>,
    ) {
        let segment = VideoSegment::new(
            frame_verdicts[start].frame_index,
            frame_verdicts[end].frame_index,
            frame_verdicts[start].timestamp,
            frame_verdicts[end].timestamp,
        );
        if segment.duration >= min_event_duration {
            segments.push(segment);
        }
    }

    /// Union length of all issue segments on the timeline.
    fn abnormal_duration(issues: &[VideoIssue]) -> f64 {
        let mut intervals: Vec<(f64, f64)> = issues
            .iter()
            .flat_map(|i| i.segments.iter().map(|s| (s.start_time, s.end_time)))
            .filter(|(a, b)| b > a)
            .collect();
        intervals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mut total = 0.0;
        let mut current: Option<(f64, f64)> = None;
        for (start, end) in intervals {
            current = match current {
                None => Some((start, end)),
                Some((cs, ce)) if start <= ce => Some((cs, ce.max(end))),
                Some((cs, ce)) => {
                    total += ce - cs;
                    Some((start, end))
                }
            };
        }
        if let Some((cs, ce)) = current {
            total += ce - cs;
        }
        total
    }

    fn aggregate(
        metadata: &VideoMetadata,
        sampled: &[Frame],
        frame_verdicts: &[FrameVerdict],
        video_findings: Vec<VideoFinding>,
        options: &VideoPipelineOptions,
    ) -> VideoVerdict {
        let mut issues: Vec<VideoIssue> = Vec::new();

        for (issue_type, (severity, segments)) in
            Self::merge_image_issues(frame_verdicts, options.min_event_duration)
        {
            let total_duration: f64 = segments.iter().map(|s| s.duration).sum();
            issues.push(VideoIssue {
                explanation: format!(
                    "{issue_type} active in {} span(s), {total_duration:.2} s total",
                    segments.len()
                ),
                issue_type,
                severity,
                segments,
                total_duration,
            });
        }

        for finding in &video_findings {
            if !finding.is_abnormal {
                continue;
            }
            let total_duration: f64 = finding.segments.iter().map(|s| s.duration).sum();
            issues.push(VideoIssue {
                issue_type: finding.issue_type.clone(),
                severity: finding.severity,
                segments: finding.segments.clone(),
                total_duration,
                explanation: finding.explanation.clone(),
            });
        }

        issues.sort_by(|a, b| a.issue_type.cmp(&b.issue_type));

        let duration = if metadata.duration > 0.0 {
            metadata.duration
        } else {
            let first = sampled.first().and_then(|f| f.timestamp).unwrap_or(0.0);
            let last = sampled.last().and_then(|f| f.timestamp).unwrap_or(0.0);
            (last - first).max(0.0)
        };
        let abnormal_duration = Self::abnormal_duration(&issues);
        let overall_score = if duration > 0.0 {
            (1.0 - abnormal_duration / duration).clamp(0.0, 1.0)
        } else if issues.is_empty() {
            1.0
        } else {
            0.0
        };

        let primary = issues
            .iter()
            .max_by(|a, b| {
                a.severity.cmp(&b.severity).then(
                    a.total_duration
                        .partial_cmp(&b.total_duration)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
            })
            .map(|i| i.issue_type.clone());
        let severity = issues
            .iter()
            .map(|i| i.severity)
            .max()
            .unwrap_or(Severity::Normal);

        VideoVerdict {
            video_id: String::new(),
            video_path: String::new(),
            width: metadata.width,
            height: metadata.height,
            fps: metadata.fps,
            duration,
            frame_count: metadata.frame_count,
            sampled_frames: sampled.len(),
            is_abnormal: !issues.is_empty(),
            overall_score,
            primary_issue: primary,
            severity,
            issues,
            video_findings,
            frame_verdicts: None,
            error_note: None,
            process_time_ms: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::registry::DetectorRegistry;
    use crate::detectors::DetectionLevel;
    use crate::frame::{CHANNELS_GRAY};
    use crate::media::SyntheticVideoSource;
    use crate::profiles::Thresholds;

    /// Temporally-coherent healthy footage: one fixed cell texture with a
    /// small per-frame luminance wobble so adjacent frames are neither
    /// frozen nor displaced, and no detector reads the texture as noise.
    fn coherent_frame(i: u64, t: f64, idx: u64) -> Frame {
        let wobble = (i % 3) as u8 * 3;
        let data: Vec<u8> = (0..96u32)
            .flat_map(|y| {
                (0..96u32).map(move |x| {
                    let cell = (x / 4) + 24 * (y / 4);
                    (60 + ((cell.wrapping_mul(2654435761)) >> 8) % 140) as u8 + wobble
                })
            })
            .collect();
        Frame::new(96, 96, CHANNELS_GRAY, data)
            .unwrap()
            .with_timestamp(t)
            .with_index(idx)
    }

    fn video_pipeline() -> VideoPipeline {
        VideoPipeline::new(Arc::new(ImagePipeline::new(Arc::new(
            DetectorRegistry::with_builtin(),
        ))))
    }

    fn options() -> VideoPipelineOptions {
        VideoPipelineOptions::new(
            PipelineOptions::new(DetectionLevel::Standard, "normal", Thresholds::default()),
            SamplerConfig::default(),
        )
    }

    #[tokio::test]
    async fn healthy_clip_scores_full_marks() {
        let frames: Vec<Frame> = (0..10u64)
            .map(|i| coherent_frame(i, i as f64, i))
            .collect();
        let source = SyntheticVideoSource::new(frames, 1.0);
        let verdict = video_pipeline()
            .diagnose(Box::new(source), &options())
            .await
            .unwrap();
        assert!(!verdict.is_abnormal, "issues: {:?}", verdict.issues);
        assert_eq!(verdict.overall_score, 1.0);
        assert_eq!(verdict.sampled_frames, 10);
    }

    #[tokio::test]
    async fn dark_run_becomes_a_timed_issue() {
        // Frames 3..=7 are black: black_screen segment 3 s..7 s
        let frames: Vec<Frame> = (0..10u64)
            .map(|i| {
                if (3..=7).contains(&i) {
                    Frame::new(96, 96, CHANNELS_GRAY, vec![0u8; 96 * 96])
                        .unwrap()
                        .with_timestamp(i as f64)
                        .with_index(i)
                } else {
                    coherent_frame(i, i as f64, i)
                }
            })
            .collect();
        let source = SyntheticVideoSource::new(frames, 1.0);
        let verdict = video_pipeline()
            .diagnose(Box::new(source), &options())
            .await
            .unwrap();
        assert!(verdict.is_abnormal);
        let black = verdict
            .issues
            .iter()
            .find(|i| i.issue_type == "black_screen")
            .expect("black_screen issue");
        assert_eq!(black.segments.len(), 1);
        assert_eq!(black.segments[0].start_time, 3.0);
        assert_eq!(black.segments[0].end_time, 7.0);
        // 4 s abnormal out of 10 s
        assert!((verdict.overall_score - 0.6).abs() < 1e-6);
        // Segment monotonicity across every issue
        for issue in &verdict.issues {
            for pair in issue.segments.windows(2) {
                assert!(pair[0].end_time <= pair[1].start_time);
            }
        }
    }

    #[tokio::test]
    async fn zero_frame_source_is_an_input_error() {
        let source = SyntheticVideoSource::new(Vec::new(), 25.0);
        let err = video_pipeline()
            .diagnose(Box::new(source), &options())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[tokio::test]
    async fn mid_stream_decode_error_degrades_not_fails() {
        let frames: Vec<Frame> = (0..5u64)
            .map(|i| coherent_frame(i, i as f64, i))
            .collect();
        let source = SyntheticVideoSource::new(frames, 1.0)
            .with_trailing_error(Error::ConnectionLost("decoder hiccup".into()));
        let verdict = video_pipeline()
            .diagnose(Box::new(source), &options())
            .await
            .unwrap();
        assert!(verdict.error_note.is_some());
        assert!(verdict.severity >= Severity::Warning);
    }
}
