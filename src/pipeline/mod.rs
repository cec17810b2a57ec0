//! Image diagnosis pipeline
//!
//! ## Responsibilities
//!
//! - Resolve the active detector set (level gating ∩ allowlist)
//! - Dispatch detectors in parallel on blocking workers with soft deadlines
//! - Absorb detector failures/timeouts into synthetic findings
//! - Evaluate the suppression graph to a fix point
//! - Select the primary issue and roll up severity
//!
//! The pipeline always returns a verdict; a frame on which every detector
//! failed yields an all-synthetic verdict with no primary issue.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::detectors::registry::DetectorRegistry;
use crate::detectors::{DetectionLevel, DetectorDescriptor, Finding, Severity};
use crate::error::Result;
use crate::frame::Frame;
use crate::profiles::Thresholds;

/// Working resolution for the fast level (longest side, pixels).
const FAST_LEVEL_MAX_SIDE: u32 = 480;
/// Soft per-detector deadline, sized for deep level on large frames.
const DEFAULT_DETECTOR_DEADLINE: Duration = Duration::from_secs(30);

/// Pipeline execution options resolved by the caller.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub level: DetectionLevel,
    pub profile: String,
    pub thresholds: Thresholds,
    /// Restrict to these detector names (still level-gated).
    pub detectors: Option<Vec<String>>,
    pub parallel: bool,
    pub max_workers: usize,
    pub detector_deadline: Duration,
    /// Overall budget; detectors past it report synthetic timeouts.
    pub deadline: Option<Duration>,
}

impl PipelineOptions {
    pub fn new(level: DetectionLevel, profile: impl Into<String>, thresholds: Thresholds) -> Self {
        Self {
            level,
            profile: profile.into(),
            thresholds,
            detectors: None,
            parallel: true,
            max_workers: 4,
            detector_deadline: DEFAULT_DETECTOR_DEADLINE,
            deadline: None,
        }
    }

    pub fn with_detectors(mut self, detectors: Option<Vec<String>>) -> Self {
        self.detectors = detectors;
        self
    }
}

/// Rollup for one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageVerdict {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_path: String,
    pub width: u32,
    pub height: u32,
    pub is_abnormal: bool,
    pub primary_issue: Option<String>,
    pub severity: Severity,
    /// Surviving findings, priority order.
    pub findings: Vec<Finding>,
    /// Detector names silenced by suppression.
    pub suppressed: Vec<String>,
    /// Issue types of the surviving abnormal findings, priority order.
    pub independent_issues: Vec<String>,
    /// Native score per detector, pre-suppression.
    pub scores: BTreeMap<String, f32>,
    pub level: DetectionLevel,
    pub profile: String,
    pub process_time_ms: f32,
    pub timestamp: DateTime<Utc>,
}

impl ImageVerdict {
    pub fn abnormal_findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_abnormal)
    }

    /// Deduplicated suggestions across abnormal findings, stable order.
    pub fn all_suggestions(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.abnormal_findings()
            .flat_map(|f| f.suggestions.iter())
            .filter(|s| seen.insert(s.as_str().to_string()))
            .cloned()
            .collect()
    }

    /// Deduplicated possible causes across abnormal findings.
    pub fn all_causes(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.abnormal_findings()
            .flat_map(|f| f.possible_causes.iter())
            .filter(|c| seen.insert(c.as_str().to_string()))
            .cloned()
            .collect()
    }
}

/// ImagePipeline instance
pub struct ImagePipeline {
    registry: Arc<DetectorRegistry>,
}

impl ImagePipeline {
    pub fn new(registry: Arc<DetectorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<DetectorRegistry> {
        &self.registry
    }

    /// Diagnose one frame. Fails only on configuration errors (unknown
    /// detector name); detector faults never surface.
    pub async fn diagnose(&self, frame: &Frame, options: &PipelineOptions) -> Result<ImageVerdict> {
        let start = Instant::now();
        let descriptors = self.resolve_detectors(options)?;

        // Fast level trades resolution for latency once, for all detectors.
        let working = if options.level == DetectionLevel::Fast {
            frame.downsample_to(FAST_LEVEL_MAX_SIDE)
        } else {
            frame.clone()
        };

        let outcomes = if options.parallel && descriptors.len() > 1 {
            self.dispatch_parallel(&working, &descriptors, options, start).await
        } else {
            self.dispatch_sequential(&working, &descriptors, options, start).await
        };

        let mut verdict = Self::aggregate(outcomes, &self.registry, options);
        verdict.width = frame.width();
        verdict.height = frame.height();
        verdict.process_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        Ok(verdict)
    }

    fn resolve_detectors(
        &self,
        options: &PipelineOptions,
    ) -> Result<Vec<&'static DetectorDescriptor>> {
        let level_set = self.registry.by_level(options.level);
        match &options.detectors {
            None => Ok(level_set),
            Some(names) => {
                for name in names {
                    if !self.registry.contains(name) {
                        return Err(crate::error::Error::UnknownDetector(name.clone()));
                    }
                }
                Ok(level_set
                    .into_iter()
                    .filter(|d| names.iter().any(|n| n == d.name))
                    .collect())
            }
        }
    }

    fn remaining_budget(options: &PipelineOptions, start: Instant) -> Duration {
        let per_detector = options.detector_deadline;
        match options.deadline {
            None => per_detector,
            Some(total) => per_detector.min(total.saturating_sub(start.elapsed())),
        }
    }

    async fn dispatch_parallel(
        &self,
        frame: &Frame,
        descriptors: &[&'static DetectorDescriptor],
        options: &PipelineOptions,
        start: Instant,
    ) -> Vec<(&'static DetectorDescriptor, DetectorOutcome)> {
        let semaphore = Arc::new(Semaphore::new(options.max_workers.max(1)));
        let mut handles = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            let detector = match self.registry.instantiate(descriptor.name, &options.thresholds) {
                Ok(d) => d,
                Err(e) => {
                    handles.push((*descriptor, DispatchHandle::Failed(e.to_string())));
                    continue;
                }
            };
            let frame = frame.clone();
            let level = options.level;
            let semaphore = semaphore.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                tokio::task::spawn_blocking(move || detector.detect(&frame, level))
                    .await
                    .map_err(|e| format!("detector task panicked: {e}"))
            });
            handles.push((*descriptor, DispatchHandle::Running(handle)));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (descriptor, handle) in handles {
            let outcome = match handle {
                DispatchHandle::Failed(message) => DetectorOutcome::Failed(message),
                DispatchHandle::Running(handle) => {
                    let budget = Self::remaining_budget(options, start);
                    match tokio::time::timeout(budget, handle).await {
                        Err(_) => DetectorOutcome::TimedOut(budget),
                        Ok(Err(join_err)) => DetectorOutcome::Failed(join_err.to_string()),
                        Ok(Ok(Err(message))) => DetectorOutcome::Failed(message),
                        Ok(Ok(Ok(Err(e)))) => DetectorOutcome::Failed(e.to_string()),
                        Ok(Ok(Ok(Ok(finding)))) => DetectorOutcome::Done(finding),
                    }
                }
            };
            outcomes.push((descriptor, outcome));
        }
        outcomes
    }

    async fn dispatch_sequential(
        &self,
        frame: &Frame,
        descriptors: &[&'static DetectorDescriptor],
        options: &PipelineOptions,
        start: Instant,
    ) -> Vec<(&'static DetectorDescriptor, DetectorOutcome)> {
        let mut outcomes = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let detector = match self.registry.instantiate(descriptor.name, &options.thresholds) {
                Ok(d) => d,
                Err(e) => {
                    outcomes.push((*descriptor, DetectorOutcome::Failed(e.to_string())));
                    continue;
                }
            };
            let frame = frame.clone();
            let level = options.level;
            let budget = Self::remaining_budget(options, start);
            let handle = tokio::task::spawn_blocking(move || detector.detect(&frame, level));
            let outcome = match tokio::time::timeout(budget, handle).await {
                Err(_) => DetectorOutcome::TimedOut(budget),
                Ok(Err(join_err)) => DetectorOutcome::Failed(join_err.to_string()),
                Ok(Ok(Err(e))) => DetectorOutcome::Failed(e.to_string()),
                Ok(Ok(Ok(finding))) => DetectorOutcome::Done(finding),
            };
            outcomes.push((*descriptor, outcome));
        }
        outcomes
    }

    fn synthetic_finding(
        descriptor: &DetectorDescriptor,
        level: DetectionLevel,
        explanation: String,
    ) -> Finding {
        let mut finding = Finding::new(descriptor, level);
        finding.severity = Severity::Info;
        finding.explanation = explanation;
        finding
    }

    fn aggregate(
        outcomes: Vec<(&'static DetectorDescriptor, DetectorOutcome)>,
        registry: &DetectorRegistry,
        options: &PipelineOptions,
    ) -> ImageVerdict {
        let mut findings: Vec<(u32, Finding)> = Vec::with_capacity(outcomes.len());
        for (descriptor, outcome) in outcomes {
            let finding = match outcome {
                DetectorOutcome::Done(finding) => finding,
                DetectorOutcome::TimedOut(budget) => {
                    tracing::warn!(
                        detector = descriptor.name,
                        budget_ms = budget.as_millis() as u64,
                        "Detector timed out"
                    );
                    Self::synthetic_finding(
                        descriptor,
                        options.level,
                        format!("Detector timed out after {} ms", budget.as_millis()),
                    )
                }
                DetectorOutcome::Failed(message) => {
                    tracing::warn!(detector = descriptor.name, error = %message, "Detector failed");
                    Self::synthetic_finding(
                        descriptor,
                        options.level,
                        format!("Detector failed: {message}"),
                    )
                }
            };
            findings.push((descriptor.priority, finding));
        }

        // Deterministic order regardless of completion order
        findings.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.detector.cmp(&b.1.detector)));
        let findings: Vec<Finding> = findings.into_iter().map(|(_, f)| f).collect();

        let scores: BTreeMap<String, f32> =
            findings.iter().map(|f| (f.detector.clone(), f.score)).collect();

        // Suppression fix point: a suppressor only counts while it is not
        // itself suppressed; iterate until the set stabilizes.
        let graph = registry.suppression_graph();
        let abnormal: Vec<&Finding> = findings.iter().filter(|f| f.is_abnormal).collect();
        let mut suppressed: HashSet<String> = HashSet::new();
        for _ in 0..=findings.len() {
            let next: HashSet<String> = abnormal
                .iter()
                .filter(|f| !suppressed.contains(&f.detector))
                .flat_map(|f| {
                    graph
                        .get(f.detector.as_str())
                        .into_iter()
                        .flatten()
                        .map(|s| s.to_string())
                })
                .collect();
            if next == suppressed {
                break;
            }
            suppressed = next;
        }

        let surviving: Vec<Finding> = findings
            .iter()
            .filter(|f| !suppressed.contains(&f.detector))
            .cloned()
            .collect();

        // Primary issue: priority asc, confidence desc, score/threshold
        // ratio desc, name asc.
        let mut candidates: Vec<&Finding> = surviving.iter().filter(|f| f.is_abnormal).collect();
        candidates.sort_by(|a, b| {
            let pa = registry.descriptor(&a.detector).map(|d| d.priority).unwrap_or(u32::MAX);
            let pb = registry.descriptor(&b.detector).map(|d| d.priority).unwrap_or(u32::MAX);
            pa.cmp(&pb)
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    b.score_ratio()
                        .partial_cmp(&a.score_ratio())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.detector.cmp(&b.detector))
        });

        let primary_issue = candidates.first().map(|f| f.issue_type.clone());
        let independent_issues: Vec<String> =
            candidates.iter().map(|f| f.issue_type.clone()).collect();
        let severity = candidates
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Normal);

        let mut suppressed: Vec<String> = suppressed.into_iter().collect();
        suppressed.sort();

        ImageVerdict {
            image_id: String::new(),
            image_path: String::new(),
            width: 0,
            height: 0,
            is_abnormal: !candidates.is_empty(),
            primary_issue,
            severity,
            findings: surviving,
            suppressed,
            independent_issues,
            scores,
            level: options.level,
            profile: options.profile.clone(),
            process_time_ms: 0.0,
            timestamp: Utc::now(),
        }
    }
}

enum DispatchHandle {
    Running(tokio::task::JoinHandle<std::result::Result<Result<Finding>, String>>),
    Failed(String),
}

enum DetectorOutcome {
    Done(Finding),
    TimedOut(Duration),
    Failed(String),
}
