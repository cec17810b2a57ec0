//! vqdiag - Video Quality Diagnosis Core
//!
//! ## Architecture (9 Components)
//!
//! 1. DetectorRegistry - descriptors, factories, suppression graph
//! 2. Image detectors - blur/brightness/contrast/color/noise/stripe/
//!    occlusion/signal-loss scoring
//! 3. ImagePipeline - parallel dispatch, suppression fix point, rollup
//! 4. Video detectors - freeze/scene-change/shake over sampled windows
//! 5. VideoPipeline - sampler + bounded buffer + temporal aggregation
//! 6. StreamService - live workers with reconnect/backoff and result rings
//! 7. SchedulerService - cron tasks, bounded pool, append-only history
//! 8. ProfileStore - threshold presets and overrides
//! 9. DiagnosisService - the in-process operation surface
//!
//! ## Design Principles
//!
//! - Detectors are pure CPU functions; faults become findings, never aborts
//! - Registry and descriptors are immutable after startup
//! - Every collaborator that owns a codec sits behind a trait in `media`

pub mod detectors;
pub mod diagnosis_service;
pub mod error;
pub mod frame;
pub mod imgproc;
pub mod media;
pub mod pipeline;
pub mod profiles;
pub mod scheduler;
pub mod state;
pub mod stream_service;
pub mod video_pipeline;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
