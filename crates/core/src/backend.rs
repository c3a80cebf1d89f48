//! Inference backend selection and `ort::Session` construction.
//!
//! [`build_session`] registers the execution providers for the requested
//! [`InferenceBackend`]. TensorRT keeps an engine cache and falls back to CUDA;
//! CUDA falls back to CPU when the provider is unavailable.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use ort::{
    execution_providers::{
        CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
        TensorRTExecutionProvider,
    },
    session::{builder::GraphOptimizationLevel, Session},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_TRT_CACHE_DIR: &str = "trt_cache";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceBackend {
    #[default]
    Cpu,
    Cuda,
    Tensorrt,
}

impl InferenceBackend {
    /// Case-insensitive; anything unrecognised means CPU.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" | "gpu" => Self::Cuda,
            "tensorrt" | "trt" => Self::Tensorrt,
            _ => Self::Cpu,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Tensorrt => "tensorrt",
        }
    }
}

impl fmt::Display for InferenceBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct SessionConfig<'a> {
    pub model_path: &'a Path,
    pub backend: InferenceBackend,
    pub trt_cache_dir: Option<&'a Path>,
}

pub fn build_session(config: &SessionConfig<'_>) -> Result<Session> {
    let model_path = config.model_path;
    if !model_path.is_file() {
        bail!("model file does not exist: {}", model_path.display());
    }

    let providers = match config.backend {
        InferenceBackend::Cpu => Vec::new(),
        InferenceBackend::Cuda => vec![cuda_provider()],
        InferenceBackend::Tensorrt => {
            let cache_dir = config
                .trt_cache_dir
                .unwrap_or_else(|| Path::new(DEFAULT_TRT_CACHE_DIR));
            return build_tensorrt_session(model_path, cache_dir);
        }
    };
    debug!(backend = %config.backend, model = %model_path.display(), "Building ONNX session");
    commit(model_path, providers)
}

fn commit(model_path: &Path, providers: Vec<ExecutionProviderDispatch>) -> Result<Session> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    if !providers.is_empty() {
        builder = builder.with_execution_providers(providers)?;
    }
    builder
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load ONNX model: {}", model_path.display()))
}

fn cuda_provider() -> ExecutionProviderDispatch {
    let cuda = CUDAExecutionProvider::default();
    if !cuda.is_available().unwrap_or(false) {
        warn!("CUDA execution provider unavailable, ORT will run on CPU");
    }
    cuda.build()
}

fn build_tensorrt_session(model_path: &Path, cache_dir: &Path) -> Result<Session> {
    if let Err(err) = fs::create_dir_all(cache_dir) {
        warn!(dir = %cache_dir.display(), error = %err, "Cannot create TensorRT engine cache dir");
    }
    let cached_before = cached_engine_count(cache_dir);
    info!(
        cache_dir = %cache_dir.display(),
        cached_engines = cached_before,
        "Building TensorRT session; an engine compile can take minutes"
    );

    let providers = vec![
        TensorRTExecutionProvider::default()
            .with_engine_cache(true)
            .with_engine_cache_path(cache_dir.to_string_lossy().to_string())
            .with_fp16(true)
            .with_device_id(0)
            .build(),
        CUDAExecutionProvider::default().build(),
    ];

    let heartbeat = Heartbeat::start("TensorRT session still building");
    let started = Instant::now();
    let result = commit(model_path, providers);
    drop(heartbeat);

    let elapsed_secs = started.elapsed().as_secs_f64();
    match &result {
        Ok(_) => info!(
            elapsed_secs,
            engine_compiled = cached_engine_count(cache_dir) > cached_before,
            "TensorRT session ready"
        ),
        Err(err) => error!(elapsed_secs, error = %err, "TensorRT session failed"),
    }
    result
}

fn cached_engine_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file())
                .count()
        })
        .unwrap_or(0)
}

/// Logs `message` every [`HEARTBEAT_INTERVAL`] until dropped.
struct Heartbeat {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    fn start(message: &'static str) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let started = Instant::now();
            while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(HEARTBEAT_INTERVAL) {
                info!(elapsed_secs = started.elapsed().as_secs(), "{message}");
            }
        });
        Self {
            stop: Some(stop),
            handle: Some(handle),
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossy_parse_accepts_aliases() {
        let cases = [
            ("cpu", InferenceBackend::Cpu),
            ("GPU", InferenceBackend::Cuda),
            (" cuda ", InferenceBackend::Cuda),
            ("TRT", InferenceBackend::Tensorrt),
            ("TensorRT", InferenceBackend::Tensorrt),
            ("openvino", InferenceBackend::Cpu),
            ("", InferenceBackend::Cpu),
        ];
        for (raw, expected) in cases {
            assert_eq!(InferenceBackend::from_str_lossy(raw), expected, "{raw:?}");
        }
    }

    #[test]
    fn display_round_trips_through_lossy_parse() {
        for backend in [
            InferenceBackend::Cpu,
            InferenceBackend::Cuda,
            InferenceBackend::Tensorrt,
        ] {
            assert_eq!(InferenceBackend::from_str_lossy(&backend.to_string()), backend);
        }
    }

    #[test]
    fn missing_model_fails_before_ort_is_touched() {
        let err = build_session(&SessionConfig {
            model_path: Path::new("/nonexistent/model.onnx"),
            backend: InferenceBackend::Tensorrt,
            trt_cache_dir: None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("model file does not exist"));
    }

    #[test]
    fn engine_count_ignores_missing_dirs_and_subdirs() {
        assert_eq!(cached_engine_count(Path::new("/nonexistent/trt_cache")), 0);

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.engine"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        assert_eq!(cached_engine_count(dir.path()), 1);
    }

    #[test]
    fn heartbeat_stops_promptly_on_drop() {
        let started = Instant::now();
        drop(Heartbeat::start("test"));
        assert!(started.elapsed() < HEARTBEAT_INTERVAL);
    }
}
