//! Locating the ONNX Runtime shared library for `ort`'s `load-dynamic` mode.

use std::env;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

pub const ORT_DYLIB_ENV: &str = "ORT_DYLIB_PATH";

#[cfg(target_os = "linux")]
const ORT_LIB_NAME: &str = "libonnxruntime.so";
#[cfg(target_os = "macos")]
const ORT_LIB_NAME: &str = "libonnxruntime.dylib";
#[cfg(windows)]
const ORT_LIB_NAME: &str = "onnxruntime.dll";

/// Probed in order: `<data_dir>/lib`, `<exe_dir>/lib`, `<exe_dir>/../lib`,
/// `<cwd>/lib`, then the system library dirs on Unix.
pub fn candidate_lib_dirs(data_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let mut push = |dir: PathBuf| {
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    };

    if let Some(data_dir) = data_dir {
        push(data_dir.join("lib"));
    }
    if let Ok(exe) = env::current_exe().and_then(|p| p.canonicalize()) {
        if let Some(exe_dir) = exe.parent() {
            #[cfg(windows)]
            push(exe_dir.to_path_buf());
            push(exe_dir.join("lib"));
            if let Some(parent) = exe_dir.parent() {
                push(parent.join("lib"));
            }
        }
    }
    if let Ok(cwd) = env::current_dir() {
        push(cwd.join("lib"));
    }
    #[cfg(unix)]
    {
        push(PathBuf::from("/usr/local/lib"));
        push(PathBuf::from("/usr/lib"));
    }
    dirs
}

pub fn find_ort_dylib(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(ORT_LIB_NAME))
        .find(|candidate| candidate.is_file())
}

/// Point `ORT_DYLIB_PATH` at the first library found, unless the user set it.
/// Must run before the first `ort` call.
pub fn configure_ort_dylib(data_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(existing) = env::var_os(ORT_DYLIB_ENV) {
        return Some(PathBuf::from(existing));
    }
    let found = find_ort_dylib(&candidate_lib_dirs(data_dir))?;
    env::set_var(ORT_DYLIB_ENV, &found);
    Some(found)
}

pub fn log_ort_dylib_status() {
    match env::var(ORT_DYLIB_ENV) {
        Ok(path) if Path::new(&path).is_file() => info!(path = %path, "ONNX Runtime library"),
        Ok(path) => warn!(path = %path, "{ORT_DYLIB_ENV} points to a missing file"),
        Err(_) => warn!("{ORT_DYLIB_ENV} not set, ort will use the default search path"),
    }
}
