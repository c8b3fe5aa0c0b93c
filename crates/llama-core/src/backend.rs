//! Process-global llama.cpp backend initialization.

use std::ffi::CStr;
use std::sync::Once;
use tracing::{debug, info};

static BACKEND_INIT: Once = Once::new();
static NUMA_INIT: Once = Once::new();

/// Handle proving the llama.cpp backend has been initialized.
///
/// The first call to [`LlamaBackend::init`] initializes the C backend and
/// routes llama.cpp's log output into `tracing`; later calls are no-ops.
/// The backend lives until process exit.
#[derive(Debug, Clone, Copy)]
pub struct LlamaBackend {
    _private: (),
}

impl LlamaBackend {
    /// Initialize the llama.cpp backend (idempotent).
    pub fn init() -> Self {
        BACKEND_INIT.call_once(|| {
            unsafe {
                llama_sys::llama_backend_init();
                llama_sys::llama_log_set(Some(forward_log), std::ptr::null_mut());
            }
            info!("llama.cpp backend initialized");
        });
        Self { _private: () }
    }

    /// Enable NUMA optimizations. Only the first call has an effect.
    pub fn numa_init(&self, strategy: NumaStrategy) {
        if strategy == NumaStrategy::Disabled {
            return;
        }
        NUMA_INIT.call_once(|| {
            unsafe {
                llama_sys::llama_numa_init(strategy.as_raw());
            }
            debug!(?strategy, "NUMA initialized");
        });
    }

    pub fn system_info(&self) -> String {
        unsafe {
            CStr::from_ptr(llama_sys::llama_print_system_info())
                .to_string_lossy()
                .into_owned()
        }
    }
}

unsafe extern "C" fn forward_log(
    level: llama_sys::ggml_log_level,
    text: *const std::ffi::c_char,
    _user_data: *mut std::ffi::c_void,
) {
    if text.is_null() {
        return;
    }
    let msg = unsafe { CStr::from_ptr(text) }.to_string_lossy();
    let msg = msg.trim();
    if msg.is_empty() {
        return;
    }
    // ggml_log_level: DEBUG=1, INFO=2, WARN=3, ERROR=4
    match level {
        4 => tracing::error!(target: "llama.cpp", "{msg}"),
        3 => tracing::warn!(target: "llama.cpp", "{msg}"),
        2 => tracing::info!(target: "llama.cpp", "{msg}"),
        _ => tracing::debug!(target: "llama.cpp", "{msg}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumaStrategy {
    Disabled,
    Distribute,
    Isolate,
    NUMACtl,
    Mirror,
}

impl NumaStrategy {
    fn as_raw(self) -> llama_sys::ggml_numa_strategy {
        match self {
            Self::Disabled => 0,
            Self::Distribute => 1,
            Self::Isolate => 2,
            Self::NUMACtl => 3,
            Self::Mirror => 4,
        }
    }
}

impl From<bool> for NumaStrategy {
    /// The host's `numa` flag maps to the distribute strategy.
    fn from(enabled: bool) -> Self {
        if enabled { Self::Distribute } else { Self::Disabled }
    }
}
