use std::ffi::{CStr, c_char};

use tracing_subscriber::EnvFilter;

/// Default filter when neither the host nor `RUST_LOG` names one.
pub const DEFAULT_FILTER: &str = "warn,llama_binding=info";

/// Install a stderr `tracing` subscriber.
///
/// `filter` wins over `RUST_LOG`. Returns `false` when a global subscriber
/// is already set (by an earlier call or by the host).
pub fn init_logging(filter: Option<&str>) -> bool {
    let filter = match filter {
        Some(f) if !f.trim().is_empty() => EnvFilter::new(f),
        _ => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// C entry for [`init_logging`]; `filter` may be null.
///
/// # Safety
/// `filter` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llama_binding_init_logging(filter: *const c_char) -> bool {
    let filter = if filter.is_null() {
        None
    } else {
        unsafe { CStr::from_ptr(filter) }.to_str().ok()
    };
    init_logging(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        init_logging(Some("debug"));
        assert!(!init_logging(None));
    }
}
