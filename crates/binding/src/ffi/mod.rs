//! Flat C ABI over [`crate::predict`].
//!
//! Handles are opaque `void*`: a params handle owns a [`PredictOptions`],
//! a context handle owns a [`ContextHandle`]. Every export catches panics
//! and records failures in a thread-local slot read back through
//! [`llama_binding_last_error`].

use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_int};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;

use tracing::error;

use crate::error::{BindingError, Result};

#[cfg(feature = "native")]
mod api;
mod context;
mod params;

#[cfg(feature = "native")]
pub use api::{ABI_VERSION, BindingApi, ENTRY_SYMBOL, llama_binding_entry_v1};
#[cfg(feature = "native")]
pub use context::{load_model, load_model_json};
pub use context::{
    ContextHandle, TokenCallback, eval, llama_binding_free_model, llama_predict,
    llama_set_token_callback,
};
pub use params::{llama_allocate_params, llama_allocate_params_json, llama_free_params};

pub const ERR_OK: c_int = 0;
pub const ERR_FAIL: c_int = 1;
/// The result did not fit the caller's buffer and was cut short.
pub const ERR_TRUNCATED: c_int = 2;

/// Owned, NUL-terminated string handed to the host.
/// Release with [`llama_binding_free_string`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BindingString {
    pub ptr: *mut c_char,
    /// Length in bytes, excluding the terminator.
    pub len: usize,
}

impl BindingString {
    pub const fn null() -> Self {
        Self {
            ptr: ptr::null_mut(),
            len: 0,
        }
    }
}

thread_local! {
    static LAST_ERR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

pub(crate) fn set_last_error(err: &BindingError) {
    let msg = err.to_string();
    error!("{msg}");
    let s = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    LAST_ERR.with(|slot| *slot.borrow_mut() = Some(s));
}

fn make_string(s: &CStr) -> BindingString {
    let bytes = s.to_bytes_with_nul().to_vec().into_boxed_slice();
    let len = bytes.len() - 1;
    let ptr = Box::into_raw(bytes) as *mut c_char;
    BindingString { ptr, len }
}

/// Message of the most recent failure on this thread, or a null string.
#[unsafe(no_mangle)]
pub extern "C" fn llama_binding_last_error() -> BindingString {
    LAST_ERR.with(|slot| match slot.borrow().as_deref() {
        Some(s) => make_string(s),
        None => BindingString::null(),
    })
}

/// # Safety
/// `s` must come from this library and not have been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llama_binding_free_string(s: BindingString) {
    if s.ptr.is_null() {
        return;
    }
    let slice = ptr::slice_from_raw_parts_mut(s.ptr as *mut u8, s.len + 1);
    drop(unsafe { Box::from_raw(slice) });
}

/// Run `f`, turning an error or a panic into `fail` plus a recorded message.
pub(crate) fn guard<T>(fail: T, f: impl FnOnce() -> Result<T>) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => v,
        Ok(Err(e)) => {
            set_last_error(&e);
            fail
        }
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            set_last_error(&BindingError::FfiPanic(msg));
            fail
        }
    }
}

/// Borrow a required string argument.
pub(crate) unsafe fn str_arg<'a>(p: *const c_char, name: &'static str) -> Result<&'a str> {
    if p.is_null() {
        return Err(BindingError::NullPointer(name));
    }
    unsafe { CStr::from_ptr(p) }
        .to_str()
        .map_err(|_| BindingError::InvalidUtf8(name))
}

/// Like [`str_arg`], with null read as `""`.
pub(crate) unsafe fn opt_str_arg<'a>(p: *const c_char, name: &'static str) -> Result<&'a str> {
    if p.is_null() {
        Ok("")
    } else {
        unsafe { str_arg(p, name) }
    }
}

/// Longest prefix of `bytes` no longer than `max` that does not end inside
/// a UTF-8 sequence.
fn utf8_floor(bytes: &[u8], max: usize) -> usize {
    if max >= bytes.len() {
        return bytes.len();
    }
    let mut n = max;
    while n > 0 && (bytes[n] & 0xC0) == 0x80 {
        n -= 1;
    }
    n
}

/// Copy `bytes` plus a terminator into the caller's buffer of `cap` bytes.
pub(crate) unsafe fn copy_to_buffer(bytes: &[u8], out: *mut c_char, cap: usize) -> Result<c_int> {
    if out.is_null() {
        return Err(BindingError::NullPointer("result"));
    }
    if cap == 0 {
        return Ok(ERR_TRUNCATED);
    }
    let n = utf8_floor(bytes, cap - 1);
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), out as *mut u8, n);
        *out.add(n) = 0;
    }
    Ok(if n < bytes.len() { ERR_TRUNCATED } else { ERR_OK })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_floor_backs_off_continuation_bytes() {
        let s = "aé".as_bytes(); // 61 c3 a9
        assert_eq!(utf8_floor(s, 3), 3);
        assert_eq!(utf8_floor(s, 2), 1);
        assert_eq!(utf8_floor(s, 1), 1);
        assert_eq!(utf8_floor(s, 10), 3);
    }

    #[test]
    fn test_copy_to_buffer_truncates() {
        let mut buf = [1 as c_char; 4];
        let rc = unsafe { copy_to_buffer(b"hello", buf.as_mut_ptr(), buf.len()) }.unwrap();
        assert_eq!(rc, ERR_TRUNCATED);
        let out = unsafe { CStr::from_ptr(buf.as_ptr()) };
        assert_eq!(out.to_bytes(), b"hel");

        let mut buf = [1 as c_char; 8];
        let rc = unsafe { copy_to_buffer(b"hello", buf.as_mut_ptr(), buf.len()) }.unwrap();
        assert_eq!(rc, ERR_OK);
        let out = unsafe { CStr::from_ptr(buf.as_ptr()) };
        assert_eq!(out.to_bytes(), b"hello");
    }

    #[test]
    fn test_guard_records_error_and_panic() {
        let rc = guard(ERR_FAIL, || Err(BindingError::EmptyPrompt));
        assert_eq!(rc, ERR_FAIL);
        let s = llama_binding_last_error();
        let msg = unsafe { CStr::from_ptr(s.ptr) }.to_str().unwrap().to_owned();
        assert_eq!(msg, "failed to tokenize prompt");
        assert_eq!(s.len, msg.len());
        unsafe { llama_binding_free_string(s) };

        let rc = guard(ERR_FAIL, || -> Result<c_int> { panic!("boom") });
        assert_eq!(rc, ERR_FAIL);
        let s = llama_binding_last_error();
        let msg = unsafe { CStr::from_ptr(s.ptr) }.to_str().unwrap().to_owned();
        assert!(msg.contains("boom"));
        unsafe { llama_binding_free_string(s) };
    }

    #[test]
    fn test_null_string_args() {
        assert!(matches!(
            unsafe { str_arg(ptr::null(), "prompt") },
            Err(BindingError::NullPointer("prompt"))
        ));
        assert_eq!(unsafe { opt_str_arg(ptr::null(), "session_file") }.unwrap(), "");
    }
}
