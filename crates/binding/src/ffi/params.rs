use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void};
use std::path::PathBuf;
use std::ptr;

use tracing::debug;

use super::{guard, opt_str_arg, str_arg};
use crate::error::{BindingError, Result};
use crate::options::{PredictOptions, parse_logit_bias, parse_main_gpu, parse_tensor_split};

fn into_handle(opts: PredictOptions) -> *mut c_void {
    Box::into_raw(Box::new(opts.normalized())) as *mut c_void
}

unsafe fn antiprompts(list: *const *const c_char, count: c_int) -> Result<Vec<String>> {
    let count = usize::try_from(count).unwrap_or(0);
    if count == 0 {
        return Ok(Vec::new());
    }
    if list.is_null() {
        return Err(BindingError::NullPointer("antiprompt"));
    }
    let items = unsafe { std::slice::from_raw_parts(list, count) };
    items
        .iter()
        .filter(|p| !p.is_null())
        .map(|&p| unsafe { str_arg(p, "antiprompt") }.map(str::to_owned))
        .collect()
}

/// Build a params handle from flat arguments.
///
/// Null string arguments read as empty. `antiprompt` points to
/// `antiprompt_count` strings; null entries are skipped. Returns null on
/// failure.
///
/// # Safety
/// Every non-null pointer must be valid for the duration of the call.
#[allow(clippy::too_many_arguments)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llama_allocate_params(
    prompt: *const c_char,
    seed: c_int,
    threads: c_int,
    tokens: c_int,
    top_k: c_int,
    top_p: f32,
    temp: f32,
    repeat_penalty: f32,
    repeat_last_n: c_int,
    ignore_eos: bool,
    memory_f16: bool,
    n_batch: c_int,
    n_keep: c_int,
    antiprompt: *const *const c_char,
    antiprompt_count: c_int,
    tfs_z: f32,
    typical_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    mirostat: c_int,
    mirostat_eta: f32,
    mirostat_tau: f32,
    penalize_nl: bool,
    logit_bias: *const c_char,
    session_file: *const c_char,
    prompt_cache_all: bool,
    mlock: bool,
    mmap: bool,
    maingpu: *const c_char,
    tensorsplit: *const c_char,
    prompt_cache_ro: bool,
) -> *mut c_void {
    guard(ptr::null_mut(), || {
        let prompt = unsafe { opt_str_arg(prompt, "prompt") }?.to_owned();
        let session_file = unsafe { opt_str_arg(session_file, "session_file") }?;

        let mut bias = HashMap::new();
        if let Some((token, value)) = parse_logit_bias(unsafe { opt_str_arg(logit_bias, "logit_bias") }?) {
            bias.insert(token, value);
        }

        let opts = PredictOptions {
            prompt,
            seed,
            threads,
            tokens,
            top_k,
            top_p,
            temp,
            repeat_penalty,
            repeat_last_n,
            ignore_eos,
            memory_f16,
            n_batch,
            n_keep,
            antiprompt: unsafe { antiprompts(antiprompt, antiprompt_count) }?,
            tfs_z,
            typical_p,
            frequency_penalty,
            presence_penalty,
            mirostat,
            mirostat_eta,
            mirostat_tau,
            penalize_nl,
            logit_bias: bias,
            session_file: Some(PathBuf::from(session_file)),
            prompt_cache_all,
            prompt_cache_ro,
            mlock,
            mmap,
            main_gpu: parse_main_gpu(unsafe { opt_str_arg(maingpu, "main_gpu") }?)?,
            tensor_split: parse_tensor_split(unsafe { opt_str_arg(tensorsplit, "tensor_split") }?)?,
        };
        debug!(tokens, n_batch, mirostat, "params allocated");
        Ok(into_handle(opts))
    })
}

/// Build a params handle from a JSON object; absent fields take defaults.
///
/// # Safety
/// `json` must be a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llama_allocate_params_json(json: *const c_char) -> *mut c_void {
    guard(ptr::null_mut(), || {
        let json = unsafe { str_arg(json, "json") }?;
        Ok(into_handle(PredictOptions::from_json(json)?))
    })
}

/// # Safety
/// `params` must be null or a handle from `llama_allocate_params*` that has
/// not been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llama_free_params(params: *mut c_void) {
    if !params.is_null() {
        drop(unsafe { Box::from_raw(params as *mut PredictOptions) });
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use super::*;

    unsafe fn options<'a>(handle: *mut c_void) -> &'a PredictOptions {
        assert!(!handle.is_null());
        unsafe { &*(handle as *const PredictOptions) }
    }

    #[allow(clippy::too_many_arguments)]
    fn allocate(
        prompt: &CString,
        antiprompt: &[*const c_char],
        logit_bias: &CString,
        session_file: &CString,
        maingpu: &CString,
        tensorsplit: &CString,
    ) -> *mut c_void {
        unsafe {
            llama_allocate_params(
                prompt.as_ptr(),
                7,
                2,
                16,
                40,
                0.9,
                0.7,
                1.1,
                64,
                false,
                true,
                8,
                -1,
                antiprompt.as_ptr(),
                antiprompt.len() as c_int,
                1.0,
                1.0,
                0.0,
                0.0,
                0,
                0.1,
                5.0,
                false,
                logit_bias.as_ptr(),
                session_file.as_ptr(),
                false,
                false,
                true,
                maingpu.as_ptr(),
                tensorsplit.as_ptr(),
                true,
            )
        }
    }

    #[test]
    fn test_allocate_params_from_flat_args() {
        let prompt = CString::new("Hello").unwrap();
        let stop = CString::new("User:").unwrap();
        let bias = CString::new("15043+1").unwrap();
        let session = CString::new("").unwrap();
        let gpu = CString::new("1").unwrap();
        let split = CString::new("3,1").unwrap();

        let handle = allocate(&prompt, &[stop.as_ptr()], &bias, &session, &gpu, &split);
        let opts = unsafe { options(handle) };
        assert_eq!(opts.prompt, "Hello");
        assert_eq!(opts.seed, 7);
        assert_eq!(opts.tokens, 16);
        assert_eq!(opts.n_keep, -1);
        assert_eq!(opts.antiprompt, vec!["User:".to_string()]);
        assert_eq!(opts.logit_bias.get(&15043), Some(&1.0));
        assert_eq!(opts.session_file, None);
        assert_eq!(opts.main_gpu, Some(1));
        assert_eq!(opts.tensor_split, vec![3.0, 1.0]);
        assert!(!opts.penalize_nl);
        assert!(opts.prompt_cache_ro);
        unsafe { llama_free_params(handle) };
    }

    #[test]
    fn test_allocate_params_skips_null_antiprompt() {
        let empty = CString::new("").unwrap();
        let stop = CString::new("User:").unwrap();
        let handle = allocate(
            &empty,
            &[ptr::null(), stop.as_ptr(), ptr::null()],
            &empty,
            &empty,
            &empty,
            &empty,
        );
        let opts = unsafe { options(handle) };
        assert_eq!(opts.antiprompt, vec!["User:".to_string()]);
        unsafe { llama_free_params(handle) };
    }

    #[test]
    fn test_allocate_params_ignores_malformed_logit_bias() {
        let empty = CString::new("").unwrap();
        let bias = CString::new("15043+abc").unwrap();
        let handle = allocate(&empty, &[], &bias, &empty, &empty, &empty);
        let opts = unsafe { options(handle) };
        assert!(opts.logit_bias.is_empty());
        unsafe { llama_free_params(handle) };
    }

    #[test]
    fn test_allocate_params_rejects_bad_main_gpu() {
        let empty = CString::new("").unwrap();
        let gpu = CString::new("gpu0").unwrap();
        let handle = allocate(&empty, &[], &empty, &empty, &gpu, &empty);
        assert!(handle.is_null());
    }

    #[test]
    fn test_allocate_params_json() {
        let json = CString::new(r#"{"prompt":"Hi","tokens":4,"antiprompt":["","END"]}"#).unwrap();
        let handle = unsafe { llama_allocate_params_json(json.as_ptr()) };
        let opts = unsafe { options(handle) };
        assert_eq!(opts.prompt, "Hi");
        assert_eq!(opts.tokens, 4);
        assert_eq!(opts.antiprompt, vec!["END".to_string()]);
        assert_eq!(opts.top_k, 40);
        unsafe { llama_free_params(handle) };

        let bad = CString::new("{").unwrap();
        assert!(unsafe { llama_allocate_params_json(bad.as_ptr()) }.is_null());
    }

    #[test]
    fn test_free_null_params_is_noop() {
        unsafe { llama_free_params(ptr::null_mut()) };
    }
}
