use std::ffi::{CString, c_char, c_int, c_void};
use std::ptr;

use super::{ERR_FAIL, ERR_OK, copy_to_buffer, guard, str_arg};
use crate::engine::Engine;
use crate::error::{BindingError, Result};
use crate::options::PredictOptions;
use crate::predict;

/// Receives each generated piece as a NUL-terminated string; returning
/// `false` stops the prediction.
pub type TokenCallback = unsafe extern "C" fn(user_data: *mut c_void, token: *const c_char) -> bool;

/// Host callback plus its opaque argument.
#[derive(Clone, Copy)]
struct TokenSink {
    callback: Option<TokenCallback>,
    user_data: *mut c_void,
}

impl TokenSink {
    fn emit(&self, piece: &[u8]) -> bool {
        let Some(cb) = self.callback else {
            return true;
        };
        let piece: Vec<u8> = piece.iter().copied().filter(|&b| b != 0).collect();
        let piece = CString::new(piece).unwrap_or_default();
        unsafe { cb(self.user_data, piece.as_ptr()) }
    }
}

/// What a context handle points at.
pub struct ContextHandle {
    engine: Box<dyn Engine + Send>,
    sink: TokenSink,
}

impl ContextHandle {
    pub fn new(engine: Box<dyn Engine + Send>) -> Self {
        Self {
            engine,
            sink: TokenSink {
                callback: None,
                user_data: ptr::null_mut(),
            },
        }
    }

    /// Hand ownership to the host; release with [`llama_binding_free_model`].
    pub fn into_raw(self) -> *mut c_void {
        Box::into_raw(Box::new(self)) as *mut c_void
    }
}

unsafe fn handle_mut<'a>(ctx: *mut c_void) -> Result<&'a mut ContextHandle> {
    if ctx.is_null() {
        return Err(BindingError::NullPointer("ctx"));
    }
    Ok(unsafe { &mut *(ctx as *mut ContextHandle) })
}

unsafe fn params_ref<'a>(params: *const c_void) -> Result<&'a PredictOptions> {
    if params.is_null() {
        return Err(BindingError::NullPointer("params"));
    }
    Ok(unsafe { &*(params as *const PredictOptions) })
}

/// Load a model and create its context. Returns null on failure.
///
/// Empty `maingpu` / `tensorsplit` keep the library defaults.
///
/// # Safety
/// `fname` must be a valid NUL-terminated path; the other string arguments
/// must be null or NUL-terminated.
#[cfg(feature = "native")]
#[allow(clippy::too_many_arguments)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn load_model(
    fname: *const c_char,
    n_ctx: c_int,
    n_seed: c_int,
    memory_f16: bool,
    mlock: bool,
    embeddings: bool,
    mmap: bool,
    low_vram: bool,
    vocab_only: bool,
    n_gpu_layers: c_int,
    n_batch: c_int,
    maingpu: *const c_char,
    tensorsplit: *const c_char,
    numa: bool,
) -> *mut c_void {
    use crate::options::{ModelOptions, parse_main_gpu, parse_tensor_split};

    guard(ptr::null_mut(), || {
        let path = unsafe { str_arg(fname, "fname") }?;
        let context_size = u32::try_from(n_ctx).map_err(|_| BindingError::InvalidOption {
            field: "n_ctx",
            reason: format!("{n_ctx} is negative"),
        })?;
        let opts = ModelOptions {
            context_size,
            seed: n_seed,
            f16_memory: memory_f16,
            mlock,
            embeddings,
            mmap,
            low_vram,
            vocab_only,
            n_gpu_layers,
            n_batch,
            main_gpu: parse_main_gpu(unsafe { super::opt_str_arg(maingpu, "main_gpu") }?)?,
            tensor_split: parse_tensor_split(unsafe {
                super::opt_str_arg(tensorsplit, "tensor_split")
            }?)?,
            numa,
            ..ModelOptions::new(path)
        };
        let engine = crate::native::NativeEngine::load(&opts)?;
        Ok(ContextHandle::new(Box::new(engine)).into_raw())
    })
}

/// [`load_model`] with a JSON object of model options.
///
/// # Safety
/// `json` must be a valid NUL-terminated string.
#[cfg(feature = "native")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn load_model_json(json: *const c_char) -> *mut c_void {
    guard(ptr::null_mut(), || {
        let opts = crate::options::ModelOptions::from_json(unsafe { str_arg(json, "json") }?)?;
        let engine = crate::native::NativeEngine::load(&opts)?;
        Ok(ContextHandle::new(Box::new(engine)).into_raw())
    })
}

/// # Safety
/// `ctx` must be null or a live context handle; it is invalid afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llama_binding_free_model(ctx: *mut c_void) {
    if !ctx.is_null() {
        drop(unsafe { Box::from_raw(ctx as *mut ContextHandle) });
    }
}

/// Register (or with a null `callback`, clear) the per-context token
/// callback. `user_data` is passed back untouched.
///
/// # Safety
/// `ctx` must be a live context handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llama_set_token_callback(
    ctx: *mut c_void,
    callback: Option<TokenCallback>,
    user_data: *mut c_void,
) {
    guard((), || {
        let handle = unsafe { handle_mut(ctx) }?;
        handle.sink = TokenSink {
            callback,
            user_data,
        };
        Ok(())
    })
}

/// Evaluate `text` from an empty context. 0 on success, 1 on failure.
///
/// # Safety
/// `params` and `ctx` must be live handles, `text` a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn eval(params: *mut c_void, ctx: *mut c_void, text: *const c_char) -> c_int {
    guard(ERR_FAIL, || {
        let opts = unsafe { params_ref(params) }?;
        let handle = unsafe { handle_mut(ctx) }?;
        let text = unsafe { str_arg(text, "text") }?;
        predict::eval(&mut *handle.engine, opts, text)?;
        Ok(ERR_OK)
    })
}

/// Run one prediction and write the prompt echo plus generated text into
/// `result` (`result_len` bytes, NUL included).
///
/// Returns 0 on success, 1 on failure and 2 when the text was truncated at
/// a UTF-8 boundary to fit.
///
/// # Safety
/// `params` and `ctx` must be live handles and `result` must be writable for
/// `result_len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llama_predict(
    params: *mut c_void,
    ctx: *mut c_void,
    result: *mut c_char,
    result_len: usize,
    debug: bool,
) -> c_int {
    guard(ERR_FAIL, || {
        let opts = unsafe { params_ref(params) }?;
        let handle = unsafe { handle_mut(ctx) }?;
        if result.is_null() {
            return Err(BindingError::NullPointer("result"));
        }

        let sink = handle.sink;
        let prediction =
            predict::predict(&mut *handle.engine, opts, debug, |piece| sink.emit(piece))?;
        unsafe { copy_to_buffer(&prediction.bytes, result, result_len) }
    })
}
