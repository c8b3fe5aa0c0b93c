use std::ffi::{c_char, c_int, c_void};

use super::*;
use crate::logging::llama_binding_init_logging;

/// Bump when the table layout or any signature changes.
pub const ABI_VERSION: u32 = 1;

pub const ENTRY_SYMBOL: &str = "llama_binding_entry_v1";

//  Function pointer types

pub type LoadModelFn = unsafe extern "C" fn(
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
) -> *mut c_void;
pub type LoadModelJsonFn = unsafe extern "C" fn(json: *const c_char) -> *mut c_void;
pub type FreeModelFn = unsafe extern "C" fn(ctx: *mut c_void);

pub type AllocateParamsFn = unsafe extern "C" fn(
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
) -> *mut c_void;
pub type AllocateParamsJsonFn = unsafe extern "C" fn(json: *const c_char) -> *mut c_void;
pub type FreeParamsFn = unsafe extern "C" fn(params: *mut c_void);

pub type SetTokenCallbackFn =
    unsafe extern "C" fn(ctx: *mut c_void, callback: Option<TokenCallback>, user_data: *mut c_void);
pub type EvalFn =
    unsafe extern "C" fn(params: *mut c_void, ctx: *mut c_void, text: *const c_char) -> c_int;
pub type PredictFn = unsafe extern "C" fn(
    params: *mut c_void,
    ctx: *mut c_void,
    result: *mut c_char,
    result_len: usize,
    debug: bool,
) -> c_int;

pub type LastErrorFn = extern "C" fn() -> BindingString;
pub type FreeStringFn = unsafe extern "C" fn(s: BindingString);
pub type InitLoggingFn = unsafe extern "C" fn(filter: *const c_char) -> bool;

//  VTable

/// Every export in one table, for hosts that resolve a single symbol.
#[repr(C)]
pub struct BindingApi {
    pub abi_version: u32,

    pub load_model: LoadModelFn,
    pub load_model_json: LoadModelJsonFn,
    pub free_model: FreeModelFn,

    pub allocate_params: AllocateParamsFn,
    pub allocate_params_json: AllocateParamsJsonFn,
    pub free_params: FreeParamsFn,

    pub set_token_callback: SetTokenCallbackFn,
    pub eval: EvalFn,
    pub predict: PredictFn,

    // Diagnostics & memory management
    pub last_error: LastErrorFn,
    pub free_string: FreeStringFn,
    pub init_logging: InitLoggingFn,
}

static API: BindingApi = BindingApi {
    abi_version: ABI_VERSION,
    load_model,
    load_model_json,
    free_model: llama_binding_free_model,
    allocate_params: llama_allocate_params,
    allocate_params_json: llama_allocate_params_json,
    free_params: llama_free_params,
    set_token_callback: llama_set_token_callback,
    eval,
    predict: llama_predict,
    last_error: llama_binding_last_error,
    free_string: llama_binding_free_string,
    init_logging: llama_binding_init_logging,
};

/// Entry point: a pointer to the static [`BindingApi`] table.
#[unsafe(no_mangle)]
pub extern "C" fn llama_binding_entry_v1() -> *const BindingApi {
    &API
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_reports_abi_version() {
        let api = unsafe { &*llama_binding_entry_v1() };
        assert_eq!(api.abi_version, ABI_VERSION);
        let err = (api.last_error)();
        unsafe { (api.free_string)(err) };
    }
}
