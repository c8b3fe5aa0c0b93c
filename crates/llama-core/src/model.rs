//! Safe RAII wrapper around `llama_model`.

use std::ffi::CString;
use std::path::Path;
use std::ptr::NonNull;

use tracing::{debug, info};

use crate::LlamaToken;
use crate::backend::LlamaBackend;
use crate::error::{LlamaError, Result};

/// Maximum number of devices a tensor split may name.
pub fn max_devices() -> usize {
    unsafe { llama_sys::llama_max_devices() }
}

/// Owns a `llama_model` pointer and frees it on drop.
pub struct LlamaModel {
    ptr: NonNull<llama_sys::llama_model>,
}

// Safety: llama_model is read-only after loading.
unsafe impl Send for LlamaModel {}
unsafe impl Sync for LlamaModel {}

impl LlamaModel {
    /// Load a GGUF model from `path`.
    pub fn load_from_file(
        _backend: &LlamaBackend,
        path: &Path,
        params: &ModelParams,
    ) -> Result<Self> {
        let path_str = path.to_str().ok_or_else(|| LlamaError::ModelLoadFailed {
            path: path.display().to_string(),
            reason: "Invalid UTF-8 in path".into(),
        })?;
        let c_path =
            CString::new(path_str).map_err(|_| LlamaError::InvalidPath(path_str.into()))?;

        // llama.cpp reads `tensor_split` as an array of `llama_max_devices()`
        // floats; the buffer must outlive the load call.
        let split = params.padded_tensor_split(max_devices())?;

        let mut raw = unsafe { llama_sys::llama_model_default_params() };
        raw.n_gpu_layers = params.n_gpu_layers;
        raw.use_mmap = params.use_mmap;
        raw.use_mlock = params.use_mlock;
        raw.vocab_only = params.vocab_only;
        if let Some(gpu) = params.main_gpu {
            raw.main_gpu = gpu;
        }
        if let Some(split) = &split {
            raw.tensor_split = split.as_ptr();
        }

        info!(path = %path.display(), n_gpu_layers = params.n_gpu_layers, "Loading model");
        let model = unsafe { llama_sys::llama_model_load_from_file(c_path.as_ptr(), raw) };
        let ptr = NonNull::new(model).ok_or_else(|| LlamaError::ModelLoadFailed {
            path: path_str.into(),
            reason: "llama_model_load_from_file returned null".into(),
        })?;

        let model = Self { ptr };
        info!(desc = %model.desc(), n_vocab = model.n_vocab(), "Model loaded");
        Ok(model)
    }

    pub(crate) fn as_ptr(&self) -> *mut llama_sys::llama_model {
        self.ptr.as_ptr()
    }

    /// Vocabulary handle (valid for the lifetime of the model).
    pub fn vocab(&self) -> *const llama_sys::llama_vocab {
        unsafe { llama_sys::llama_model_get_vocab(self.as_ptr()) }
    }

    pub fn desc(&self) -> String {
        let mut buf = vec![0u8; 256];
        let len = unsafe {
            llama_sys::llama_model_desc(
                self.as_ptr(),
                buf.as_mut_ptr() as *mut std::ffi::c_char,
                buf.len(),
            )
        };
        if len > 0 {
            buf.truncate((len as usize).min(buf.len()));
            String::from_utf8_lossy(&buf).into_owned()
        } else {
            String::new()
        }
    }

    pub fn n_ctx_train(&self) -> i32 {
        unsafe { llama_sys::llama_model_n_ctx_train(self.as_ptr()) }
    }

    //  Vocabulary helpers

    pub fn n_vocab(&self) -> i32 {
        unsafe { llama_sys::llama_vocab_n_tokens(self.vocab()) }
    }
    pub fn token_bos(&self) -> LlamaToken {
        unsafe { llama_sys::llama_vocab_bos(self.vocab()) }
    }
    pub fn token_eos(&self) -> LlamaToken {
        unsafe { llama_sys::llama_vocab_eos(self.vocab()) }
    }
    pub fn token_nl(&self) -> LlamaToken {
        unsafe { llama_sys::llama_vocab_nl(self.vocab()) }
    }
}

impl Drop for LlamaModel {
    fn drop(&mut self) {
        debug!("Freeing llama model");
        unsafe { llama_sys::llama_model_free(self.as_ptr()) }
    }
}

//  ModelParams

/// Parameters for [`LlamaModel::load_from_file`].
#[derive(Debug, Clone)]
pub struct ModelParams {
    /// Layers to offload to GPU. -1 = all.
    pub n_gpu_layers: i32,
    pub use_mmap: bool,
    /// Lock model memory (prevent swapping).
    pub use_mlock: bool,
    /// Load only the vocabulary, no weights.
    pub vocab_only: bool,
    /// GPU used for the scratch buffers and small tensors.
    pub main_gpu: Option<i32>,
    /// Fraction of the model assigned to each GPU. Empty = library default.
    pub tensor_split: Vec<f32>,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_gpu_layers: 0,
            use_mmap: true,
            use_mlock: false,
            vocab_only: false,
            main_gpu: None,
            tensor_split: Vec::new(),
        }
    }
}

impl ModelParams {
    /// Pad the split with zeros up to `devices` entries.
    fn padded_tensor_split(&self, devices: usize) -> Result<Option<Vec<f32>>> {
        if self.tensor_split.is_empty() {
            return Ok(None);
        }
        if self.tensor_split.len() > devices {
            return Err(LlamaError::InvalidParam(format!(
                "tensor split names {} devices, at most {devices} supported",
                self.tensor_split.len()
            )));
        }
        let mut split = self.tensor_split.clone();
        split.resize(devices, 0.0);
        Ok(Some(split))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_split_uses_default() {
        let params = ModelParams::default();
        assert!(params.padded_tensor_split(16).unwrap().is_none());
    }

    #[test]
    fn test_split_is_padded() {
        let params = ModelParams {
            tensor_split: vec![3.0, 1.0],
            ..Default::default()
        };
        let split = params.padded_tensor_split(4).unwrap().unwrap();
        assert_eq!(split, vec![3.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_split_exceeding_devices_is_rejected() {
        let params = ModelParams {
            tensor_split: vec![1.0, 1.0, 1.0],
            ..Default::default()
        };
        assert!(matches!(
            params.padded_tensor_split(2),
            Err(LlamaError::InvalidParam(_))
        ));
    }
}
