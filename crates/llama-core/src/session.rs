//! Session (prompt cache) files: KV state plus the tokens that produced it.

use std::ffi::CString;
use std::path::Path;

use tracing::debug;

use crate::LlamaToken;
use crate::context::LlamaContext;
use crate::error::{LlamaError, Result};

fn c_path(path: &Path) -> Result<CString> {
    let s = path.to_string_lossy();
    CString::new(s.as_bytes()).map_err(|_| LlamaError::InvalidPath(s.into_owned()))
}

impl LlamaContext {
    /// Restore the context state from `path`, returning at most `capacity`
    /// tokens that were saved with it.
    pub fn load_session_file(&mut self, path: &Path, capacity: usize) -> Result<Vec<LlamaToken>> {
        let c_path = c_path(path)?;
        let mut tokens: Vec<LlamaToken> = vec![0; capacity];
        let mut n_out: usize = 0;
        let ok = unsafe {
            llama_sys::llama_state_load_file(
                self.as_ptr(),
                c_path.as_ptr(),
                tokens.as_mut_ptr(),
                tokens.len(),
                &mut n_out,
            )
        };
        if !ok {
            return Err(LlamaError::SessionLoadFailed(path.display().to_string()));
        }
        tokens.truncate(n_out);
        debug!(path = %path.display(), n_tokens = n_out, "Session state loaded");
        Ok(tokens)
    }

    /// Write the current context state and `tokens` to `path`.
    pub fn save_session_file(&mut self, path: &Path, tokens: &[LlamaToken]) -> Result<()> {
        let c_path = c_path(path)?;
        let ok = unsafe {
            llama_sys::llama_state_save_file(
                self.as_ptr(),
                c_path.as_ptr(),
                tokens.as_ptr(),
                tokens.len(),
            )
        };
        if !ok {
            return Err(LlamaError::SessionSaveFailed(path.display().to_string()));
        }
        debug!(path = %path.display(), n_tokens = tokens.len(), "Session state saved");
        Ok(())
    }
}
