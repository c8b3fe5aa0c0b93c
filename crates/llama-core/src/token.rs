//! Tokenization helpers.

use std::ffi::c_char;

use crate::LlamaToken;
use crate::error::{LlamaError, Result};

/// Tokenize `text` using the model's vocabulary.
pub fn tokenize(
    vocab: *const llama_sys::llama_vocab,
    text: &str,
    add_special: bool,
    parse_special: bool,
) -> Result<Vec<LlamaToken>> {
    let call = |buf: &mut [LlamaToken]| unsafe {
        llama_sys::llama_tokenize(
            vocab,
            text.as_ptr() as *const c_char,
            text.len() as i32,
            buf.as_mut_ptr(),
            buf.len() as i32,
            add_special,
            parse_special,
        )
    };

    // An empty buffer makes llama.cpp report the required size as -n.
    let probe = call(&mut [][..]);
    if probe == i32::MIN {
        return Err(LlamaError::TokenizationFailed(
            "token count overflows int32".into(),
        ));
    }
    let needed = probe.unsigned_abs() as usize;
    if needed == 0 {
        return Ok(Vec::new());
    }

    let mut tokens = vec![0; needed];
    let actual = call(tokens.as_mut_slice());
    if actual < 0 {
        return Err(LlamaError::TokenizationFailed(format!(
            "llama_tokenize returned {actual}"
        )));
    }

    tokens.truncate(actual as usize);
    Ok(tokens)
}

/// Raw bytes of a single token. Pieces may split a UTF-8 sequence, so no
/// string conversion happens here.
pub fn token_to_piece(vocab: *const llama_sys::llama_vocab, token: LlamaToken) -> Vec<u8> {
    let call = |buf: &mut [u8]| unsafe {
        llama_sys::llama_token_to_piece(
            vocab,
            token,
            buf.as_mut_ptr() as *mut c_char,
            buf.len() as i32,
            0,     // lstrip
            false, // special
        )
    };

    let mut buf = vec![0u8; 32];
    let mut len = call(buf.as_mut_slice());
    if len < 0 {
        buf.resize(len.unsigned_abs() as usize, 0);
        len = call(buf.as_mut_slice());
    }
    buf.truncate(len.max(0) as usize);
    buf
}
