//! One inference session driven to completion.
//!
//! [`predict`] feeds the prompt through the engine in batches, reuses a
//! saved session prefix when one matches, swaps context when the window
//! fills, and samples until the token budget, EOS, a stop word or the
//! token callback ends it.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::engine::{Engine, Token};
use crate::error::{BindingError, Result};
use crate::options::PredictOptions;
use crate::sampling::Sampler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// End-of-sequence token.
    Stop,
    /// Token budget exhausted.
    Length,
    /// The token callback asked to stop.
    Cancelled,
    /// An antiprompt appeared at the end of the output.
    StopWord(String),
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::StopWord(w) => write!(f, "stop_word:{w}"),
        }
    }
}

/// Result of [`predict`].
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Rendered prompt echo followed by the generated text, as raw bytes.
    pub bytes: Vec<u8>,
    pub finish_reason: FinishReason,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl Prediction {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Tokenize `text` (capped at the context size) and evaluate it from
/// position 0.
pub fn eval<E: Engine + ?Sized>(engine: &mut E, opts: &PredictOptions, text: &str) -> Result<()> {
    let mut tokens = engine.tokenize(text, true)?;
    tokens.truncate(engine.n_ctx());
    if tokens.is_empty() {
        return Err(BindingError::EmptyPrompt);
    }
    engine.eval(&tokens, 0, opts.effective_threads())
}

fn resolve_seed(seed: i32) -> u64 {
    if seed > 0 {
        return seed as u64;
    }
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn log_session_match(prompt_empty: bool, matching: usize, input: usize) {
    if prompt_empty && matching == input {
        debug!("using full prompt from session file");
    } else if matching >= input {
        debug!("session file has exact match for prompt");
    } else if matching < input / 2 {
        warn!(
            matching,
            input, "session file has low similarity to prompt; will mostly be reevaluated"
        );
    } else {
        debug!(matching, input, "session file matches part of the prompt");
    }
}

/// Run one session. `on_token` receives every sampled piece and returns
/// `false` to stop generation.
pub fn predict<E, F>(
    engine: &mut E,
    opts: &PredictOptions,
    debug: bool,
    mut on_token: F,
) -> Result<Prediction>
where
    E: Engine + ?Sized,
    F: FnMut(&[u8]) -> bool,
{
    let n_ctx = engine.n_ctx();
    let n_batch = opts.n_batch.max(1) as usize;
    let n_threads = opts.effective_threads();
    let bos = engine.token_bos();
    let eos = engine.token_eos();
    let nl = engine.token_nl();

    let seed = resolve_seed(opts.seed);
    let mut sampler = Sampler::new(opts, seed);

    // Warm-up run. Done before the session load so the restored state is
    // not clobbered.
    engine.eval(&[bos], 0, n_threads)?;
    engine.reset_timings();

    let mut path_session = opts.session_file.clone();
    let mut session_tokens: Vec<Token> = Vec::new();
    if let Some(path) = &path_session {
        debug!(path = %path.display(), "attempting to load saved session");
        if path.exists() {
            session_tokens =
                engine
                    .load_session(path, n_ctx)
                    .map_err(|e| BindingError::SessionLoad {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
            debug!(n_tokens = session_tokens.len(), "loaded saved session");
        } else {
            debug!("session file does not exist, will create");
        }
    }

    let embd_inp = if !opts.prompt.is_empty() || session_tokens.is_empty() {
        engine.tokenize(&opts.prompt, true)?
    } else {
        session_tokens.clone()
    };

    let n_matching = session_tokens
        .iter()
        .zip(&embd_inp)
        .take_while(|(a, b)| a == b)
        .count();
    if !session_tokens.is_empty() {
        log_session_match(opts.prompt.is_empty(), n_matching, embd_inp.len());
    }

    // Whole prompt cached and the cache runs past it: re-evaluate the last
    // prompt token so its logits are fresh.
    if !embd_inp.is_empty()
        && n_matching == embd_inp.len()
        && session_tokens.len() > embd_inp.len()
    {
        session_tokens.truncate(embd_inp.len() - 1);
    }

    let n_keep = match usize::try_from(opts.n_keep) {
        Ok(k) if k <= embd_inp.len() => k,
        _ => embd_inp.len(),
    };

    let mut history: VecDeque<Token> = VecDeque::from(vec![0; n_ctx]);

    let mut need_to_save_session = path_session.is_some() && n_matching < embd_inp.len();
    let mut n_past = 0usize;
    let mut n_remain = i64::from(opts.tokens);
    let mut n_consumed = 0usize;
    let mut n_session_consumed = 0usize;
    let mut completion_tokens = 0usize;

    let mut embd: Vec<Token> = Vec::new();
    let mut output: Vec<u8> = Vec::new();
    let mut finish_reason = FinishReason::Length;

    while n_remain != 0 {
        if !embd.is_empty() {
            // Out of context: keep the first n_keep tokens, then re-feed the
            // most recent half of the rest ahead of the pending tokens.
            if n_past + embd.len() > n_ctx {
                let n_left = n_past.saturating_sub(n_keep);
                n_past = n_keep.max(1);

                let window = history.make_contiguous();
                let end = n_ctx.saturating_sub(embd.len());
                let start = end.saturating_sub(n_left / 2);
                embd.splice(0..0, window[start..end].iter().copied());

                debug!(n_past, n_left, refed = end - start, "context swap");
                path_session = None;
            }

            // Skip whatever prefix the loaded session already evaluated.
            if n_session_consumed < session_tokens.len() {
                let mut i = 0;
                while i < embd.len() {
                    if embd[i] != session_tokens[n_session_consumed] {
                        session_tokens.truncate(n_session_consumed);
                        break;
                    }
                    n_past += 1;
                    n_session_consumed += 1;
                    i += 1;
                    if n_session_consumed >= session_tokens.len() {
                        break;
                    }
                }
                embd.drain(..i);
            }

            for chunk in embd.chunks(n_batch) {
                engine.eval(chunk, n_past, n_threads)?;
                n_past += chunk.len();
            }

            if !embd.is_empty() && path_session.is_some() {
                session_tokens.extend_from_slice(&embd);
                n_session_consumed = session_tokens.len();
            }
        }

        embd.clear();

        if embd_inp.len() <= n_consumed {
            // Save the prompt state on the first sample so the next run
            // can skip straight to generation.
            if let Some(path) = &path_session {
                if need_to_save_session && !opts.prompt_cache_ro {
                    need_to_save_session = false;
                    save_session(engine, path, &session_tokens);
                }
            }

            let id = sampler.sample(
                engine.logits(),
                history.make_contiguous(),
                n_ctx,
                eos,
                nl,
            );
            history.pop_front();
            history.push_back(id);

            embd.push(id);
            n_remain -= 1;
            completion_tokens += 1;

            if !on_token(&engine.token_to_piece(id)) {
                finish_reason = FinishReason::Cancelled;
                break;
            }
        } else {
            while embd_inp.len() > n_consumed {
                let id = embd_inp[n_consumed];
                embd.push(id);
                history.pop_front();
                history.push_back(id);
                n_consumed += 1;
                if embd.len() >= n_batch {
                    break;
                }
            }
        }

        for &id in &embd {
            output.extend_from_slice(&engine.token_to_piece(id));
        }

        if let Some(word) = find_antiprompt(&*engine, &history, &opts.antiprompt) {
            finish_reason = FinishReason::StopWord(word);
            break;
        }

        if embd.last() == Some(&eos) {
            finish_reason = FinishReason::Stop;
            break;
        }
    }

    // A stop word ends the session before the final cache write.
    let stopped_on_word = matches!(finish_reason, FinishReason::StopWord(_));
    if let Some(path) = &path_session {
        if opts.prompt_cache_all && !opts.prompt_cache_ro && !stopped_on_word {
            debug!(path = %path.display(), "saving final output to session file");
            save_session(engine, path, &session_tokens);
        }
    }

    if debug {
        let t = engine.timings();
        info!(
            prompt_ms = t.prompt_ms,
            prompt_tokens = t.prompt_tokens,
            eval_ms = t.eval_ms,
            eval_tokens = t.eval_tokens,
            "timings"
        );
        engine.reset_timings();
    }

    Ok(Prediction {
        bytes: output,
        finish_reason,
        prompt_tokens: embd_inp.len(),
        completion_tokens,
    })
}

fn save_session<E: Engine + ?Sized>(engine: &mut E, path: &Path, tokens: &[Token]) {
    if let Err(e) = engine.save_session(path, tokens) {
        warn!(path = %path.display(), "failed to save session: {e}");
    }
}

/// First antiprompt found within its own length (plus two bytes) of the
/// end of the rendered history.
fn find_antiprompt<E: Engine + ?Sized>(
    engine: &E,
    history: &VecDeque<Token>,
    antiprompts: &[String],
) -> Option<String> {
    let window = antiprompts.iter().map(|a| a.len() + 2).max()?;

    // Only the tail can match, so render backwards until it is covered.
    let mut pieces = Vec::new();
    let mut rendered = 0;
    for &id in history.iter().rev() {
        let piece = engine.token_to_piece(id);
        rendered += piece.len();
        pieces.push(piece);
        if rendered >= window {
            break;
        }
    }
    let tail: Vec<u8> = pieces.into_iter().rev().flatten().collect();

    antiprompts
        .iter()
        .filter(|a| !a.is_empty())
        .find(|a| {
            let start = tail.len().saturating_sub(a.len() + 2);
            tail[start..]
                .windows(a.len())
                .any(|w| w == a.as_bytes())
        })
        .cloned()
}
