#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;

use llama_binding::{BindingError, Engine, PredictOptions, Result, Timings, Token};

pub const BOS: Token = 1;
pub const EOS: Token = 2;
pub const NL: Token = 3;

/// Token ids are indexes into this table.
const VOCAB: &[&str] = &[
    "", "", "", "\n", "Hello", " world", " User", ":", " foo", " bar", " baz",
];

pub fn id(piece: &str) -> Token {
    VOCAB
        .iter()
        .skip(4)
        .position(|p| *p == piece)
        .map(|i| (i + 4) as Token)
        .unwrap_or_else(|| panic!("unknown piece {piece:?}"))
}

/// In-memory engine whose next-token logits are a one-hot lookup keyed by
/// the last evaluated token.
pub struct MockEngine {
    pub n_ctx: usize,
    next: HashMap<Token, Token>,
    logits: Vec<f32>,
    /// Simulated KV cache: the token at each position.
    pub kv: Vec<Token>,
    /// Every `eval` call as `(tokens, n_past)`.
    pub evals: Vec<(Vec<Token>, usize)>,
    pub saves: Vec<Vec<Token>>,
    pub timing_resets: usize,
}

impl MockEngine {
    /// Without transitions every token is followed by EOS.
    pub fn new(n_ctx: usize) -> Self {
        Self {
            n_ctx,
            next: HashMap::new(),
            logits: vec![0.0; VOCAB.len()],
            kv: Vec::new(),
            evals: Vec::new(),
            saves: Vec::new(),
            timing_resets: 0,
        }
    }

    pub fn then(mut self, after: &str, next: &str) -> Self {
        self.next.insert(id(after), id(next));
        self
    }

    pub fn then_eos(mut self, after: &str) -> Self {
        self.next.insert(id(after), EOS);
        self
    }

    fn set_logits_after(&mut self, last: Token) {
        self.logits.iter_mut().for_each(|l| *l = 0.0);
        let next = self.next.get(&last).copied().unwrap_or(EOS);
        self.logits[next as usize] = 10.0;
    }

    /// Non-warm-up evaluations.
    pub fn work_evals(&self) -> Vec<(Vec<Token>, usize)> {
        self.evals
            .iter()
            .filter(|(t, p)| !(t.as_slice() == [BOS] && *p == 0))
            .cloned()
            .collect()
    }
}

impl Engine for MockEngine {
    fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    fn token_bos(&self) -> Token {
        BOS
    }

    fn token_eos(&self) -> Token {
        EOS
    }

    fn token_nl(&self) -> Token {
        NL
    }

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>> {
        let mut out = Vec::new();
        if add_bos {
            out.push(BOS);
        }
        let mut rest = text;
        while !rest.is_empty() {
            let (tok, len) = VOCAB
                .iter()
                .enumerate()
                .skip(3)
                .filter(|(_, p)| rest.starts_with(**p))
                .max_by_key(|(_, p)| p.len())
                .map(|(i, p)| (i as Token, p.len()))
                .ok_or_else(|| BindingError::Eval(format!("cannot tokenize {rest:?}")))?;
            out.push(tok);
            rest = &rest[len..];
        }
        Ok(out)
    }

    fn token_to_piece(&self, token: Token) -> Vec<u8> {
        VOCAB
            .get(token as usize)
            .map(|p| p.as_bytes().to_vec())
            .unwrap_or_default()
    }

    fn eval(&mut self, tokens: &[Token], n_past: usize, _n_threads: i32) -> Result<()> {
        self.evals.push((tokens.to_vec(), n_past));
        if n_past > self.kv.len() {
            return Err(BindingError::Eval(format!(
                "gap in cache: n_past {n_past} > {}",
                self.kv.len()
            )));
        }
        if n_past + tokens.len() > self.n_ctx {
            return Err(BindingError::Eval("context window exceeded".into()));
        }
        self.kv.truncate(n_past);
        self.kv.extend_from_slice(tokens);
        if let Some(&last) = tokens.last() {
            self.set_logits_after(last);
        }
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }

    fn load_session(&mut self, path: &Path, capacity: usize) -> Result<Vec<Token>> {
        let data = std::fs::read_to_string(path).map_err(|e| BindingError::Eval(e.to_string()))?;
        let tokens: Vec<Token> = serde_json::from_str(&data)?;
        if tokens.len() > capacity {
            return Err(BindingError::Eval("session larger than context".into()));
        }
        self.kv = tokens.clone();
        if let Some(&last) = tokens.last() {
            self.set_logits_after(last);
        }
        Ok(tokens)
    }

    fn save_session(&mut self, path: &Path, tokens: &[Token]) -> Result<()> {
        self.saves.push(tokens.to_vec());
        let data = serde_json::to_string(tokens)?;
        std::fs::write(path, data).map_err(|e| BindingError::Eval(e.to_string()))
    }

    fn timings(&self) -> Timings {
        Timings {
            prompt_tokens: self.evals.len() as i32,
            ..Default::default()
        }
    }

    fn reset_timings(&mut self) {
        self.timing_resets += 1;
    }
}

/// Deterministic options: greedy sampling, no penalties.
pub fn greedy(prompt: &str) -> PredictOptions {
    PredictOptions {
        prompt: prompt.into(),
        temp: 0.0,
        repeat_penalty: 1.0,
        threads: 1,
        ..Default::default()
    }
}
