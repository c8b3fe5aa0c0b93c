//! Next-token selection over the logits of the last evaluated position.
//!
//! [`Candidates`] carries the kernels (penalties, truncation, temperature,
//! mirostat) with llama.cpp's classic candidate-array semantics;
//! [`Sampler`] strings them together the way one session configures them.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;

use crate::engine::Token;
use crate::options::PredictOptions;

/// Window of most probable tokens mirostat v1 fits its Zipf exponent on.
const MIROSTAT_M: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenData {
    pub id: Token,
    pub logit: f32,
    pub p: f32,
}

/// Candidate tokens for one sampling step.
#[derive(Debug, Clone)]
pub struct Candidates {
    data: Vec<TokenData>,
    sorted: bool,
}

impl Candidates {
    pub fn from_logits(logits: &[f32]) -> Self {
        let data = logits
            .iter()
            .enumerate()
            .map(|(id, &logit)| TokenData {
                id: id as Token,
                logit,
                p: 0.0,
            })
            .collect();
        Self {
            data,
            sorted: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[TokenData] {
        &self.data
    }

    pub fn ids(&self) -> Vec<Token> {
        self.data.iter().map(|c| c.id).collect()
    }

    pub fn logit_of(&self, id: Token) -> Option<f32> {
        self.data.iter().find(|c| c.id == id).map(|c| c.logit)
    }

    pub fn set_logit(&mut self, id: Token, logit: f32) {
        if let Some(c) = self.data.iter_mut().find(|c| c.id == id) {
            c.logit = logit;
            self.sorted = false;
        }
    }

    fn sort_desc(&mut self) {
        if !self.sorted {
            self.data
                .sort_by(|a, b| b.logit.partial_cmp(&a.logit).unwrap_or(Ordering::Equal));
            self.sorted = true;
        }
    }

    /// Sort by logit and fill in normalized probabilities.
    pub fn softmax(&mut self) {
        if self.data.is_empty() {
            return;
        }
        self.sort_desc();
        let max = self.data[0].logit;
        let mut sum = 0.0f32;
        for c in &mut self.data {
            c.p = (c.logit - max).exp();
            sum += c.p;
        }
        for c in &mut self.data {
            c.p /= sum;
        }
    }

    //  Penalties

    /// Push down every candidate seen in `last_tokens`.
    pub fn repetition_penalty(&mut self, last_tokens: &[Token], penalty: f32) {
        if last_tokens.is_empty() || penalty == 1.0 {
            return;
        }
        let seen: HashSet<Token> = last_tokens.iter().copied().collect();
        for c in self.data.iter_mut().filter(|c| seen.contains(&c.id)) {
            if c.logit <= 0.0 {
                c.logit *= penalty;
            } else {
                c.logit /= penalty;
            }
        }
        self.sorted = false;
    }

    pub fn frequency_and_presence_penalties(
        &mut self,
        last_tokens: &[Token],
        alpha_frequency: f32,
        alpha_presence: f32,
    ) {
        if last_tokens.is_empty() || (alpha_frequency == 0.0 && alpha_presence == 0.0) {
            return;
        }
        let mut counts: HashMap<Token, u32> = HashMap::new();
        for &t in last_tokens {
            *counts.entry(t).or_default() += 1;
        }
        for c in &mut self.data {
            let Some(&count) = counts.get(&c.id) else {
                continue;
            };
            c.logit -= count as f32 * alpha_frequency + alpha_presence;
        }
        self.sorted = false;
    }

    //  Truncation

    pub fn top_k(&mut self, k: i32, min_keep: usize) {
        let k = (k.max(0) as usize).max(min_keep).min(self.data.len());
        self.sort_desc();
        self.data.truncate(k);
    }

    /// Nucleus sampling: keep the smallest prefix whose mass reaches `p`.
    pub fn top_p(&mut self, p: f32, min_keep: usize) {
        if p >= 1.0 {
            return;
        }
        self.softmax();
        let mut cum = 0.0;
        let mut last_idx = self.data.len();
        for (i, c) in self.data.iter().enumerate() {
            cum += c.p;
            if cum >= p && i + 1 >= min_keep {
                last_idx = i + 1;
                break;
            }
        }
        self.data.truncate(last_idx);
    }

    /// Tail-free sampling: cut where the curvature of the sorted
    /// distribution has accumulated `z` of its total mass.
    pub fn tail_free(&mut self, z: f32, min_keep: usize) {
        if z >= 1.0 || self.data.len() <= 2 {
            return;
        }
        self.softmax();

        let first: Vec<f32> = self.data.windows(2).map(|w| w[0].p - w[1].p).collect();
        let mut second: Vec<f32> = first.windows(2).map(|w| (w[0] - w[1]).abs()).collect();

        let sum: f32 = second.iter().sum();
        if sum > 1e-6 {
            second.iter_mut().for_each(|v| *v /= sum);
        } else {
            let uniform = 1.0 / second.len() as f32;
            second.iter_mut().for_each(|v| *v = uniform);
        }

        let mut cum = 0.0;
        let mut last_idx = self.data.len();
        for (i, v) in second.iter().enumerate() {
            cum += *v;
            if cum > z && i >= min_keep {
                last_idx = i;
                break;
            }
        }
        self.data.truncate(last_idx);
    }

    /// Locally typical sampling: prefer tokens whose surprise is close to
    /// the distribution's entropy.
    pub fn typical(&mut self, p: f32, min_keep: usize) {
        if p >= 1.0 {
            return;
        }
        self.softmax();

        let entropy: f32 = self
            .data
            .iter()
            .filter(|c| c.p > 0.0)
            .map(|c| -c.p * c.p.ln())
            .sum();

        let mut order: Vec<(usize, f32)> = self
            .data
            .iter()
            .enumerate()
            .map(|(i, c)| (i, (-c.p.ln() - entropy).abs()))
            .collect();
        order.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        let mut cum = 0.0;
        let mut last_idx = order.len();
        for (i, &(idx, _)) in order.iter().enumerate() {
            cum += self.data[idx].p;
            if cum > p && i + 1 >= min_keep {
                last_idx = i + 1;
                break;
            }
        }

        self.data = order[..last_idx]
            .iter()
            .map(|&(idx, _)| self.data[idx])
            .collect();
        self.sorted = false;
    }

    pub fn temperature(&mut self, temp: f32) {
        for c in &mut self.data {
            c.logit /= temp;
        }
    }

    //  Selection

    pub fn greedy(&self) -> Token {
        self.data
            .iter()
            .fold(None::<&TokenData>, |best, c| match best {
                Some(b) if b.logit >= c.logit => Some(b),
                _ => Some(c),
            })
            .map(|c| c.id)
            .unwrap_or(0)
    }

    /// Draw a token in proportion to its probability.
    pub fn sample(&mut self, rng: &mut StdRng) -> Token {
        self.softmax();
        match WeightedIndex::new(self.data.iter().map(|c| c.p)) {
            Ok(dist) => self.data[dist.sample(rng)].id,
            // Degenerate distribution (all zero / NaN): take the top token.
            Err(_) => self.data.first().map(|c| c.id).unwrap_or(0),
        }
    }

    fn surprise_of(&self, id: Token) -> f32 {
        self.data
            .iter()
            .find(|c| c.id == id)
            .map(|c| -c.p.log2())
            .unwrap_or(0.0)
    }

    /// Mirostat: pick `k` so the expected surprise tracks `tau`.
    pub fn mirostat(
        &mut self,
        rng: &mut StdRng,
        n_vocab: usize,
        tau: f32,
        eta: f32,
        m: usize,
        mu: &mut f32,
    ) -> Token {
        let n = n_vocab as f32;
        self.softmax();

        let mut sum_ti_bi = 0.0f32;
        let mut sum_ti_sq = 0.0f32;
        let fit = m.saturating_sub(1).min(self.data.len().saturating_sub(1));
        for i in 0..fit {
            let t_i = ((i + 2) as f32 / (i + 1) as f32).ln();
            let b_i = (self.data[i].p / self.data[i + 1].p).ln();
            sum_ti_bi += t_i * b_i;
            sum_ti_sq += t_i * t_i;
        }
        let s_hat = sum_ti_bi / sum_ti_sq;

        let epsilon_hat = s_hat - 1.0;
        let k = ((epsilon_hat * 2f32.powf(*mu)) / (1.0 - n.powf(-epsilon_hat))).powf(1.0 / s_hat);

        self.top_k(k as i32, 1);
        let x = self.sample(rng);

        let e = self.surprise_of(x) - tau;
        *mu -= eta * e;
        x
    }

    /// Mirostat v2: drop tokens more surprising than `mu`, then draw.
    pub fn mirostat_v2(&mut self, rng: &mut StdRng, tau: f32, eta: f32, mu: &mut f32) -> Token {
        self.softmax();

        let keep = self
            .data
            .iter()
            .position(|c| -c.p.log2() > *mu)
            .unwrap_or(self.data.len())
            .max(1);
        self.data.truncate(keep);

        let x = self.sample(rng);
        let e = self.surprise_of(x) - tau;
        *mu -= eta * e;
        x
    }
}

//  Sampler

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Greedy,
    Mirostat,
    MirostatV2,
    Classic,
}

/// Per-session sampling state: configuration, RNG and mirostat's `mu`.
pub struct Sampler {
    opts: PredictOptions,
    mode: Mode,
    rng: StdRng,
    mu: f32,
}

impl Sampler {
    pub fn new(opts: &PredictOptions, seed: u64) -> Self {
        let mode = if opts.temp <= 0.0 {
            Mode::Greedy
        } else {
            match opts.mirostat {
                1 => Mode::Mirostat,
                2 => Mode::MirostatV2,
                _ => Mode::Classic,
            }
        };
        Self {
            opts: opts.clone(),
            mode,
            rng: StdRng::seed_from_u64(seed),
            mu: 2.0 * opts.mirostat_tau,
        }
    }

    pub fn mu(&self) -> f32 {
        self.mu
    }

    /// Choose the next token.
    ///
    /// `history` is the session's token window (oldest first), `eos` and
    /// `nl` the vocabulary's end-of-sequence and newline tokens.
    pub fn sample(
        &mut self,
        logits: &[f32],
        history: &[Token],
        n_ctx: usize,
        eos: Token,
        nl: Token,
    ) -> Token {
        let mut logits = logits.to_vec();
        for (&id, &bias) in &self.opts.logit_bias {
            if let Some(l) = usize::try_from(id).ok().and_then(|i| logits.get_mut(i)) {
                *l += bias;
            }
        }
        if self.opts.ignore_eos {
            if let Some(l) = usize::try_from(eos).ok().and_then(|i| logits.get_mut(i)) {
                *l = f32::NEG_INFINITY;
            }
        }

        let n_vocab = logits.len();
        let mut cands = Candidates::from_logits(&logits);

        let nl_logit = cands.logit_of(nl);
        let repeat_last_n = if self.opts.repeat_last_n < 0 {
            n_ctx
        } else {
            self.opts.repeat_last_n as usize
        };
        let last_n = history.len().min(repeat_last_n).min(n_ctx);
        let recent = &history[history.len() - last_n..];
        cands.repetition_penalty(recent, self.opts.repeat_penalty);
        cands.frequency_and_presence_penalties(
            recent,
            self.opts.frequency_penalty,
            self.opts.presence_penalty,
        );
        if !self.opts.penalize_nl {
            if let Some(l) = nl_logit {
                cands.set_logit(nl, l);
            }
        }

        let opts = &self.opts;
        match self.mode {
            Mode::Greedy => cands.greedy(),
            Mode::Mirostat => {
                cands.temperature(opts.temp);
                cands.mirostat(
                    &mut self.rng,
                    n_vocab,
                    opts.mirostat_tau,
                    opts.mirostat_eta,
                    MIROSTAT_M,
                    &mut self.mu,
                )
            }
            Mode::MirostatV2 => {
                cands.temperature(opts.temp);
                cands.mirostat_v2(
                    &mut self.rng,
                    opts.mirostat_tau,
                    opts.mirostat_eta,
                    &mut self.mu,
                )
            }
            Mode::Classic => {
                let top_k = if opts.top_k <= 0 {
                    n_vocab as i32
                } else {
                    opts.top_k
                };
                cands.top_k(top_k, 1);
                cands.tail_free(opts.tfs_z, 1);
                cands.typical(opts.typical_p, 1);
                cands.top_p(opts.top_p, 1);
                cands.temperature(opts.temp);
                cands.sample(&mut self.rng)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probs(c: &Candidates) -> Vec<f32> {
        c.as_slice().iter().map(|t| t.p).collect()
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_softmax_sorts_and_normalizes() {
        let mut c = Candidates::from_logits(&[1.0, 3.0, 2.0]);
        c.softmax();
        assert_eq!(c.ids(), vec![1, 2, 0]);
        let total: f32 = probs(&c).iter().sum();
        assert!(approx(total, 1.0));
        assert!(c.as_slice()[0].p > c.as_slice()[1].p);
    }

    #[test]
    fn test_top_k_keeps_highest() {
        let mut c = Candidates::from_logits(&[0.1, 0.4, 0.3, 0.2]);
        c.top_k(2, 1);
        assert_eq!(c.ids(), vec![1, 2]);
    }

    #[test]
    fn test_top_k_respects_min_keep() {
        let mut c = Candidates::from_logits(&[0.1, 0.4, 0.3, 0.2]);
        c.top_k(0, 1);
        assert_eq!(c.len(), 1);
        let mut c = Candidates::from_logits(&[0.1, 0.4]);
        c.top_k(10, 1);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_top_p_truncates_at_mass() {
        // p = [0.5, 0.25, 0.125, 0.125]
        let logits = [0.5f32.ln(), 0.25f32.ln(), 0.125f32.ln(), 0.125f32.ln()];
        let mut c = Candidates::from_logits(&logits);
        c.top_p(0.7, 1);
        assert_eq!(c.ids(), vec![0, 1]);

        let mut c = Candidates::from_logits(&logits);
        c.top_p(1.0, 1);
        assert_eq!(c.len(), 4);
    }

    #[test]
    fn test_tail_free_cuts_flat_tail() {
        // Sharp head, flat tail: curvature concentrates at the head.
        let p = [0.6f32, 0.1, 0.1, 0.1, 0.1];
        let logits: Vec<f32> = p.iter().map(|v| v.ln()).collect();
        let mut c = Candidates::from_logits(&logits);
        c.tail_free(0.5, 1);
        assert_eq!(c.len(), 1);
        assert_eq!(c.ids(), vec![0]);
    }

    #[test]
    fn test_tail_free_disabled_at_one() {
        let mut c = Candidates::from_logits(&[1.0, 2.0, 3.0, 4.0]);
        c.tail_free(1.0, 1);
        assert_eq!(c.len(), 4);
    }

    #[test]
    fn test_typical_keeps_tokens_near_entropy() {
        let p = [0.4f32, 0.3, 0.2, 0.1];
        let logits: Vec<f32> = p.iter().map(|v| v.ln()).collect();
        let mut c = Candidates::from_logits(&logits);
        c.typical(0.6, 1);
        assert_eq!(c.len(), 3);
        // Token 3 is the most atypical and must go first.
        assert!(!c.ids().contains(&3));
    }

    #[test]
    fn test_typical_tolerates_masked_tokens() {
        let mut c = Candidates::from_logits(&[1.0, f32::NEG_INFINITY, 0.5]);
        c.typical(0.9, 1);
        assert!(!c.is_empty());
        assert!(!c.ids().contains(&1));
    }

    #[test]
    fn test_repetition_penalty_direction() {
        let mut c = Candidates::from_logits(&[2.0, -2.0, 1.0]);
        c.repetition_penalty(&[0, 1], 2.0);
        assert_eq!(c.logit_of(0), Some(1.0));
        assert_eq!(c.logit_of(1), Some(-4.0));
        assert_eq!(c.logit_of(2), Some(1.0));
    }

    #[test]
    fn test_frequency_and_presence() {
        let mut c = Candidates::from_logits(&[1.0, 1.0, 1.0]);
        c.frequency_and_presence_penalties(&[0, 0, 1], 0.5, 0.25);
        assert_eq!(c.logit_of(0), Some(1.0 - 1.0 - 0.25));
        assert_eq!(c.logit_of(1), Some(1.0 - 0.5 - 0.25));
        assert_eq!(c.logit_of(2), Some(1.0));
    }

    #[test]
    fn test_greedy_picks_max() {
        let c = Candidates::from_logits(&[-1.0, -5.0, -0.5, -3.0]);
        assert_eq!(c.greedy(), 2);
    }

    #[test]
    fn test_sample_is_seeded() {
        let logits = [0.0, 0.1, 0.2, 0.3, 0.4];
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        let xs: Vec<Token> = (0..8)
            .map(|_| Candidates::from_logits(&logits).sample(&mut a))
            .collect();
        let ys: Vec<Token> = (0..8)
            .map(|_| Candidates::from_logits(&logits).sample(&mut b))
            .collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_sample_never_picks_zero_probability() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..32 {
            let mut c = Candidates::from_logits(&[0.0, f32::NEG_INFINITY, 0.0]);
            assert_ne!(c.sample(&mut rng), 1);
        }
    }

    #[test]
    fn test_mirostat_v2_updates_mu() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut c = Candidates::from_logits(&[5.0, 1.0, 0.5, 0.1]);
        let mut mu = 10.0;
        let tok = c.mirostat_v2(&mut rng, 5.0, 0.1, &mut mu);
        assert!((0..4).contains(&tok));
        assert_ne!(mu, 10.0);
    }

    #[test]
    fn test_mirostat_v2_keeps_at_least_one() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut c = Candidates::from_logits(&[1.0, 1.0, 1.0, 1.0]);
        let mut mu = 0.0;
        c.mirostat_v2(&mut rng, 5.0, 0.1, &mut mu);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_mirostat_returns_vocab_token() {
        let logits: Vec<f32> = (0..50).map(|i| -(i as f32) * 0.3).collect();
        let mut rng = StdRng::seed_from_u64(3);
        let mut c = Candidates::from_logits(&logits);
        let mut mu = 10.0;
        let tok = c.mirostat(&mut rng, 50, 5.0, 0.1, MIROSTAT_M, &mut mu);
        assert!((0..50).contains(&tok));
        assert!(mu.is_finite());
    }

    #[test]
    fn test_sampler_greedy_when_temp_zero() {
        let opts = PredictOptions {
            temp: 0.0,
            repeat_penalty: 1.0,
            ..Default::default()
        };
        let mut s = Sampler::new(&opts, 0);
        assert_eq!(s.sample(&[0.1, 0.9, 0.3], &[], 16, 2, 0), 1);
    }

    #[test]
    fn test_sampler_ignore_eos_masks_eos() {
        let opts = PredictOptions {
            temp: 0.0,
            ignore_eos: true,
            ..Default::default()
        };
        let mut s = Sampler::new(&opts, 0);
        assert_eq!(s.sample(&[0.1, 0.2, 9.0], &[], 16, 2, 0), 1);
    }

    #[test]
    fn test_sampler_logit_bias() {
        let opts = PredictOptions {
            temp: 0.0,
            logit_bias: HashMap::from([(0, 5.0)]),
            ..Default::default()
        };
        let mut s = Sampler::new(&opts, 0);
        assert_eq!(s.sample(&[1.0, 2.0, 3.0], &[], 16, 2, 1), 0);
    }

    #[test]
    fn test_sampler_penalize_nl_toggle() {
        // Token 1 is newline and was just generated.
        let logits = [1.0, 1.5, 0.0];
        let history = [1, 1];
        let penalized = PredictOptions {
            temp: 0.0,
            repeat_penalty: 2.0,
            ..Default::default()
        };
        let mut s = Sampler::new(&penalized, 0);
        assert_eq!(s.sample(&logits, &history, 16, 2, 1), 0);

        let exempt = PredictOptions {
            penalize_nl: false,
            ..penalized
        };
        let mut s = Sampler::new(&exempt, 0);
        assert_eq!(s.sample(&logits, &history, 16, 2, 1), 1);
    }

    #[test]
    fn test_sampler_repeat_window() {
        // Only the last token is inside the window, so token 0 is not penalized.
        let opts = PredictOptions {
            temp: 0.0,
            repeat_penalty: 10.0,
            repeat_last_n: 1,
            ..Default::default()
        };
        let mut s = Sampler::new(&opts, 0);
        assert_eq!(s.sample(&[2.0, 1.9, 1.0], &[0, 1], 16, 2, 2), 0);
    }

    #[test]
    fn test_sampler_mirostat_state_starts_at_two_tau() {
        let opts = PredictOptions {
            mirostat: 2,
            mirostat_tau: 3.0,
            ..Default::default()
        };
        let s = Sampler::new(&opts, 0);
        assert_eq!(s.mu(), 6.0);
    }
}
