//! BM25 lexical index over an in-memory corpus snapshot.
//!
//! The index is built once from the full corpus and never updated in
//! place; any store mutation requires building a new [`LexicalIndex`].
//!
//! # Tokenization
//!
//! Lowercased runs of alphanumerics, `_` and `'`. Everything else
//! separates tokens.
//!
//! # Scoring
//!
//! Okapi BM25 with `k1 = 1.5`, `b = 0.75`. Terms whose IDF would be negative
//! (present in more than half the corpus) are floored to
//! `epsilon × average_idf` with `epsilon = 0.25`.
//!
//! # Tenant filtering
//!
//! Applied after scoring: the globally ranked list is walked in order and
//! the first `k` chunks admitted by the [`TenantScope`] are kept. A filtered
//! search may return fewer than `k` hits even when more admissible chunks
//! exist further down the ranking.

use std::collections::HashMap;

use crate::error::{Result, RetrievalError};
use crate::models::{Chunk, TenantScope};

/// BM25 tuning constants.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    pub epsilon: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

/// Split text into lowercase word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == '\'' {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Okapi BM25 model over pre-tokenized documents.
#[derive(Debug, Clone)]
pub struct Bm25 {
    params: Bm25Params,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
}

impl Bm25 {
    pub fn new(corpus: &[Vec<String>], params: Bm25Params) -> Self {
        let mut term_freqs = Vec::with_capacity(corpus.len());
        let mut doc_lens = Vec::with_capacity(corpus.len());
        let mut doc_freq: HashMap<String, u32> = HashMap::new();
        let mut total_len = 0usize;

        for doc in corpus {
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in doc {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            total_len += doc.len();
            doc_lens.push(doc.len());
            term_freqs.push(freqs);
        }

        let n = corpus.len() as f64;
        let avgdl = if corpus.is_empty() {
            0.0
        } else {
            total_len as f64 / n
        };

        let mut idf = HashMap::with_capacity(doc_freq.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (term, freq) in doc_freq {
            let freq = freq as f64;
            let value = (n - freq + 0.5).ln() - (freq + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term, value);
        }
        if !idf.is_empty() {
            let floor = params.epsilon * (idf_sum / idf.len() as f64);
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            params,
            term_freqs,
            doc_lens,
            avgdl,
            idf,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// Whether document `index` contains any of the query tokens.
    pub fn overlaps(&self, index: usize, query: &[String]) -> bool {
        self.term_freqs
            .get(index)
            .is_some_and(|freqs| query.iter().any(|t| freqs.contains_key(t)))
    }

    /// Score every document against the query tokens, in corpus order.
    pub fn scores(&self, query: &[String]) -> Vec<f64> {
        let mut scores = vec![0.0; self.len()];
        if self.avgdl <= 0.0 {
            return scores;
        }
        let Bm25Params { k1, b, .. } = self.params;
        for term in query {
            let idf = match self.idf.get(term) {
                Some(v) => *v,
                None => continue,
            };
            for (i, freqs) in self.term_freqs.iter().enumerate() {
                let tf = freqs.get(term).copied().unwrap_or(0) as f64;
                if tf == 0.0 {
                    continue;
                }
                let norm = 1.0 - b + b * self.doc_lens[i] as f64 / self.avgdl;
                scores[i] += idf * (tf * (k1 + 1.0)) / (tf + k1 * norm);
            }
        }
        scores
    }
}

/// A ranked lexical match: position in the corpus snapshot plus score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalHit {
    pub index: usize,
    pub score: f64,
}

/// BM25 index together with the corpus snapshot it was built from.
#[derive(Debug, Clone)]
pub struct LexicalIndex {
    corpus: Vec<Chunk>,
    positions: HashMap<String, usize>,
    bm25: Bm25,
}

impl LexicalIndex {
    /// Build over `corpus`. Fails with `IndexUnavailable` for an empty corpus.
    pub fn build(corpus: Vec<Chunk>) -> Result<Self> {
        Self::build_with(corpus, Bm25Params::default())
    }

    pub fn build_with(corpus: Vec<Chunk>, params: Bm25Params) -> Result<Self> {
        if corpus.is_empty() {
            return Err(RetrievalError::IndexUnavailable(
                "corpus is empty".to_string(),
            ));
        }
        let tokenized: Vec<Vec<String>> = corpus.iter().map(|c| tokenize(&c.text)).collect();
        let bm25 = Bm25::new(&tokenized, params);
        let positions = corpus
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        Ok(Self {
            corpus,
            positions,
            bm25,
        })
    }

    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }

    pub fn corpus(&self) -> &[Chunk] {
        &self.corpus
    }

    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.corpus.get(index)
    }

    /// Look up a chunk in the snapshot by id.
    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.positions.get(id).map(|&i| &self.corpus[i])
    }

    /// Top-`k` chunks by descending BM25 score.
    ///
    /// Only chunks sharing at least one query term are returned, even when
    /// the IDF of that term works out to zero. Ties keep corpus order.
    pub fn search(&self, query: &str, k: usize, tenant: Option<&TenantScope>) -> Vec<LexicalHit> {
        let tokens = tokenize(query);
        if tokens.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<LexicalHit> = self
            .bm25
            .scores(&tokens)
            .into_iter()
            .enumerate()
            .map(|(index, score)| LexicalHit { index, score })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        ranked
            .into_iter()
            .filter(|hit| self.bm25.overlaps(hit.index, &tokens))
            .filter(|hit| tenant.map_or(true, |t| t.allows(&self.corpus[hit.index])))
            .take(k)
            .collect()
    }
}
