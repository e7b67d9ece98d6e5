//! Unigram + bigram TF-IDF with document-frequency pruning.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use nalgebra::DMatrix;
use regex::Regex;

use crate::preprocess::is_stop_word;
use crate::VectorizeError;

fn token_re() -> &'static Regex {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    TOKEN_RE.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("valid token regex"))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TfidfConfig {
    /// Terms in fewer documents than this are dropped.
    pub min_df: usize,
    /// Terms in more than this fraction of documents are dropped.
    pub max_df: f64,
}

impl Default for TfidfConfig {
    fn default() -> Self {
        Self { min_df: 3, max_df: 0.85 }
    }
}

/// Row-major sparse matrix; each row holds `(column, value)` sorted by column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseMatrix {
    pub rows: Vec<Vec<(usize, f64)>>,
    pub n_cols: usize,
}

impl SparseMatrix {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// `X · M` for a dense `n_cols × k` matrix.
    pub fn mul_dense(&self, m: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(self.n_rows(), m.ncols());
        for (r, row) in self.rows.iter().enumerate() {
            for &(j, v) in row {
                for c in 0..m.ncols() {
                    out[(r, c)] += v * m[(j, c)];
                }
            }
        }
        out
    }

    /// `Xᵀ · M` for a dense `n_rows × k` matrix.
    pub fn transpose_mul_dense(&self, m: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(self.n_cols, m.ncols());
        for (r, row) in self.rows.iter().enumerate() {
            for &(j, v) in row {
                for c in 0..m.ncols() {
                    out[(j, c)] += v * m[(r, c)];
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TfidfModel {
    pub vocabulary: Vec<String>,
    pub idf: Vec<f64>,
}

fn analyze(doc: &str) -> HashMap<String, usize> {
    let tokens: Vec<&str> = token_re()
        .find_iter(doc)
        .map(|m| m.as_str())
        .filter(|t| !is_stop_word(t))
        .collect();

    let mut counts = HashMap::new();
    for token in &tokens {
        *counts.entry((*token).to_string()).or_insert(0) += 1;
    }
    for pair in tokens.windows(2) {
        *counts.entry(format!("{} {}", pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}

impl TfidfModel {
    /// Learns vocabulary and idf from `docs` and returns their weighted rows.
    pub fn fit_transform(docs: &[String], config: TfidfConfig) -> Result<(Self, SparseMatrix), VectorizeError> {
        let n_docs = docs.len();
        if n_docs == 0 {
            return Err(VectorizeError::EmptyCorpus);
        }

        let counts: Vec<HashMap<String, usize>> = docs.iter().map(|d| analyze(d)).collect();

        let mut df: BTreeMap<&str, usize> = BTreeMap::new();
        for doc in &counts {
            for term in doc.keys() {
                *df.entry(term.as_str()).or_insert(0) += 1;
            }
        }

        let max_doc_count = config.max_df * n_docs as f64;
        if max_doc_count < config.min_df as f64 {
            return Err(VectorizeError::InvalidDfBounds {
                min_df: config.min_df,
                max_df: config.max_df,
                n_docs,
            });
        }

        let mut vocabulary = Vec::new();
        let mut idf = Vec::new();
        let mut column_of: HashMap<&str, usize> = HashMap::new();
        for (term, &freq) in &df {
            if freq < config.min_df || freq as f64 > max_doc_count {
                continue;
            }
            column_of.insert(*term, vocabulary.len());
            vocabulary.push((*term).to_string());
            idf.push(((1.0 + n_docs as f64) / (1.0 + freq as f64)).ln() + 1.0);
        }
        if vocabulary.is_empty() {
            return Err(VectorizeError::EmptyVocabulary {
                min_df: config.min_df,
                max_df: config.max_df,
            });
        }

        let rows = counts
            .iter()
            .map(|doc| {
                let mut row: Vec<(usize, f64)> = doc
                    .iter()
                    .filter_map(|(term, &tf)| {
                        let col = *column_of.get(term.as_str())?;
                        Some((col, (1.0 + (tf as f64).ln()) * idf[col]))
                    })
                    .collect();
                row.sort_by_key(|&(col, _)| col);
                let norm = row.iter().map(|&(_, v)| v * v).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for entry in &mut row {
                        entry.1 /= norm;
                    }
                }
                row
            })
            .collect();

        let matrix = SparseMatrix {
            rows,
            n_cols: vocabulary.len(),
        };
        Ok((Self { vocabulary, idf }, matrix))
    }
}
