//! Sparse TF-IDF vectors for short texts.
//!
//! Fits a vocabulary over one small corpus (the query plus candidate
//! sentences) and returns one L2-normalized sparse vector per document.
//!
//! Tokenization: lowercase, `\w\w+` tokens, English stop words removed, then
//! unigrams plus bigrams of the remaining tokens. Terms appearing in more than
//! `max_df` of the documents are dropped. IDF is smoothed:
//! `ln((1 + n) / (1 + df)) + 1`.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use regex::Regex;

/// Sparse vector as `(term index, weight)` pairs sorted by term index.
pub type SparseVector = Vec<(usize, f64)>;

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "across", "after", "afterwards", "again", "against", "all",
    "almost", "alone", "along", "already", "also", "although", "always", "am", "among",
    "amongst", "amoungst", "amount", "an", "and", "another", "any", "anyhow", "anyone",
    "anything", "anyway", "anywhere", "are", "around", "as", "at", "back", "be", "became",
    "because", "become", "becomes", "becoming", "been", "before", "beforehand", "behind",
    "being", "below", "beside", "besides", "between", "beyond", "bill", "both", "bottom",
    "but", "by", "call", "can", "cannot", "cant", "co", "con", "could", "couldnt", "cry",
    "de", "describe", "detail", "do", "done", "down", "due", "during", "each", "eg",
    "eight", "either", "eleven", "else", "elsewhere", "empty", "enough", "etc", "even",
    "ever", "every", "everyone", "everything", "everywhere", "except", "few", "fifteen",
    "fifty", "fill", "find", "fire", "first", "five", "for", "former", "formerly", "forty",
    "found", "four", "from", "front", "full", "further", "get", "give", "go", "had", "has",
    "hasnt", "have", "he", "hence", "her", "here", "hereafter", "hereby", "herein",
    "hereupon", "hers", "herself", "him", "himself", "his", "how", "however", "hundred",
    "i", "ie", "if", "in", "inc", "indeed", "interest", "into", "is", "it", "its", "itself",
    "keep", "last", "latter", "latterly", "least", "less", "ltd", "made", "many", "may",
    "me", "meanwhile", "might", "mill", "mine", "more", "moreover", "most", "mostly",
    "move", "much", "must", "my", "myself", "name", "namely", "neither", "never",
    "nevertheless", "next", "nine", "no", "nobody", "none", "noone", "nor", "not",
    "nothing", "now", "nowhere", "of", "off", "often", "on", "once", "one", "only", "onto",
    "or", "other", "others", "otherwise", "our", "ours", "ourselves", "out", "over", "own",
    "part", "per", "perhaps", "please", "put", "rather", "re", "same", "see", "seem",
    "seemed", "seeming", "seems", "serious", "several", "she", "should", "show", "side",
    "since", "sincere", "six", "sixty", "so", "some", "somehow", "someone", "something",
    "sometime", "sometimes", "somewhere", "still", "such", "system", "take", "ten", "than",
    "that", "the", "their", "them", "themselves", "then", "thence", "there", "thereafter",
    "thereby", "therefore", "therein", "thereupon", "these", "they", "thick", "thin",
    "third", "this", "those", "though", "three", "through", "throughout", "thru", "thus",
    "to", "together", "too", "top", "toward", "towards", "twelve", "twenty", "two", "un",
    "under", "until", "up", "upon", "us", "very", "via", "was", "we", "well", "were",
    "what", "whatever", "when", "whence", "whenever", "where", "whereafter", "whereas",
    "whereby", "wherein", "whereupon", "wherever", "whether", "which", "while", "whither",
    "who", "whoever", "whole", "whom", "whose", "why", "will", "with", "within", "without",
    "would", "yet", "you", "your", "yours", "yourself", "yourselves",
];

/// Unigram+bigram TF-IDF vectorizer.
pub struct TfidfVectorizer {
    token: Regex,
    stop_words: HashSet<&'static str>,
    max_df: f64,
}

impl TfidfVectorizer {
    /// Terms appearing in more than `max_df` of the fitted documents are
    /// pruned from the vocabulary.
    ///
    /// # Errors
    ///
    /// Fails only if the token pattern does not compile.
    pub fn new(max_df: f64) -> Result<Self> {
        Ok(Self {
            token: Regex::new(r"\b\w\w+\b")?,
            stop_words: ENGLISH_STOP_WORDS.iter().copied().collect(),
            max_df,
        })
    }

    /// Lowercased unigrams and bigrams of `text`, stop words removed first.
    pub fn terms(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let tokens: Vec<&str> = self
            .token
            .find_iter(&lower)
            .map(|m| m.as_str())
            .filter(|t| !self.stop_words.contains(t))
            .collect();

        let mut terms: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        for pair in tokens.windows(2) {
            terms.push(format!("{} {}", pair[0], pair[1]));
        }
        terms
    }

    /// Fit on `docs` and return one normalized vector per document.
    ///
    /// When pruning leaves no vocabulary every vector is empty, so every
    /// cosine comes out `0.0`.
    pub fn fit_transform<S: AsRef<str>>(&self, docs: &[S]) -> Vec<SparseVector> {
        let n_docs = docs.len();
        let counts: Vec<HashMap<String, usize>> = docs
            .iter()
            .map(|d| {
                let mut tf = HashMap::new();
                for term in self.terms(d.as_ref()) {
                    *tf.entry(term).or_insert(0) += 1;
                }
                tf
            })
            .collect();

        let mut df: BTreeMap<&str, usize> = BTreeMap::new();
        for tf in &counts {
            for term in tf.keys() {
                *df.entry(term.as_str()).or_insert(0) += 1;
            }
        }

        let max_doc_count = self.max_df * n_docs as f64;
        let vocab: HashMap<&str, (usize, f64)> = df
            .iter()
            .filter(|(_, &count)| count as f64 <= max_doc_count)
            .enumerate()
            .map(|(idx, (term, &count))| {
                let idf = ((1.0 + n_docs as f64) / (1.0 + count as f64)).ln() + 1.0;
                (*term, (idx, idf))
            })
            .collect();

        counts
            .iter()
            .map(|tf| {
                let mut vec: SparseVector = tf
                    .iter()
                    .filter_map(|(term, &count)| {
                        vocab
                            .get(term.as_str())
                            .map(|&(idx, idf)| (idx, count as f64 * idf))
                    })
                    .collect();
                vec.sort_by_key(|&(idx, _)| idx);
                let norm = vec.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for (_, w) in vec.iter_mut() {
                        *w /= norm;
                    }
                }
                vec
            })
            .collect()
    }
}

/// Cosine similarity of two normalized sparse vectors (their dot product).
pub fn sparse_cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    let (mut i, mut j) = (0, 0);
    let mut dot = 0.0;
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    dot
}
