//! Deterministic text extraction: keywords, entities, time, relations,
//! sentiment, and query parsing. Regex + lexicon only: extractors never
//! fail, they degrade to empty results.

pub mod keywords;
pub mod parser;
pub mod relations;
pub mod sentiment;
pub mod simhash;
pub mod temporal;
pub mod tokenizer;

pub use keywords::{extract_keywords, is_stop_word};
pub use parser::{
    extract_entities, is_action_verb, AnchorCandidate, QueryIntent, QueryParser, Stimulus,
};
pub use relations::{extract_relations, RelationCandidate, RelationFamily};
pub use sentiment::{extract_sentiment, SentimentResult, Valence};
pub use simhash::{hamming, is_near_duplicate, simhash64, DEDUP_DISTANCE};
pub use temporal::{extract_time_hints, TimeHint};
pub use tokenizer::{RegexTokenizer, Tokenizer};
