//! Lifecycle: decay, maturation advancement, and pattern extraction.

pub mod decay;
pub mod patterns;

pub use decay::{DecayManager, DecayReport};
pub use patterns::{extract_patterns, PatternReport};
