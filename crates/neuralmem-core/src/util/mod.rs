//! Small shared utilities.

pub mod union_find;

pub use union_find::UnionFind;

/// Jaccard similarity of two string sets.
pub fn jaccard<'a, I, J>(a: I, b: J) -> f64
where
    I: IntoIterator<Item = &'a String>,
    J: IntoIterator<Item = &'a String>,
{
    use std::collections::HashSet;
    let sa: HashSet<&str> = a.into_iter().map(String::as_str).collect();
    let sb: HashSet<&str> = b.into_iter().map(String::as_str).collect();
    if sa.is_empty() && sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    inter / union
}
