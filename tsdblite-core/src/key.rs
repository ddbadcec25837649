//! Canonical series keys
//!
//! A series is identified by `metric{k1=v1,k2=v2}` with tag keys in sorted
//! order, or by the bare metric name when it has no tags. Delimiter
//! characters inside tag keys or values are not escaped.

use crate::Tags;

/// Build the canonical key for a metric and tag set
pub fn canonical_key(metric: &str, tags: &Tags) -> String {
    if tags.is_empty() {
        return metric.to_string();
    }

    let mut pairs: Vec<(&str, &str)> = tags
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let len = metric.len()
        + 2
        + pairs
            .iter()
            .map(|(k, v)| k.len() + v.len() + 2)
            .sum::<usize>();
    let mut key = String::with_capacity(len);
    key.push_str(metric);
    key.push('{');
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            key.push(',');
        }
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key.push('}');
    key
}
