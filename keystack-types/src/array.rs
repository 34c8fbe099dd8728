//! Array items inside a key set.
//!
//! Array elements are named `#0` .. `#9`, `#_10` .. `#_99`, `#__100` and so
//! on: one underscore per extra digit, so lexical order equals numeric order.

use crate::{Key, KeyName, KeySet};

/// Base name of the array element at `index`.
pub fn array_index_name(index: usize) -> String {
    let digits = index.to_string();
    format!("#{}{}", "_".repeat(digits.len() - 1), digits)
}

/// Parses an array element base name. Rejects names whose underscore count
/// does not match the digit count.
pub fn parse_array_index(base_name: &str) -> Option<usize> {
    let rest = base_name.strip_prefix('#')?;
    let digits = rest.trim_start_matches('_');
    let underscores = rest.len() - digits.len();
    if digits.is_empty()
        || !digits.bytes().all(|b| b.is_ascii_digit())
        || underscores + 1 != digits.len()
        || (digits.len() > 1 && digits.starts_with('0'))
    {
        return None;
    }
    digits.parse().ok()
}

/// Element keys directly below `parent`, ordered by index.
pub fn array_items<'a>(ks: &'a KeySet, parent: &'a KeyName) -> Vec<&'a Key> {
    ks.below(parent)
        .filter(|key| key.name().is_directly_below(parent))
        .filter(|key| key.name().base_name().and_then(parse_array_index).is_some())
        .collect()
}

/// Name of the element following the last one present below `parent`.
pub fn next_array_name(ks: &KeySet, parent: &KeyName) -> KeyName {
    let next = array_items(ks, parent)
        .last()
        .and_then(|key| key.name().base_name())
        .and_then(parse_array_index)
        .map_or(0, |last| last + 1);
    let mut name = parent.clone();
    name.add_base_name(&array_index_name(next));
    name
}
