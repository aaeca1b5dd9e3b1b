//! Thread search: one case-insensitive substring match of the whole query
//! against title, description and tags.

use crate::models::Thread;

/// Trimmed, lowercased query. Empty means "no filter".
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

fn contains_lowercase(text: &str, needle: &str) -> bool {
    text.to_lowercase().contains(needle)
}

/// `needle` must already be normalized. It matches when it occurs in the
/// title, the description or any tag.
pub fn thread_matches(thread: &Thread, needle: &str) -> bool {
    contains_lowercase(&thread.title, needle)
        || contains_lowercase(&thread.description, needle)
        || thread.tags.iter().any(|tag| contains_lowercase(tag, needle))
}

/// Threads matching `query`, in their original order.
pub fn filter_threads<'a>(threads: &'a [Thread], query: &str) -> Vec<&'a Thread> {
    let needle = normalize_query(query);
    threads
        .iter()
        .filter(|thread| thread_matches(thread, &needle))
        .collect()
}
