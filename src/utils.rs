//! Helpers for ordered result assembly.

/// Insert `value` at `index`, clamping past-the-end indices to a push.
pub fn insert_at<T>(items: &mut Vec<T>, value: T, index: usize) {
    let index = index.min(items.len());
    items.insert(index, value);
}

/// Remove the item at `index`. Out-of-range indices remove nothing.
pub fn remove_at<T>(items: &mut Vec<T>, index: usize) -> Option<T> {
    if index < items.len() {
        Some(items.remove(index))
    } else {
        None
    }
}

/// Move the item at `from` so that it ends up at `to`.
///
/// Returns false if `from` is out of range.
pub fn move_item<T>(items: &mut Vec<T>, from: usize, to: usize) -> bool {
    match remove_at(items, from) {
        Some(item) => {
            insert_at(items, item, to);
            true
        }
        None => false,
    }
}

/// Union of two key sequences, in first-seen order, without duplicates.
pub fn ordered_union<'a, A, B>(first: A, second: B) -> Vec<String>
where
    A: IntoIterator<Item = &'a str>,
    B: IntoIterator<Item = &'a str>,
{
    let mut keys: Vec<String> = Vec::new();
    for key in first.into_iter().chain(second) {
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}
