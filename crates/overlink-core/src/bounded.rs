//! Results of fixed-capacity queries.
//!
//! The process-list and instance-name queries hand back at most a fixed
//! amount of data. Anything past the capacity is dropped, and the result
//! records that it happened.

use serde::{Deserialize, Serialize};

/// A query result cut to a fixed capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounded<T> {
    value: T,
    available: usize,
    truncated: bool,
}

impl<T> Bounded<Vec<T>> {
    /// Keep at most `capacity` items.
    #[must_use]
    pub fn list(mut items: Vec<T>, capacity: usize) -> Self {
        let available = items.len();
        items.truncate(capacity);
        Self {
            truncated: available > items.len(),
            value: items,
            available,
        }
    }
}

impl Bounded<String> {
    /// Fit `text` into a NUL-terminated buffer of `buffer_size` bytes.
    ///
    /// At most `buffer_size - 1` bytes survive, cut back to a character
    /// boundary.
    #[must_use]
    pub fn text(text: &str, buffer_size: usize) -> Self {
        let limit = buffer_size.saturating_sub(1);
        let mut end = text.len().min(limit);
        while !text.is_char_boundary(end) {
            end = end.saturating_sub(1);
        }

        Self {
            value: text.get(..end).unwrap_or_default().to_owned(),
            available: text.len(),
            truncated: end < text.len(),
        }
    }
}

impl<T> Bounded<T> {
    /// The (possibly truncated) value.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consume and return the value.
    #[must_use]
    pub fn into_value(self) -> T {
        self.value
    }

    /// Whether anything was dropped.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Size before truncation (items for lists, bytes for text).
    #[must_use]
    pub fn available(&self) -> usize {
        self.available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_truncation_is_reported() {
        let bounded = Bounded::list((0..70).collect::<Vec<u32>>(), 64);
        assert_eq!(bounded.value().len(), 64);
        assert_eq!(bounded.available(), 70);
        assert!(bounded.is_truncated());

        let bounded = Bounded::list(vec![1, 2, 3], 64);
        assert!(!bounded.is_truncated());
        assert_eq!(bounded.into_value(), vec![1, 2, 3]);
    }

    #[test]
    fn test_text_reserves_terminator() {
        let name = "n".repeat(64);
        let bounded = Bounded::text(&name, 64);
        assert_eq!(bounded.value().len(), 63);
        assert!(bounded.is_truncated());
        assert!(name.starts_with(bounded.value().as_str()));

        let bounded = Bounded::text("short", 64);
        assert_eq!(bounded.value(), "short");
        assert!(!bounded.is_truncated());
    }

    #[test]
    fn test_text_cuts_on_char_boundary() {
        let bounded = Bounded::text("aé", 3);
        assert_eq!(bounded.value(), "a");
        assert!(bounded.is_truncated());
    }
}
