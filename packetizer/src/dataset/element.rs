//! Dataset shard descriptions
//!
//! An `Element` is one shard of the dataset: a contiguous run of entries in
//! one file on one host. Its total entry count may be unknown until the
//! validation pass (static sizing) or the first completion report for the
//! shard (progressive sizing) fills it in.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Shard as written in a dataset description file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSpec {
    /// Host holding the shard, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Path or identifier of the shard
    pub path: String,

    /// First entry to process
    #[serde(default)]
    pub first: u64,

    /// Number of entries to process (to the end when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num: Option<u64>,

    /// Total entries in the shard, if already known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<u64>,

    /// Entry-list filter applied by workers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_list: Option<String>,
}

impl ElementSpec {
    /// Shard on `host` whose size is not yet known
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            path: path.into(),
            first: 0,
            num: None,
            entries: None,
            entry_list: None,
        }
    }

    /// Set the total entry count
    pub fn with_entries(mut self, entries: u64) -> Self {
        self.entries = Some(entries);
        self
    }

    /// Restrict processing to `[first, first + num)`
    pub fn with_range(mut self, first: u64, num: Option<u64>) -> Self {
        self.first = first;
        self.num = num;
        self
    }
}

/// One dataset shard tracked by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    host: Option<String>,
    path: String,
    first: u64,
    num: Option<u64>,
    entries: Option<u64>,
    entry_list: Option<String>,
    invalid_reason: Option<String>,
}

impl Element {
    /// Build an element, applying the entry count checks if the count is known
    pub fn from_spec(spec: ElementSpec) -> Self {
        let mut element = Self {
            host: spec.host.filter(|h| !h.is_empty()),
            path: spec.path,
            first: spec.first,
            num: spec.num,
            entries: None,
            entry_list: spec.entry_list,
            invalid_reason: None,
        };

        if element.num == Some(0) {
            element.invalidate("empty entry range requested");
        } else if let Some(entries) = spec.entries {
            element.set_entries(entries);
        }

        element
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// First entry to process
    pub fn first(&self) -> u64 {
        self.first
    }

    /// Requested number of entries, once given or derived from the count
    pub fn num(&self) -> Option<u64> {
        self.num
    }

    /// Total entries in the shard, if known
    pub fn entries(&self) -> Option<u64> {
        self.entries
    }

    pub fn entry_list(&self) -> Option<&str> {
        self.entry_list.as_deref()
    }

    pub fn is_valid(&self) -> bool {
        self.invalid_reason.is_none()
    }

    pub fn invalid_reason(&self) -> Option<&str> {
        self.invalid_reason.as_deref()
    }

    /// Whether the entry count has been filled in
    pub fn is_sized(&self) -> bool {
        self.entries.is_some()
    }

    /// Number of entries to process, once the entry count is known
    pub fn len(&self) -> Option<u64> {
        if !self.is_valid() {
            return Some(0);
        }
        self.entries.and(self.num)
    }

    /// Whether no entries are left to process
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// One past the last entry to process, once the entry count is known
    pub fn end(&self) -> Option<u64> {
        self.len().map(|len| self.first + len)
    }

    /// Mark the element as excluded from scheduling
    pub fn invalidate(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(path = %self.path, reason = %reason, "Shard invalidated");
        self.invalid_reason = Some(reason);
    }

    /// Fill in the total entry count.
    ///
    /// A zero count or a first entry at or beyond the count invalidates the
    /// element. A missing length becomes `count - first`; a requested length
    /// running past the end is clamped. Returns whether the element is still
    /// valid. The count is only set once; later calls are ignored.
    pub fn set_entries(&mut self, count: u64) -> bool {
        if self.entries.is_some() {
            return self.is_valid();
        }
        self.entries = Some(count);

        if count == 0 {
            self.invalidate("non-positive entry count");
            return false;
        }

        if self.first >= count {
            self.invalidate(format!(
                "first entry {} beyond entry count {}",
                self.first, count
            ));
            return false;
        }

        let available = count - self.first;
        match self.num {
            None => self.num = Some(available),
            Some(num) if num > available => {
                warn!(
                    path = %self.path,
                    requested = num,
                    available,
                    "Requested range exceeds shard, clamping"
                );
                self.num = Some(available);
            }
            Some(_) => {}
        }

        self.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsized_element() {
        let element = Element::from_spec(ElementSpec::new("a", "a/part-0.bin"));

        assert!(element.is_valid());
        assert!(!element.is_sized());
        assert_eq!(element.len(), None);
        assert_eq!(element.end(), None);
    }

    #[test]
    fn test_length_filled_from_count() {
        let spec = ElementSpec::new("a", "a/part-0.bin").with_range(10, None);
        let mut element = Element::from_spec(spec);

        assert!(element.set_entries(100));
        assert_eq!(element.len(), Some(90));
        assert_eq!(element.end(), Some(100));
    }

    #[test]
    fn test_requested_length_clamped() {
        let spec = ElementSpec::new("a", "a/part-0.bin")
            .with_range(40, Some(100))
            .with_entries(100);
        let element = Element::from_spec(spec);

        assert!(element.is_valid());
        assert_eq!(element.len(), Some(60));
    }

    #[test]
    fn test_first_beyond_count_invalidates() {
        let spec = ElementSpec::new("a", "a/part-0.bin").with_range(150, None);
        let mut element = Element::from_spec(spec);

        assert!(!element.set_entries(100));
        assert!(!element.is_valid());
        assert!(element.invalid_reason().unwrap().contains("beyond"));
        assert_eq!(element.len(), Some(0));
    }

    #[test]
    fn test_zero_count_invalidates() {
        let mut element = Element::from_spec(ElementSpec::new("a", "a/part-0.bin"));
        assert!(!element.set_entries(0));
        assert!(!element.is_valid());
    }

    #[test]
    fn test_count_set_once() {
        let mut element = Element::from_spec(ElementSpec::new("a", "a/part-0.bin"));
        element.set_entries(100);
        element.set_entries(5);

        assert_eq!(element.entries(), Some(100));
        assert_eq!(element.len(), Some(100));
    }

    #[test]
    fn test_empty_host_is_no_host() {
        let mut spec = ElementSpec::new("", "orphan.bin");
        spec.entries = Some(5);
        let element = Element::from_spec(spec);
        assert_eq!(element.host(), None);
    }
}
