//! AnnotationResTable (§4.1): content-addressed store of annotation
//! payloads, owned by one DecoderStatus per decode stack.

use crate::annotation::AnnotationSourceItem;
use crate::format::DisplayFormat;
use std::collections::HashMap;

/// Deduplicated store of [`AnnotationSourceItem`]s. The index handed
/// back by [`AnnotationResTable::make_index`] is monotonic and stable
/// for the lifetime of the table; it is only ever invalidated by
/// [`AnnotationResTable::reset`].
#[derive(Debug, Default)]
pub struct AnnotationResTable {
    items: Vec<AnnotationSourceItem>,
    index: HashMap<String, usize>,
    current_format: DisplayFormat,
}

impl AnnotationResTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The display format `render` substitutes into cached lines when
    /// no explicit format override is requested.
    pub fn current_format(&self) -> DisplayFormat {
        self.current_format
    }

    pub fn set_current_format(&mut self, fmt: DisplayFormat) {
        self.current_format = fmt;
    }

    /// Looks `key` up in the dedup dictionary. On a miss, allocates a
    /// new (default) item at the next monotonic index and returns
    /// `(index, true)`; callers populate it via [`Self::get_mut`]. On
    /// a hit, returns `(index, false)` and performs no allocation.
    pub fn make_index(&mut self, key: String) -> (usize, bool) {
        if let Some(&idx) = self.index.get(&key) {
            return (idx, false);
        }
        let idx = self.items.len();
        self.items.push(AnnotationSourceItem::default());
        self.index.insert(key, idx);
        (idx, true)
    }

    /// Direct index into the table. `i` must be in range; violating
    /// that is a contract failure in the caller (the same way an
    /// out-of-range `Annotation::res_index` would be), not a
    /// recoverable condition.
    pub fn get_mut(&mut self, i: usize) -> &mut AnnotationSourceItem {
        &mut self.items[i]
    }

    pub fn get(&self, i: usize) -> &AnnotationSourceItem {
        &self.items[i]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Materialises the display lines for item `i` at `fmt`.
    pub(crate) fn render(&mut self, i: usize, fmt: DisplayFormat) -> &[String] {
        self.items[i].render(fmt)
    }

    /// Frees every item and index; any `Annotation::res_index` minted
    /// before this call is no longer valid.
    pub fn reset(&mut self) {
        self.items.clear();
        self.index.clear();
        self.current_format = DisplayFormat::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_keys_dedupe_to_one_index() {
        let mut table = AnnotationResTable::new();
        let (i1, new1) = table.make_index("ACK".to_string());
        let (i2, new2) = table.make_index("ACK".to_string());
        assert!(new1);
        assert!(!new2);
        assert_eq!(i1, i2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn distinct_keys_get_monotonic_indices() {
        let mut table = AnnotationResTable::new();
        let (i1, _) = table.make_index("ACK".to_string());
        let (i2, _) = table.make_index("NACK".to_string());
        assert_eq!(i1, 0);
        assert_eq!(i2, 1);
    }

    #[test]
    fn reset_frees_all_items() {
        let mut table = AnnotationResTable::new();
        table.make_index("ACK".to_string());
        table.reset();
        assert_eq!(table.len(), 0);
        let (idx, is_new) = table.make_index("ACK".to_string());
        assert_eq!(idx, 0);
        assert!(is_new);
    }
}
