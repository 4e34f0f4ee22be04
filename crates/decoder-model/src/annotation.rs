//! Annotation (§4.2): the lightweight value type referencing a
//! deduplicated payload owned by an [`AnnotationResTable`].

use crate::format::DisplayFormat;
use crate::res_table::AnnotationResTable;

/// Bound on how many characters of `number_hex` are accepted before a
/// new source item stops treating the text as numeric at all.
const NUMBER_HEX_MAX_LEN: usize = 256;

/// Raw payload handed in by the decoder engine for one emission,
/// before it has been deduplicated into the table.
#[derive(Debug, Clone)]
pub struct AnnotationEvent {
    pub start_sample: u64,
    pub end_sample: u64,
    pub ann_class: i16,
    pub ann_type: i16,
    /// Lines beginning with `'\n'` are metadata: excluded from the
    /// dedup key and from display.
    pub text_lines: Vec<String>,
    pub number_hex: String,
}

/// Deduplicated text + numeric payload shared by every [`Annotation`]
/// with identical content.
#[derive(Debug, Clone, Default)]
pub struct AnnotationSourceItem {
    pub src_lines: Vec<String>,
    pub is_numeric: bool,
    pub number_hex: Option<String>,
    cur_display_format: DisplayFormat,
    cvt_lines: Vec<String>,
}

impl AnnotationSourceItem {
    fn new(src_lines: Vec<String>, number_hex: Option<String>) -> Self {
        let is_numeric = number_hex.is_some();
        Self {
            src_lines,
            is_numeric,
            number_hex,
            cur_display_format: DisplayFormat::None,
            cvt_lines: Vec::new(),
        }
    }

    /// Rebuilds `cvt_lines` from `src_lines` by substituting the `{$}`
    /// token with the numeric rendering in `fmt`, unless the cache
    /// already matches `fmt` or the item is not numeric.
    pub(crate) fn render(&mut self, fmt: DisplayFormat) -> &[String] {
        if !self.is_numeric {
            return &self.src_lines;
        }
        if self.cur_display_format == fmt && !self.cvt_lines.is_empty() {
            return &self.cvt_lines;
        }
        let hex = self.number_hex.as_deref().unwrap_or("");
        let rendered = crate::format::format_numeric(hex, fmt);
        self.cvt_lines = if self.src_lines.is_empty() {
            vec![rendered]
        } else {
            self.src_lines
                .iter()
                .map(|line| line.replace("{$}", &rendered))
                .collect()
        };
        self.cur_display_format = fmt;
        &self.cvt_lines
    }
}

/// Immutable-after-construction event record: a sample range, a
/// decoder-defined class/type pair, and an index into the owning
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Annotation {
    pub start_sample: u64,
    pub end_sample: u64,
    pub format: i16,
    pub ann_type: i16,
    pub res_index: i32,
}

impl Annotation {
    /// Builds an `Annotation` from an engine event, deduplicating its
    /// payload into `table`. Non-metadata lines are copied into a new
    /// source item only the first time this exact payload is seen.
    pub fn from_event(event: &AnnotationEvent, table: &mut AnnotationResTable) -> Self {
        assert!(
            event.end_sample >= event.start_sample,
            "annotation end_sample must not precede start_sample"
        );

        let display_lines: Vec<String> = event
            .text_lines
            .iter()
            .filter(|l| !l.starts_with('\n'))
            .cloned()
            .collect();

        let mut key = String::new();
        for line in &display_lines {
            key.push_str(line);
        }
        key.push_str(&event.number_hex);

        let (index, is_new) = table.make_index(key);
        if is_new {
            let number_hex = if !event.number_hex.is_empty() && event.number_hex.len() <= NUMBER_HEX_MAX_LEN
            {
                Some(event.number_hex.clone())
            } else {
                None
            };
            *table.get_mut(index) = AnnotationSourceItem::new(display_lines, number_hex);
        }

        Self {
            start_sample: event.start_sample,
            end_sample: event.end_sample,
            format: event.ann_class,
            ann_type: event.ann_type,
            res_index: index as i32,
        }
    }

    /// Materialised display lines for `fmt`, rebuilding the owning
    /// source item's `{$}`-substitution cache when the format changed.
    pub fn texts<'a>(&self, table: &'a mut AnnotationResTable, fmt: DisplayFormat) -> &'a [String] {
        table.render(self.res_index as usize, fmt)
    }
}
