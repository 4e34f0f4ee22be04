//! The two lock-protected aggregates backing a [`crate::DecoderStack`]:
//! `RowStore` (the `annotations_lock` of §5 — RowData mutation/read
//! plus the shared `cvt_lines` cache) and `Layout` (row membership and
//! visibility, mutated only while the stack is `Stopped`).

use decoder_model::{AnnotationResTable, Row, RowData};
use decoder_engine::DecoderId;
use std::collections::HashMap;

/// Bundles every row's append-only log with the annotation table they
/// all reference, so one mutex covers exactly the data §5 says the
/// `annotations_lock` must cover and nothing else.
#[derive(Debug, Default)]
pub(crate) struct RowStore {
    pub rows: HashMap<Row, RowData>,
    pub table: AnnotationResTable,
}

/// Row membership and visibility. The spec states this is mutated
/// only while `decode_state == Stopped`, and the worker thread reads
/// it without a lock because the Stopped→Running transition and the
/// membership freeze happen-before the first chunk; a `Mutex` is kept
/// anyway (uncontended in practice) rather than an unsafe unguarded
/// read, matching the teacher's no-`parking_lot`, plain-`Mutex`
/// concurrency idiom.
#[derive(Debug, Default)]
pub(crate) struct Layout {
    pub class_rows: HashMap<(DecoderId, i16), Row>,
    pub rows_gshow: HashMap<Row, bool>,
    pub rows_lshow: HashMap<Row, bool>,
    pub row_titles: HashMap<Row, String>,
}

impl Layout {
    /// `title` containing "bit" or "warning" (case-insensitive)
    /// defaults to local-hidden; everything else defaults visible on
    /// both axes. Existing visibility decisions for a row already
    /// known to the layout are preserved.
    pub fn register_row(&mut self, row: Row, title: &str) {
        self.rows_gshow.entry(row).or_insert(true);
        self.rows_lshow.entry(row).or_insert_with(|| {
            let lower = title.to_ascii_lowercase();
            !(lower.contains("bit") || lower.contains("warning"))
        });
        self.row_titles.insert(row, title.to_string());
    }
}
