//! The annotation data model: deduplicated text/numeric payloads,
//! lightweight annotation values, per-row append-only logs, and the
//! row identity key that ties a `(decoder, annotation-row, order)`
//! triple to one `RowData`.

mod annotation;
mod format;
mod res_table;
mod row;
mod row_data;

pub use annotation::{Annotation, AnnotationEvent, AnnotationSourceItem};
pub use format::DisplayFormat;
pub use res_table::AnnotationResTable;
pub use row::{DecoderHandle, Row};
pub use row_data::RowData;
