//! DecoderModel (§4.6): a read-only tabular adapter over a
//! [`DecoderStack`], sized by the stack's visible rows/columns and
//! reset whenever the underlying stack is replaced.

use decoder_core::DecoderStack;
use decoder_model::DisplayFormat;
use std::sync::Mutex;

/// Row/column count reported while no stack is attached, matching the
/// source table model's placeholder extent before a session exists.
const UNATTACHED_ROWS: usize = 100;
const UNATTACHED_COLUMNS: usize = 1;

/// Table-shaped view over a [`DecoderStack`]'s visible rows. Holds the
/// stack behind a `Mutex` so swapping it (`set_decoder_stack`) is a
/// single atomic replacement a concurrent reader never observes half
/// torn, mirroring the source's `beginResetModel`/`endResetModel`
/// pair without committing to any particular widget toolkit.
pub struct DecoderModel {
    stack: Mutex<Option<DecoderStack>>,
}

impl Default for DecoderModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderModel {
    pub fn new() -> Self {
        Self {
            stack: Mutex::new(None),
        }
    }

    /// Replaces the attached stack, resetting every row/column/cell
    /// query to reflect the new stack (or none).
    pub fn set_decoder_stack(&self, stack: Option<DecoderStack>) {
        *self.stack.lock().expect("decoder model lock poisoned") = stack;
    }

    pub fn decoder_stack(&self) -> Option<DecoderStack> {
        self.stack.lock().expect("decoder model lock poisoned").clone()
    }

    /// `list_annotation_size()` of the attached stack, or the
    /// placeholder extent if none is attached.
    pub fn rows(&self) -> usize {
        match &*self.stack.lock().expect("decoder model lock poisoned") {
            Some(stack) => stack.list_annotation_size(),
            None => UNATTACHED_ROWS,
        }
    }

    /// `list_rows_size()` of the attached stack, or the placeholder
    /// extent if none is attached.
    pub fn columns(&self) -> usize {
        match &*self.stack.lock().expect("decoder model lock poisoned") {
            Some(stack) => stack.list_rows_size(),
            None => UNATTACHED_COLUMNS,
        }
    }

    /// First display line of cell `(row, col)`, or `None` when the
    /// index is out of range, no stack is attached, or the slot has no
    /// annotation at all (`DecoderModel::data`'s `Qt::DisplayRole`
    /// branch, one line per cell).
    pub fn cell(&self, row: usize, col: usize) -> Option<String> {
        let stack = self.stack.lock().expect("decoder model lock poisoned").clone()?;
        let annotation = stack.list_annotation(col, row)?;
        stack
            .annotation_lines(annotation, DisplayFormat::None)
            .into_iter()
            .next()
    }

    /// Vertical header label for `r`: the source model echoes the raw
    /// row section number rather than a computed title.
    pub fn row_header(&self, r: usize) -> usize {
        r
    }

    /// Horizontal header label for `c`: the title of the `c`'th
    /// visible row (`list_row_title` in the source model).
    pub fn column_header(&self, c: usize) -> Option<String> {
        self.stack
            .lock()
            .expect("decoder model lock poisoned")
            .as_ref()
            .and_then(|stack| stack.list_row_title(c))
    }
}
