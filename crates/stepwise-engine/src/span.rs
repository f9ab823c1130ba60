use std::fmt;
use std::sync::Arc;

use crate::function::FunctionInfo;

/// (line, column) position within a source file.
///
/// Positions are ordered lexicographically: by line, then by column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourcePosition {
    /// Line number.
    pub line: u32,

    /// Column number.
    pub column: u32,
}

impl SourcePosition {
    /// Creates a new position.
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Source range of a sequence point, within a single file.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    file: Arc<str>,
    start: SourcePosition,
    end: SourcePosition,
}

impl SourceSpan {
    /// Creates a span covering `start..=end` in `file`.
    pub fn new(file: impl Into<Arc<str>>, start: SourcePosition, end: SourcePosition) -> Self {
        Self {
            file: file.into(),
            start,
            end,
        }
    }

    /// Creates a span from raw `(line, column)` pairs.
    pub fn from_lines(
        file: impl Into<Arc<str>>,
        (start_line, start_column): (u32, u32),
        (end_line, end_column): (u32, u32),
    ) -> Self {
        Self::new(
            file,
            SourcePosition::new(start_line, start_column),
            SourcePosition::new(end_line, end_column),
        )
    }

    /// Path of the source file containing this span.
    pub fn file(&self) -> &str {
        &self.file
    }

    pub(crate) fn file_arc(&self) -> &Arc<str> {
        &self.file
    }

    /// Start of the span.
    pub const fn start(&self) -> SourcePosition {
        self.start
    }

    /// End of the span.
    pub const fn end(&self) -> SourcePosition {
        self.end
    }

    /// Returns whether `other` lies entirely within this span.
    ///
    /// Spans of different files never contain each other.
    pub fn contains(&self, other: &Self) -> bool {
        self.file == other.file && self.start <= other.start && other.end <= self.end
    }

    /// Returns whether both spans overlap.
    ///
    /// Spans of different files never intersect, whatever their coordinates.
    pub fn intersects(&self, other: &Self) -> bool {
        self.file == other.file && !(self.end < other.start || other.end < self.start)
    }

    /// Returns the index of the first sequence point of `function` that
    /// intersects this span.
    ///
    /// The sequence-point table is in source-establishment order, not position
    /// order, so the whole table is scanned.
    pub fn locate_in(&self, function: &FunctionInfo) -> Option<usize> {
        function
            .sequence_points()
            .iter()
            .position(|point| self.intersects(point))
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}-{}:{}",
            self.file, self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}
