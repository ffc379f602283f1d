//! Position identity that survives batched loading.
//!
//! Large projects are loaded in batches, each with its own position numbering,
//! so a raw byte offset is not unique across the whole program. `SiteKey` pairs
//! the offset with the id of the file table that produced it; when a single
//! table covers the project, the table id collapses to `FileTableId::NONE` and
//! the offset alone identifies the location.

/// Byte-offset position within one file table. `NO_POS` (zero) means
/// "no position recorded".
pub type Pos = u32;

pub const NO_POS: Pos = 0;

/// Identifier of one file table (one load batch).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct FileTableId(pub u32);

impl FileTableId {
    /// Table id used when the whole program shares one position numbering.
    pub const NONE: FileTableId = FileTableId(0);
}

/// Identity of a syntactic location: (file table, position).
///
/// Two loads of the same batch produce identical `SiteKey`s for each
/// declaration and call site, which is what the analysis tables are keyed by.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct SiteKey {
    pub table: FileTableId,
    pub pos: Pos,
}

impl SiteKey {
    pub fn new(table: FileTableId, pos: Pos) -> Self {
        Self { table, pos }
    }

    pub fn is_valid(&self) -> bool {
        self.pos != NO_POS
    }
}

/// Resolved source location, as reported in warnings.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub path: String,
    pub line: u32,
}

/// One file's slot in a file table: a half-open position range plus the path
/// and the line number at which the range starts.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FileRange {
    pub table: FileTableId,
    pub start: Pos,
    pub end: Pos,
    pub path: String,
    pub base_line: u32,
}

/// Position service built by the loader before analysis and immutable after.
/// Maps any `SiteKey` back to a file path and line.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PositionTable {
    files: Vec<FileRange>,
    /// Exact line overrides for positions the loader resolved precisely.
    lines: Vec<(SiteKey, u32)>,
}

impl PositionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, range: FileRange) {
        self.files.push(range);
    }

    pub fn set_line(&mut self, key: SiteKey, line: u32) {
        self.lines.push((key, line));
    }

    /// Resolve a key to its file and line. Positions between recorded lines
    /// fall back to an offset from the file's base line.
    pub fn lookup(&self, key: SiteKey) -> Option<Location> {
        let f = self
            .files
            .iter()
            .find(|f| f.table == key.table && f.start <= key.pos && key.pos < f.end)?;
        let line = self
            .lines
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, line)| *line)
            .unwrap_or(f.base_line + (key.pos - f.start));
        Some(Location { path: f.path.clone(), line })
    }
}
