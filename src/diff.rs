//! Unified diff parsing.
//!
//! Converts the raw diff text returned by the pull-request diff endpoint into
//! per-file, per-hunk change records with 1-based line bookkeeping. This is a
//! pure transformation: no I/O, no shared state, safe to call from multiple
//! threads on independent inputs.

use indexmap::IndexMap;

use crate::error::{ReviewError, Result};

/// Whether a run of changed lines was added or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
   Addition,
   Deletion,
}

/// One contiguous run of added or deleted lines within a hunk.
///
/// A record never mixes kinds: consecutive lines of the same kind merge into
/// one record, and a context line or a kind switch closes the open record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
   pub kind:       ChangeKind,
   /// Literal text of the run, newline-joined, `+`/`-` markers stripped.
   pub content:    String,
   /// First line of the run: new-file numbering for additions, old-file
   /// numbering for deletions. 1-based.
   pub start_line: usize,
   /// Last line of the run (same numbering as `start_line`). Equal to
   /// `start_line` for a single-line run.
   pub end_line:   usize,
}

impl ChangeRecord {
   fn open(kind: ChangeKind, line: usize, text: &str) -> Self {
      Self { kind, content: text.to_string(), start_line: line, end_line: line }
   }

   fn extend(&mut self, line: usize, text: &str) {
      self.content.push('\n');
      self.content.push_str(text);
      self.end_line = line;
   }

   pub const fn is_addition(&self) -> bool {
      matches!(self.kind, ChangeKind::Addition)
   }

   /// Number of lines in this run.
   pub const fn line_count(&self) -> usize {
      self.end_line - self.start_line + 1
   }
}

/// Ordered change records for one file (post-change path).
pub type FileChangeSet = Vec<ChangeRecord>;

/// File path → change records, in order of first appearance in the diff.
pub type ParseResult = IndexMap<String, FileChangeSet>;

/// Classification of a single hunk-body line.
enum BodyLine<'a> {
   Added(&'a str),
   Removed(&'a str),
   /// `\ No newline at end of file` marker; closes the open record but
   /// represents no line in either file version.
   NoNewlineMarker,
   Context,
}

impl<'a> BodyLine<'a> {
   fn classify(line: &'a str) -> Self {
      if let Some(text) = line.strip_prefix('+') {
         Self::Added(text)
      } else if let Some(text) = line.strip_prefix('-') {
         Self::Removed(text)
      } else if line.starts_with('\\') {
         Self::NoNewlineMarker
      } else {
         Self::Context
      }
   }
}

/// Running state for the hunk currently being walked.
struct HunkState {
   old_line: usize,
   new_line: usize,
   open:     Option<ChangeRecord>,
}

impl HunkState {
   const fn new(old_start: usize, new_start: usize) -> Self {
      Self { old_line: old_start, new_line: new_start, open: None }
   }

   fn step(&mut self, line: &str, records: &mut Vec<ChangeRecord>) {
      match BodyLine::classify(line) {
         BodyLine::Added(text) => {
            match self.open {
               Some(ref mut record) if record.is_addition() => {
                  record.extend(self.new_line, text);
               },
               _ => {
                  self.flush(records);
                  self.open = Some(ChangeRecord::open(ChangeKind::Addition, self.new_line, text));
               },
            }
            self.new_line += 1;
         },
         BodyLine::Removed(text) => {
            match self.open {
               Some(ref mut record) if !record.is_addition() => {
                  record.extend(self.old_line, text);
               },
               _ => {
                  self.flush(records);
                  self.open = Some(ChangeRecord::open(ChangeKind::Deletion, self.old_line, text));
               },
            }
            self.old_line += 1;
         },
         BodyLine::NoNewlineMarker => {
            self.flush(records);
         },
         BodyLine::Context => {
            self.flush(records);
            self.old_line += 1;
            self.new_line += 1;
         },
      }
   }

   fn flush(&mut self, records: &mut Vec<ChangeRecord>) {
      if let Some(record) = self.open.take() {
         records.push(record);
      }
   }
}

/// One file segment being accumulated during the scan.
struct Segment {
   path:      String,
   is_binary: bool,
   records:   Vec<ChangeRecord>,
   hunk:      Option<HunkState>,
}

impl Segment {
   fn new(path: String) -> Self {
      Self { path, is_binary: false, records: Vec::new(), hunk: None }
   }

   fn finish(mut self, result: &mut ParseResult) {
      if let Some(ref mut hunk) = self.hunk {
         hunk.flush(&mut self.records);
      }
      // Binary segments contribute no entry at all, and a file only appears
      // if at least one record was produced.
      if !self.is_binary && !self.records.is_empty() {
         result.insert(self.path, self.records);
      }
   }
}

/// Parse unified diff text into per-file change records.
///
/// Empty input yields an empty mapping. Binary file segments are omitted.
/// Malformed hunk-header numerics are a hard error rather than silently
/// defaulting, since silent defaults mask upstream diff truncation; omitted
/// counts (legal shorthand for single-line hunks) still default to 1.
pub fn parse(diff_text: &str) -> Result<ParseResult> {
   let mut result = ParseResult::new();
   let mut current: Option<Segment> = None;

   for line in diff_text.lines() {
      if let Some(path) = parse_file_header(line) {
         if let Some(segment) = current.take() {
            segment.finish(&mut result);
         }
         current = Some(Segment::new(path.to_string()));
         continue;
      }

      // Lines before the first file header carry no change information.
      let Some(ref mut segment) = current else {
         continue;
      };

      if line.starts_with("Binary files") {
         segment.is_binary = true;
      } else if line.starts_with("@@ -") {
         let (old_start, _old_count, new_start, _new_count) = parse_hunk_header(line)?;
         if let Some(ref mut previous) = segment.hunk {
            previous.flush(&mut segment.records);
         }
         segment.hunk = Some(HunkState::new(old_start, new_start));
      } else if let Some(ref mut hunk) = segment.hunk {
         // Blank lines (an artifact of splitting, not diff content) are
         // skipped without affecting counters.
         if !line.is_empty() {
            hunk.step(line, &mut segment.records);
         }
      }
   }

   if let Some(segment) = current.take() {
      segment.finish(&mut result);
   }

   Ok(result)
}

/// Extract the post-change ("b/" side) path from a `diff --git` header.
/// Returns None for lines that do not structurally match the header pattern.
fn parse_file_header(line: &str) -> Option<&str> {
   if !line.starts_with("diff --git ") {
      return None;
   }
   line
      .split_whitespace()
      .nth(3)
      .map(|s| s.strip_prefix("b/").unwrap_or(s))
}

/// Parse `@@ -<old_start>[,<old_count>] +<new_start>[,<new_count>] @@`.
fn parse_hunk_header(line: &str) -> Result<(usize, usize, usize, usize)> {
   let malformed = || ReviewError::DiffFormat(format!("unparseable hunk header: {line}"));

   let rest = line.strip_prefix("@@ -").ok_or_else(malformed)?;
   let (ranges, _) = rest.split_once(" @@").ok_or_else(malformed)?;
   let (old, new) = ranges.split_once(" +").ok_or_else(malformed)?;

   let (old_start, old_count) = parse_range(old, line)?;
   let (new_start, new_count) = parse_range(new, line)?;
   Ok((old_start, old_count, new_start, new_count))
}

/// Parse a `<start>[,<count>]` range; an omitted count defaults to 1.
fn parse_range(spec: &str, header: &str) -> Result<(usize, usize)> {
   let (start_str, count_str) = match spec.split_once(',') {
      Some((s, c)) => (s, Some(c)),
      None => (spec, None),
   };

   let start = start_str.parse::<usize>().map_err(|_| {
      ReviewError::DiffFormat(format!("non-numeric start '{start_str}' in hunk header: {header}"))
   })?;

   let count = match count_str {
      Some(c) => c.parse::<usize>().map_err(|_| {
         ReviewError::DiffFormat(format!("non-numeric count '{c}' in hunk header: {header}"))
      })?,
      None => 1,
   };

   Ok((start, count))
}
