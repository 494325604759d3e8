//! This module turns character background documents into retrievable passages
//! for a RAG (Retrieval Augmented Generation) pipeline.
//!
//! Knowledge-base documents are Markdown-ish prose: a handful of headed sections,
//! some of them long. The [`Chunker`] first cuts a document on its headings and
//! then, for any section longer than the configured passage length, slides a
//! window over the section body so that no passage exceeds the limit while
//! neighbouring passages still share some text.
//!
//! The module defines:
//! - [`Chunker`]: holds the compiled delimiters and produces [`Chunk`]s.
//! - [`ChunkerConfig`]: passage length, overlap and minimum length settings.
//! - [`Chunk`]: a single passage plus its provenance (source, section, position).
//!
//! # Example Passage Layout
//!
//! ```text
//! # Personality            <- heading, becomes `section = Some("Personality")`
//! Viktor is driven ...     <- body, one or more passages depending on length
//! ```
//!
//! # Key Features
//!
//! *   **Section Boundaries**: Markdown headings (`#` through `######`) start a new
//!     section. Text before the first heading becomes a section without a title.
//! *   **Recursive Segmentation**: Long bodies are broken into atomic segments,
//!     trying paragraph breaks first, then line breaks, sentence ends and spaces,
//!     falling back to a hard cut on a UTF-8 character boundary.
//! *   **Overlapping Windows**: Segments are packed into windows. When a window is
//!     full, its trailing segments (up to `overlap_fraction` of the window length)
//!     are repeated at the start of the next window.
//! *   **Determinism**: The same text, source id and configuration always yield the
//!     same passages, ids and positions.
//!
//! # Usage
//!
//! ```
//! use lore_ai_context::text::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
//! let document = "# Profile\nViktor is a scientist from Zaun.\n\n# Tools\nHe walks with a cane.";
//!
//! let chunks = chunker.chunk(document, "viktor_profile").unwrap();
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].section.as_deref(), Some("Profile"));
//! assert_eq!(chunks[1].id, "viktor_profile#1");
//! assert!(chunks.windows(2).all(|w| w[0].position < w[1].position));
//! ```
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Pattern matching a Markdown heading line. Group 1 holds the title.
const HEADING_PATTERN: &str = r"(?m)^[ \t]{0,3}#{1,6}[ \t]+([^\n]*?)[ \t#]*$";

/// Delimiters used to cut an oversized section body into segments.
///
/// These are ordered from most significant to least significant. Each match is
/// attached to the text that precedes it, so sentences keep their punctuation.
///
/// - `\n[ \t]*\n\s*`: Paragraph breaks.
/// - `\n`: Line breaks.
/// - `[.!?]["')\]]*\s+`: Sentence ends.
/// - ` `: Spaces, the most granular delimiter.
pub const PASSAGE_DELIMITERS: &[&str] = &[
    r"\n[ \t]*\n\s*",      // Paragraphs
    r"\n",                 // Line breaks
    r#"[.!?]["')\]]*\s+"#, // Sentence ends
    r" ",                  // Spaces
];

/// Errors produced while chunking a document.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// Every passage must be attributable to a source document
    #[error("source id must not be empty")]
    EmptySourceId,

    /// Chunker settings that cannot produce passages
    #[error("invalid chunker configuration: {message}")]
    InvalidConfig { message: String },

    /// A delimiter pattern failed to compile
    #[error("invalid delimiter pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Configuration for splitting documents into passages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum passage length in bytes of UTF-8 text
    pub max_passage_len: usize,
    /// Share of a window repeated at the start of the next one (0.0 to 0.5)
    pub overlap_fraction: f32,
    /// Passages shorter than this many characters are dropped
    pub min_passage_len: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_passage_len: 500,
            overlap_fraction: 0.15,
            min_passage_len: 16,
        }
    }
}

impl ChunkerConfig {
    pub fn with_max_passage_len(mut self, max_passage_len: usize) -> Self {
        self.max_passage_len = max_passage_len;
        self
    }

    pub fn with_overlap_fraction(mut self, overlap_fraction: f32) -> Self {
        self.overlap_fraction = overlap_fraction;
        self
    }

    pub fn with_min_passage_len(mut self, min_passage_len: usize) -> Self {
        self.min_passage_len = min_passage_len;
        self
    }

    /// Check that the settings can produce passages at all.
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.max_passage_len == 0 {
            return Err(ChunkError::InvalidConfig {
                message: "max_passage_len must be greater than zero".to_string(),
            });
        }
        if !(0.0..=0.5).contains(&self.overlap_fraction) {
            return Err(ChunkError::InvalidConfig {
                message: format!(
                    "overlap_fraction must be within 0.0..=0.5, got {}",
                    self.overlap_fraction
                ),
            });
        }
        Ok(())
    }

    fn overlap_budget(&self) -> usize {
        (self.max_passage_len as f64 * f64::from(self.overlap_fraction)) as usize
    }
}

/// Placement of a passage within a section that was split into several windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassagePart {
    /// 1-based index of this window
    pub index: usize,
    /// Number of windows the section produced
    pub total: usize,
}

/// A retrievable passage of a source document with its provenance.
///
/// Chunks are only produced by [`Chunker::chunk`] and are treated as immutable
/// values afterwards: the index stores them exactly as they were embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique within an index: `"{source}#{position}"`
    pub id: String,
    /// The passage content, trimmed and never empty
    pub text: String,
    /// Logical identifier of the originating document
    pub source: String,
    /// Heading the passage was drawn from, if any
    pub section: Option<String>,
    /// Ordinal within the source document (0-indexed, strictly increasing)
    pub position: usize,
    /// Set when the section was split into several windows
    pub part: Option<PassagePart>,
}

impl Chunk {
    /// Build the deterministic id for a passage.
    pub fn make_id(source: &str, position: usize) -> String {
        format!("{source}#{position}")
    }

    /// Human-readable provenance label, e.g. `viktor_tech: Hexcore (Part 2/3)`.
    pub fn label(&self) -> String {
        let mut label = self.source.clone();
        if let Some(section) = &self.section {
            label.push_str(": ");
            label.push_str(section);
        }
        if let Some(part) = self.part {
            label.push_str(&format!(" (Part {}/{})", part.index, part.total));
        }
        label
    }

    /// Text handed to the embedder: the section heading, if any, then the passage.
    ///
    /// Headings take part in similarity but are never copied into [`Chunk::text`].
    pub fn embedding_text(&self) -> String {
        match &self.section {
            Some(section) => format!("{section}\n\n{}", self.text),
            None => self.text.clone(),
        }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.label(), self.text)
    }
}

/// A heading-delimited slice of a document.
struct Section<'a> {
    title: Option<&'a str>,
    body: &'a str,
}

/// Splits documents into overlapping, section-aware passages.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
    heading: Regex,
    delimiters: Vec<Regex>,
}

impl Chunker {
    /// Creates a chunker after validating the configuration and compiling delimiters.
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkError> {
        config.validate()?;
        let heading = Regex::new(HEADING_PATTERN)?;
        let delimiters = PASSAGE_DELIMITERS
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            heading,
            delimiters,
        })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Splits `document_text` into passages attributed to `source_id`.
    ///
    /// Sections are emitted in document order; windows of a section in window
    /// order. Empty passages, and passages shorter than `min_passage_len`
    /// characters, are dropped before positions are assigned, so positions are
    /// contiguous.
    pub fn chunk(&self, document_text: &str, source_id: &str) -> Result<Vec<Chunk>, ChunkError> {
        if source_id.trim().is_empty() {
            return Err(ChunkError::EmptySourceId);
        }

        let mut chunks = Vec::new();
        for section in self.sections(document_text) {
            let passages: Vec<&str> = self
                .windows(section.body)
                .into_iter()
                .filter(|passage| {
                    !passage.is_empty() && passage.chars().count() >= self.config.min_passage_len
                })
                .collect();

            let total = passages.len();
            for (index, passage) in passages.into_iter().enumerate() {
                let position = chunks.len();
                chunks.push(Chunk {
                    id: Chunk::make_id(source_id, position),
                    text: passage.to_string(),
                    source: source_id.to_string(),
                    section: section.title.map(str::to_string),
                    position,
                    part: (total > 1).then_some(PassagePart {
                        index: index + 1,
                        total,
                    }),
                });
            }
        }

        Ok(chunks)
    }

    fn sections<'a>(&self, text: &'a str) -> Vec<Section<'a>> {
        let mut sections = Vec::new();
        let mut title = None;
        let mut body_start = 0;

        for caps in self.heading.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            sections.push(Section {
                title,
                body: &text[body_start..whole.start()],
            });
            title = caps
                .get(1)
                .map(|t| t.as_str().trim())
                .filter(|t| !t.is_empty());
            body_start = whole.end();
        }

        sections.push(Section {
            title,
            body: &text[body_start..],
        });
        sections
    }

    /// Packs the segments of a section body into overlapping windows.
    fn windows<'a>(&self, body: &'a str) -> Vec<&'a str> {
        let body = body.trim();
        let max = self.config.max_passage_len;
        if body.len() <= max {
            return vec![body];
        }

        let segments = self.split_recursively_into_segments(body, 0, 0);
        let overlap_budget = self.config.overlap_budget();

        let mut windows = Vec::new();
        let mut current: Vec<Range<usize>> = Vec::new();
        let mut current_len = 0;
        let mut has_new_content = false;

        for segment in segments {
            let len = segment.len();

            if current_len + len > max && has_new_content {
                windows.push(Self::window_text(body, &current));

                // Carry the tail of the flushed window into the next one
                let mut carried = Vec::new();
                let mut carried_len = 0;
                for previous in current.iter().rev() {
                    let next_len = carried_len + previous.len();
                    if next_len > overlap_budget || next_len + len > max {
                        break;
                    }
                    carried_len = next_len;
                    carried.push(previous.clone());
                }
                carried.reverse();

                current = carried;
                current_len = carried_len;
                has_new_content = false;
            }

            current.push(segment);
            current_len += len;
            has_new_content = true;
        }

        if has_new_content {
            windows.push(Self::window_text(body, &current));
        }

        windows
    }

    fn window_text<'a>(body: &'a str, segments: &[Range<usize>]) -> &'a str {
        match (segments.first(), segments.last()) {
            (Some(first), Some(last)) => body[first.start..last.end].trim(),
            _ => "",
        }
    }

    // Recursively splits `text` into contiguous byte ranges no longer than the
    // maximum passage length. Delimiter matches are attached to the segment that
    // precedes them whenever that keeps the segment within the limit.
    fn split_recursively_into_segments(
        &self,
        text: &str,
        delimiter_idx: usize,
        current_offset: usize,
    ) -> Vec<Range<usize>> {
        let max = self.config.max_passage_len;
        let mut result_segments: Vec<Range<usize>> = Vec::new();

        if text.is_empty() {
            return result_segments;
        }

        if text.len() <= max {
            result_segments.push(current_offset..current_offset + text.len());
            return result_segments;
        }

        let Some(delimiter) = self.delimiters.get(delimiter_idx) else {
            return Self::hard_split(text, max, current_offset);
        };

        let mut local_start = 0;
        for mat in delimiter.find_iter(text) {
            if mat.start() > local_start {
                result_segments.extend(self.split_recursively_into_segments(
                    &text[local_start..mat.start()],
                    delimiter_idx + 1,
                    current_offset + local_start,
                ));
            }

            let delimiter_range = current_offset + mat.start()..current_offset + mat.end();
            match result_segments.last_mut() {
                Some(last)
                    if last.end == delimiter_range.start
                        && last.len() + delimiter_range.len() <= max =>
                {
                    last.end = delimiter_range.end;
                }
                _ if delimiter_range.len() > max => {
                    result_segments.extend(Self::hard_split(
                        mat.as_str(),
                        max,
                        delimiter_range.start,
                    ));
                }
                _ => result_segments.push(delimiter_range),
            }
            local_start = mat.end();
        }

        if local_start < text.len() {
            result_segments.extend(self.split_recursively_into_segments(
                &text[local_start..],
                delimiter_idx + 1,
                current_offset + local_start,
            ));
        }

        result_segments
    }

    /// Cuts text into pieces of at most `max` bytes on UTF-8 character boundaries.
    fn hard_split(text: &str, max: usize, current_offset: usize) -> Vec<Range<usize>> {
        let mut segments = Vec::new();
        let mut start = 0;
        while start < text.len() {
            let mut end = (start + max).min(text.len());
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            if end == start {
                // A single character wider than the limit still has to go somewhere
                end = start + text[start..].chars().next().map_or(1, char::len_utf8);
            }
            segments.push(current_offset + start..current_offset + end);
            start = end;
        }
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_section(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Sentence number {i} about hextech research. "))
            .collect()
    }

    #[test]
    fn test_short_documents_become_single_passages() {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();

        let chunks = chunker
            .chunk("Viktor is a scientist. He has a cane.", "viktor_profile")
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "viktor_profile#0");
        assert_eq!(chunks[0].text, "Viktor is a scientist. He has a cane.");
        assert_eq!(chunks[0].source, "viktor_profile");
        assert_eq!(chunks[0].section, None);
        assert_eq!(chunks[0].position, 0);
        assert_eq!(chunks[0].part, None);
    }

    #[test]
    fn test_headings_split_sections() {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        let document = r#"Opening notes written before any heading appear here.

# Core Profile
Viktor grew up in the undercity of Zaun.

## Technical Knowledge ##
The Hexcore reacts to organic matter and adapts over time.

### Empty
"#;

        let chunks = chunker.chunk(document, "viktor").unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].section, None);
        assert_eq!(chunks[1].section.as_deref(), Some("Core Profile"));
        assert_eq!(chunks[1].text, "Viktor grew up in the undercity of Zaun.");
        assert_eq!(chunks[2].section.as_deref(), Some("Technical Knowledge"));
        assert!(chunks[2].text.starts_with("The Hexcore"));
        assert!(!chunks.iter().any(|c| c.text.contains('#')));
    }

    #[test]
    fn test_small_passages_are_dropped_and_positions_stay_contiguous() {
        let chunker = Chunker::new(ChunkerConfig::default().with_min_passage_len(10)).unwrap();
        let document = "# A\nok\n# B\nThis body is long enough to keep.\n# C\n\n# D\nAnother body that survives.";

        let chunks = chunker.chunk(document, "notes").unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section.as_deref(), Some("B"));
        assert_eq!(chunks[1].section.as_deref(), Some("D"));
        let positions: Vec<usize> = chunks.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![0, 1]);
        assert_eq!(chunks[1].id, "notes#1");
    }

    #[test]
    fn test_long_sections_split_into_overlapping_windows() {
        let config = ChunkerConfig::default()
            .with_max_passage_len(200)
            .with_overlap_fraction(0.3);
        let chunker = Chunker::new(config).unwrap();
        let document = format!("## Research\n{}", long_section(40));

        let chunks = chunker.chunk(&document, "viktor_analysis").unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.len() <= 200, "passage too long: {}", chunk.text.len());
            assert_eq!(chunk.section.as_deref(), Some("Research"));
        }

        // Each window starts with a sentence the previous window ended with
        for pair in chunks.windows(2) {
            let first_sentence = pair[1].text.split(". ").next().unwrap();
            assert!(
                pair[0].text.contains(first_sentence),
                "no overlap between {:?} and {:?}",
                pair[0].text,
                pair[1].text
            );
        }

        // Every sentence survives somewhere
        for i in 0..40 {
            let needle = format!("Sentence number {i} about");
            assert!(chunks.iter().any(|c| c.text.contains(&needle)));
        }
    }

    #[test]
    fn test_part_numbering_only_for_split_sections() {
        let config = ChunkerConfig::default().with_max_passage_len(120);
        let chunker = Chunker::new(config).unwrap();
        let document = format!(
            "# Short\nA section that easily fits.\n# Long\n{}",
            long_section(12)
        );

        let chunks = chunker.chunk(&document, "analysis").unwrap();

        assert_eq!(chunks[0].part, None);
        let long: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.section.as_deref() == Some("Long"))
            .collect();
        let total = long.len();
        assert!(total > 1);
        for (i, chunk) in long.iter().enumerate() {
            assert_eq!(chunk.part, Some(PassagePart { index: i + 1, total }));
        }
        assert_eq!(long[0].label(), format!("analysis: Long (Part 1/{total})"));
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let config = ChunkerConfig::default().with_max_passage_len(150);
        let chunker = Chunker::new(config.clone()).unwrap();
        let document = format!("# One\n{}\n\n# Two\n{}", long_section(9), long_section(5));

        let first = chunker.chunk(&document, "doc").unwrap();
        let second = chunker.chunk(&document, "doc").unwrap();
        let fresh = Chunker::new(config).unwrap().chunk(&document, "doc").unwrap();

        assert_eq!(first, second);
        assert_eq!(first, fresh);
        assert!(first.windows(2).all(|w| w[0].position < w[1].position));
    }

    #[test]
    fn test_unbroken_multibyte_text_is_cut_on_char_boundaries() {
        let config = ChunkerConfig::default()
            .with_max_passage_len(50)
            .with_min_passage_len(1);
        let chunker = Chunker::new(config).unwrap();
        let document = "ÄÖÜ".repeat(60);

        let chunks = chunker.chunk(&document, "umlauts").unwrap();

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.len() <= 50));
        assert!(chunks.iter().all(|c| c.text.chars().all(|ch| "ÄÖÜ".contains(ch))));
    }

    #[test]
    fn test_empty_inputs() {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();

        assert!(chunker.chunk("", "empty").unwrap().is_empty());
        assert!(chunker.chunk("   \n\n  ", "blank").unwrap().is_empty());
        assert!(matches!(
            chunker.chunk("Some text that is long enough.", "  "),
            Err(ChunkError::EmptySourceId)
        ));
    }

    #[test]
    fn test_no_empty_passages_without_minimum_length() {
        let chunker = Chunker::new(ChunkerConfig::default().with_min_passage_len(0)).unwrap();
        let chunks = chunker
            .chunk(
                "# Hexcore\nThe Hexcore reacts to organic matter.\n# Empty\n\n# Cane\nHe has a cane.",
                "viktor_tech",
            )
            .unwrap();

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["The Hexcore reacts to organic matter.", "He has a cane."]
        );
        assert_eq!(chunks[0].id, "viktor_tech#0");
        assert_eq!(chunks[0].section.as_deref(), Some("Hexcore"));
        assert_eq!(chunks[1].id, "viktor_tech#1");
        assert_eq!(chunks[1].section.as_deref(), Some("Cane"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let zero = ChunkerConfig::default().with_max_passage_len(0);
        assert!(matches!(
            Chunker::new(zero),
            Err(ChunkError::InvalidConfig { .. })
        ));

        let too_much_overlap = ChunkerConfig::default().with_overlap_fraction(0.9);
        assert!(matches!(
            Chunker::new(too_much_overlap),
            Err(ChunkError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_embedding_text_leads_with_heading() {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        let chunks = chunker
            .chunk(
                "Viktor walks with a cane.\n# Hexcore\nIt reacts to organic matter.",
                "viktor",
            )
            .unwrap();

        assert_eq!(chunks[0].embedding_text(), "Viktor walks with a cane.");
        assert_eq!(
            chunks[1].embedding_text(),
            "Hexcore\n\nIt reacts to organic matter."
        );
        assert_eq!(chunks[1].text, "It reacts to organic matter.");
    }

    #[test]
    fn test_chunk_serializes_with_provenance() {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        let chunks = chunker
            .chunk("# Hexcore\nThe Hexcore reacts to organic matter.", "viktor_tech")
            .unwrap();

        let json = serde_json::to_value(&chunks[0]).unwrap();
        assert_eq!(json["source"], "viktor_tech");
        assert_eq!(json["section"], "Hexcore");
        assert_eq!(json["position"], 0);
        assert_eq!(chunks[0].to_string(), "[viktor_tech: Hexcore] The Hexcore reacts to organic matter.");
    }
}
