//! Typed document fragments and the records derived from them.
//!
//! A [`Fragment`] is produced by extraction, enriched into a [`SummarizedFragment`] by the
//! summarizer, and finally split into a vector record and a [`ContentRecord`] by the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Closed set of content kinds understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    /// Merged prose blocks.
    Text,
    /// Table rendered as text.
    Table,
    /// Figure stored on disk.
    Image,
}

impl FragmentKind {
    /// Every kind, in prompt order.
    pub const ALL: [FragmentKind; 3] = [FragmentKind::Text, FragmentKind::Table, FragmentKind::Image];

    /// Stable lowercase tag used in persisted records and vector payloads.
    pub const fn as_str(self) -> &'static str {
        match self {
            FragmentKind::Text => "text",
            FragmentKind::Table => "table",
            FragmentKind::Image => "image",
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kind tag outside the closed [`FragmentKind`] set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported fragment kind: {0}")]
pub struct UnsupportedKind(pub String);

impl FromStr for FragmentKind {
    type Err = UnsupportedKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "table" => Ok(Self::Table),
            "image" => Ok(Self::Image),
            _ => Err(UnsupportedKind(s.to_string())),
        }
    }
}

/// One extracted unit of document content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Text block content.
    Text(String),
    /// Table content as text.
    Table(String),
    /// Reference to an image file materialized by extraction.
    Image(PathBuf),
}

impl Fragment {
    /// Kind tag of this fragment.
    pub fn kind(&self) -> FragmentKind {
        match self {
            Fragment::Text(_) => FragmentKind::Text,
            Fragment::Table(_) => FragmentKind::Table,
            Fragment::Image(_) => FragmentKind::Image,
        }
    }

    /// Original payload as stored in the content store (image paths are stored verbatim).
    pub fn payload(&self) -> String {
        match self {
            Fragment::Text(text) | Fragment::Table(text) => text.clone(),
            Fragment::Image(path) => path.to_string_lossy().into_owned(),
        }
    }
}

/// Fragment paired with the summary that will be embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarizedFragment {
    /// Source fragment.
    pub fragment: Fragment,
    /// Non-empty model summary.
    pub summary: String,
}

/// Original-content facet of an index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Identifier shared with the vector record.
    pub id: String,
    /// Fragment kind.
    pub kind: FragmentKind,
    /// Unsummarized payload.
    pub payload: String,
}

/// Per-kind tallies reported by ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    /// Text fragments.
    pub text: usize,
    /// Table fragments.
    pub table: usize,
    /// Image fragments.
    pub image: usize,
}

impl KindCounts {
    /// Increment the counter for `kind`.
    pub fn record(&mut self, kind: FragmentKind) {
        match kind {
            FragmentKind::Text => self.text += 1,
            FragmentKind::Table => self.table += 1,
            FragmentKind::Image => self.image += 1,
        }
    }

    /// Counter value for `kind`.
    pub fn get(&self, kind: FragmentKind) -> usize {
        match kind {
            FragmentKind::Text => self.text,
            FragmentKind::Table => self.table,
            FragmentKind::Image => self.image,
        }
    }

    /// Sum over all kinds.
    pub fn total(&self) -> usize {
        self.text + self.table + self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_parse_case_insensitively() {
        assert_eq!("TABLE".parse::<FragmentKind>(), Ok(FragmentKind::Table));
        assert_eq!(" image ".parse::<FragmentKind>(), Ok(FragmentKind::Image));
        let error = "audio".parse::<FragmentKind>().expect_err("closed set");
        assert_eq!(error, UnsupportedKind("audio".into()));
    }

    #[test]
    fn kind_serializes_as_lowercase_tag() {
        let record = ContentRecord {
            id: "a".into(),
            kind: FragmentKind::Table,
            payload: "| x |".into(),
        };
        let json = serde_json::to_value(&record).expect("json");
        assert_eq!(json["kind"], "table");
    }

    #[test]
    fn image_payload_is_the_path_reference() {
        let fragment = Fragment::Image(PathBuf::from("figures/figure-1.png"));
        assert_eq!(fragment.kind(), FragmentKind::Image);
        assert_eq!(fragment.payload(), "figures/figure-1.png");
    }

    #[test]
    fn counts_track_each_kind() {
        let mut counts = KindCounts::default();
        counts.record(FragmentKind::Text);
        counts.record(FragmentKind::Text);
        counts.record(FragmentKind::Image);
        assert_eq!(counts.get(FragmentKind::Text), 2);
        assert_eq!(counts.get(FragmentKind::Table), 0);
        assert_eq!(counts.total(), 3);
    }
}
