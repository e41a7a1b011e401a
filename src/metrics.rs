use crate::fragment::FragmentKind;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and query activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    text_indexed: AtomicU64,
    tables_indexed: AtomicU64,
    images_indexed: AtomicU64,
    summary_failures: AtomicU64,
    queries_answered: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ingested document with its per-kind indexed counts and dropped fragments.
    pub fn record_ingestion(&self, indexed: &crate::fragment::KindCounts, failures: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        for kind in FragmentKind::ALL {
            let count = indexed.get(kind) as u64;
            self.counter(kind).fetch_add(count, Ordering::Relaxed);
        }
        self.summary_failures.fetch_add(failures, Ordering::Relaxed);
    }

    /// Record fragments dropped by an ingestion that indexed nothing.
    pub fn record_summary_failures(&self, failures: u64) {
        self.summary_failures.fetch_add(failures, Ordering::Relaxed);
    }

    /// Record a query that reached the language model.
    pub fn record_query(&self) {
        self.queries_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            text_indexed: self.text_indexed.load(Ordering::Relaxed),
            tables_indexed: self.tables_indexed.load(Ordering::Relaxed),
            images_indexed: self.images_indexed.load(Ordering::Relaxed),
            summary_failures: self.summary_failures.load(Ordering::Relaxed),
            queries_answered: self.queries_answered.load(Ordering::Relaxed),
        }
    }

    fn counter(&self, kind: FragmentKind) -> &AtomicU64 {
        match kind {
            FragmentKind::Text => &self.text_indexed,
            FragmentKind::Table => &self.tables_indexed,
            FragmentKind::Image => &self.images_indexed,
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents ingested since startup.
    pub documents_ingested: u64,
    /// Text fragments indexed.
    pub text_indexed: u64,
    /// Table fragments indexed.
    pub tables_indexed: u64,
    /// Image fragments indexed.
    pub images_indexed: u64,
    /// Fragments dropped because summarization failed.
    pub summary_failures: u64,
    /// Queries that produced a model answer.
    pub queries_answered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::KindCounts;

    #[test]
    fn records_ingestions_per_kind() {
        let metrics = PipelineMetrics::new();
        metrics.record_ingestion(
            &KindCounts {
                text: 2,
                table: 1,
                image: 1,
            },
            1,
        );
        metrics.record_ingestion(
            &KindCounts {
                text: 1,
                ..Default::default()
            },
            0,
        );
        metrics.record_query();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 2);
        assert_eq!(snapshot.text_indexed, 3);
        assert_eq!(snapshot.tables_indexed, 1);
        assert_eq!(snapshot.images_indexed, 1);
        assert_eq!(snapshot.summary_failures, 1);
        assert_eq!(snapshot.queries_answered, 1);
    }

    #[test]
    fn snapshot_starts_at_zero() {
        assert_eq!(PipelineMetrics::new().snapshot(), MetricsSnapshot::default());
    }
}
