//! ChangeDetector: per-document change tracking and skip detection
//!
//! Accumulates reported edit ranges per document until a scan cycle consumes
//! them, and keeps the content hash of the last completed cycle so unchanged
//! documents can be skipped. The hash is FNV-1a over the length and a bounded
//! sample of the text (prefix, suffix and an evenly strided middle), so its
//! cost does not grow with document size.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Bytes hashed from each end of the text
const EDGE_SAMPLE: usize = 512;
/// Bytes sampled from the middle of the text
const STRIDE_SAMPLES: usize = 256;

// =============================================================================
// Types
// =============================================================================

/// A reported edit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChange {
    pub from: usize,
    pub to: usize,
    /// Inserted text
    pub text: String,
    pub document_id: String,
    /// Unix millis
    pub timestamp: i64,
    /// Surrounding sentence, when the editor knows it
    pub context: Option<String>,
}

impl DocumentChange {
    pub fn new(document_id: &str, from: usize, to: usize, text: &str) -> Self {
        Self {
            from,
            to,
            text: text.to_string(),
            document_id: document_id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = Some(context.to_string());
        self
    }
}

/// Result of change detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeResult {
    /// True if content differs from the last completed cycle
    pub has_changed: bool,
    pub content_hash: u64,
    /// Hash recorded by the last completed cycle (if any)
    pub previous_hash: Option<u64>,
}

#[derive(Debug, Default)]
struct DocumentState {
    changes: Vec<DocumentChange>,
    last_hash: Option<u64>,
}

// =============================================================================
// ChangeDetector
// =============================================================================

#[derive(Debug, Default)]
pub struct ChangeDetector {
    documents: HashMap<String, DocumentState>,
    /// Number of checks performed
    check_count: u64,
    /// Number of skipped (unchanged) checks
    skip_count: u64,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an edit to its document's pending list.
    pub fn record(&mut self, change: DocumentChange) {
        self.documents
            .entry(change.document_id.clone())
            .or_default()
            .changes
            .push(change);
    }

    pub fn pending_changes(&self, document_id: &str) -> Vec<DocumentChange> {
        self.documents
            .get(document_id)
            .map(|d| d.changes.clone())
            .unwrap_or_default()
    }

    pub fn pending_count(&self, document_id: &str) -> usize {
        self.documents.get(document_id).map(|d| d.changes.len()).unwrap_or(0)
    }

    /// Compare `text` against the last completed cycle without committing.
    pub fn check(&mut self, document_id: &str, text: &str) -> ChangeResult {
        self.check_count += 1;

        let content_hash = Self::compute_hash(text);
        let previous_hash = self.documents.get(document_id).and_then(|d| d.last_hash);
        let has_changed = previous_hash != Some(content_hash);

        if !has_changed {
            self.skip_count += 1;
        }

        ChangeResult {
            has_changed,
            content_hash,
            previous_hash,
        }
    }

    /// Record the hash of a completed cycle.
    pub fn commit(&mut self, document_id: &str, content_hash: u64) {
        self.documents.entry(document_id.to_string()).or_default().last_hash = Some(content_hash);
    }

    /// Drop the first `count` pending changes. Changes recorded while the
    /// cycle ran stay pending.
    pub fn clear_consumed(&mut self, document_id: &str, count: usize) {
        if let Some(state) = self.documents.get_mut(document_id) {
            let count = count.min(state.changes.len());
            state.changes.drain(..count);
        }
    }

    pub fn last_hash(&self, document_id: &str) -> Option<u64> {
        self.documents.get(document_id).and_then(|d| d.last_hash)
    }

    /// Forget a document entirely (closed or deleted).
    pub fn forget(&mut self, document_id: &str) {
        self.documents.remove(document_id);
    }

    /// Get skip rate as percentage
    pub fn skip_rate(&self) -> f64 {
        if self.check_count == 0 {
            return 0.0;
        }
        (self.skip_count as f64 / self.check_count as f64) * 100.0
    }

    pub fn check_count(&self) -> u64 {
        self.check_count
    }

    pub fn skip_count(&self) -> u64 {
        self.skip_count
    }

    pub fn reset(&mut self) {
        self.documents.clear();
        self.check_count = 0;
        self.skip_count = 0;
    }

    /// Length plus FNV-1a over a bounded sample of the text.
    pub fn compute_hash(text: &str) -> u64 {
        let bytes = text.as_bytes();
        let mut hash = FNV_OFFSET;
        let mut feed = |byte: u8| {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        };

        for byte in (bytes.len() as u64).to_le_bytes() {
            feed(byte);
        }

        if bytes.len() <= EDGE_SAMPLE * 2 + STRIDE_SAMPLES {
            bytes.iter().for_each(|&b| feed(b));
            return hash;
        }

        bytes[..EDGE_SAMPLE].iter().for_each(|&b| feed(b));
        let middle = &bytes[EDGE_SAMPLE..bytes.len() - EDGE_SAMPLE];
        let stride = middle.len() / STRIDE_SAMPLES;
        for i in 0..STRIDE_SAMPLES {
            feed(middle[i * stride]);
        }
        bytes[bytes.len() - EDGE_SAMPLE..].iter().for_each(|&b| feed(b));
        hash
    }
}

// =============================================================================
// Tests
// =============================================================================
