//! KittScan: document scanning and fact extraction
//!
//! Turns free-form documents into structured facts: entities declared with
//! bracket syntax, relationships between them, implicit entity mentions and
//! temporal expressions.
//!
//! # Architecture
//!
//! - `orchestrator.rs` - ScanOrchestrator: debounced per-document scan cycles
//!   that register entities, triples, mention counts and inferred
//!   relationships with the host's registries
//! - `document.rs` - DocumentCortex: single synchronous `scan()` (WASM facade)
//! - `syntax.rs` - Pattern extraction (entities, triples, links, tags, mentions)
//! - `enrich.rs` - Confidence enrichment and entity disambiguation
//! - `relation.rs` - RelationCortex: rule-based relationship inference
//! - `worker.rs` - RelationWorker: off-thread inference for long documents
//! - `implicit.rs` - ImplicitCortex: plain-text entity mentions via Aho-Corasick
//! - `temporal.rs` - TemporalCortex: temporal expressions and custom calendars
//! - `change.rs` - ChangeDetector: content-hash skip detection
//! - `registry.rs` - Host registry traits and in-memory implementations
//!
//! # Usage (WASM)
//! ```javascript,ignore
//! import init, { DocumentCortex } from 'kittscan';
//!
//! await init();
//!
//! const cortex = new DocumentCortex();
//! cortex.hydrateEntities([
//!   { id: 'e1', label: 'Frodo', kind: 'CHARACTER', aliases: ['Mr. Frodo'] }
//! ]);
//!
//! const result = cortex.scan("[CHARACTER|Sam] met Frodo on Monday.", []);
//! console.log(result.relations);  // Sam <-> Frodo
//! console.log(result.temporal);   // Monday
//! ```

pub mod scanner;

pub use scanner::*;

use wasm_bindgen::prelude::*;

// When the `wee_alloc` feature is enabled, use `wee_alloc` as the global
// allocator for smaller WASM bundle size.
#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn main() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

#[wasm_bindgen]
pub fn version() -> String {
    format!("kittscan v{}", env!("CARGO_PKG_VERSION"))
}
