//! Parsing collaborator contract and its memoization cache.
//!
//! The engine never inspects cell source itself: an injected
//! [`CellParser`] extracts the imported/exported name sets, and the
//! engine memoizes the outcome per cell in an explicit [`ParseCache`]
//! keyed by a hash of the source text.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::cell::CellId;
use crate::error::Result;

/// The parsed shape of one code cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCell {
    /// Top-level names this cell reads from other cells.
    pub consumed: Vec<String>,
    /// Top-level names this cell defines for other cells.
    pub created: Vec<String>,
    /// The executable form handed to the runner. For most languages this
    /// is the source text unchanged.
    pub body: Arc<str>,
}

impl ParsedCell {
    /// A parse with no imports or exports, used for cells that are never
    /// analyzed (text cells).
    pub fn empty(body: impl Into<Arc<str>>) -> Self {
        ParsedCell {
            consumed: Vec::new(),
            created: Vec::new(),
            body: body.into(),
        }
    }
}

/// Name-extraction collaborator, supplied by the embedding application.
pub trait CellParser: Send + Sync {
    fn parse(&self, code: &str) -> Result<ParsedCell>;
}

/// A settled parse: either the extracted shape or the parser's error
/// message. Both arms are cheap to clone so the cache can hand them out
/// freely.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Parsed(Arc<ParsedCell>),
    Failed(Arc<str>),
}

impl ParseOutcome {
    /// Synthesizes a successful empty parse without touching the parser.
    pub fn empty(body: impl Into<Arc<str>>) -> Self {
        ParseOutcome::Parsed(Arc::new(ParsedCell::empty(body)))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ParseOutcome::Parsed(_))
    }

    pub fn ok(&self) -> Option<&Arc<ParsedCell>> {
        match self {
            ParseOutcome::Parsed(parsed) => Some(parsed),
            ParseOutcome::Failed(_) => None,
        }
    }

    pub fn err(&self) -> Option<&str> {
        match self {
            ParseOutcome::Parsed(_) => None,
            ParseOutcome::Failed(message) => Some(message),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    code_hash: u64,
    outcome: ParseOutcome,
}

/// Per-cell parse memoization, keyed by `(cell id, code hash)`.
///
/// Owned by the engine and threaded through every scheduling decision;
/// entries are invalidated implicitly when a cell's code changes and
/// evicted explicitly when the cell is torn down.
#[derive(Debug, Default)]
pub struct ParseCache {
    entries: FxHashMap<CellId, CacheEntry>,
}

impl ParseCache {
    pub fn new() -> Self {
        ParseCache::default()
    }

    /// Returns the memoized outcome when the code is unchanged, otherwise
    /// invokes the parser and stores the fresh outcome.
    pub fn parse(&mut self, parser: &dyn CellParser, id: CellId, code: &str) -> ParseOutcome {
        let code_hash = content_hash(code);
        if let Some(entry) = self.entries.get(&id) {
            if entry.code_hash == code_hash {
                return entry.outcome.clone();
            }
        }
        let outcome = match parser.parse(code) {
            Ok(parsed) => ParseOutcome::Parsed(Arc::new(parsed)),
            Err(error) => ParseOutcome::Failed(error.to_string().into()),
        };
        self.entries.insert(
            id,
            CacheEntry {
                code_hash,
                outcome: outcome.clone(),
            },
        );
        outcome
    }

    /// Drops the entry for a torn-down cell.
    pub fn evict(&mut self, id: CellId) {
        self.entries.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn content_hash(code: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    code.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::Error;

    struct CountingParser {
        calls: AtomicUsize,
    }

    impl CountingParser {
        fn new() -> Self {
            CountingParser {
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CellParser for CountingParser {
        fn parse(&self, code: &str) -> Result<ParsedCell> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if code.contains('!') {
                return Err(Error::Parse(format!("unexpected token in `{code}`")));
            }
            Ok(ParsedCell {
                consumed: vec![],
                created: vec![code.to_string()],
                body: code.into(),
            })
        }
    }

    #[test]
    fn test_cache_hit_skips_parser() {
        let parser = CountingParser::new();
        let mut cache = ParseCache::new();
        let first = cache.parse(&parser, CellId(0), "x");
        let second = cache.parse(&parser, CellId(0), "x");
        assert_eq!(parser.calls(), 1);
        assert_eq!(first.ok().unwrap().created, vec!["x".to_string()]);
        assert!(second.is_ok());
    }

    #[test]
    fn test_code_change_invalidates() {
        let parser = CountingParser::new();
        let mut cache = ParseCache::new();
        cache.parse(&parser, CellId(0), "x");
        let changed = cache.parse(&parser, CellId(0), "y");
        assert_eq!(parser.calls(), 2);
        assert_eq!(changed.ok().unwrap().created, vec!["y".to_string()]);
    }

    #[test]
    fn test_distinct_cells_cached_separately() {
        let parser = CountingParser::new();
        let mut cache = ParseCache::new();
        cache.parse(&parser, CellId(0), "x");
        cache.parse(&parser, CellId(1), "x");
        assert_eq!(parser.calls(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failures_are_cached_too() {
        let parser = CountingParser::new();
        let mut cache = ParseCache::new();
        let failed = cache.parse(&parser, CellId(0), "!");
        assert!(failed.err().unwrap().contains("parse error"));
        cache.parse(&parser, CellId(0), "!");
        assert_eq!(parser.calls(), 1);
    }

    #[test]
    fn test_evict_forces_reparse() {
        let parser = CountingParser::new();
        let mut cache = ParseCache::new();
        cache.parse(&parser, CellId(0), "x");
        cache.evict(CellId(0));
        assert!(cache.is_empty());
        cache.parse(&parser, CellId(0), "x");
        assert_eq!(parser.calls(), 2);
    }
}
