/// Query compilation and execution.
///
/// The core does not parse query text. It accepts operator trees,
/// resolves term leaves through the lexicon (unknown terms silently
/// become the empty list), and drives the root iterator, streaming
/// extents to a sink. Cancellation is cooperative: the driver checks a
/// flag between outer-loop iterations, never inside the iterators.
/// Storage errors recorded on the tree's side channel surface after
/// traversal.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{QuarryError, Result};
use crate::extent::{Extent, ExtentList, Offset, SideChannel, StoredList, VisibleExtents, MAX_OFFSET};
use crate::index::{Lexicon, TermPayload};
use crate::store::{FileStore, StoreFile};
use crate::sync::ReaderGate;

/// An operator tree, as produced by a parser outside the core.
#[derive(Debug, Clone)]
pub enum QueryNode {
    /// A term resolved through the lexicon.
    Term(String),
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
    /// Extents of `inner` lying inside some extent of `outer` (or, when
    /// inverted, inside none).
    ContainedIn {
        inner: Box<QueryNode>,
        outer: Box<QueryNode>,
        inverted: bool,
    },
    /// Extents of `outer` holding some extent of `inner` (or, when
    /// inverted, holding none).
    Containing {
        outer: Box<QueryNode>,
        inner: Box<QueryNode>,
        inverted: bool,
    },
    FromTo {
        from: Box<QueryNode>,
        to: Box<QueryNode>,
    },
    OneElement {
        start: Offset,
        end: Offset,
    },
    Range {
        width: Offset,
        max_offset: Offset,
    },
}

/// Rewrites operator trees into iterator trees.
pub struct QueryCompiler<'a> {
    lexicon: &'a dyn Lexicon,
    store: Option<&'a Arc<FileStore>>,
    errors: SideChannel,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(lexicon: &'a dyn Lexicon) -> QueryCompiler<'a> {
        QueryCompiler {
            lexicon,
            store: None,
            errors: SideChannel::new(),
        }
    }

    /// A compiler that can materialize on-disk posting leaves.
    pub fn with_store(lexicon: &'a dyn Lexicon, store: &'a Arc<FileStore>) -> QueryCompiler<'a> {
        QueryCompiler {
            lexicon,
            store: Some(store),
            errors: SideChannel::new(),
        }
    }

    /// The side channel shared by every leaf this compiler builds.
    pub fn errors(&self) -> SideChannel {
        self.errors.clone()
    }

    pub fn compile(&self, node: &QueryNode) -> Result<ExtentList> {
        match node {
            QueryNode::Term(term) => self.term_leaf(term),
            QueryNode::And(children) => Ok(ExtentList::and(
                children
                    .iter()
                    .map(|c| self.compile(c))
                    .collect::<Result<Vec<_>>>()?,
            )),
            QueryNode::Or(children) => Ok(ExtentList::or(
                children
                    .iter()
                    .map(|c| self.compile(c))
                    .collect::<Result<Vec<_>>>()?,
            )),
            QueryNode::ContainedIn {
                inner,
                outer,
                inverted,
            } => Ok(ExtentList::containment(
                self.compile(outer)?,
                self.compile(inner)?,
                false,
                *inverted,
            )),
            QueryNode::Containing {
                outer,
                inner,
                inverted,
            } => Ok(ExtentList::containment(
                self.compile(outer)?,
                self.compile(inner)?,
                true,
                *inverted,
            )),
            QueryNode::FromTo { from, to } => Ok(ExtentList::from_to(
                self.compile(from)?,
                self.compile(to)?,
            )),
            QueryNode::OneElement { start, end } => Ok(ExtentList::one(*start, *end)),
            QueryNode::Range { width, max_offset } => {
                Ok(ExtentList::range(*width, *max_offset))
            }
        }
    }

    /// Compile and tighten the tree so it only yields extents visible to
    /// the asking user.
    pub fn compile_secure(
        &self,
        node: &QueryNode,
        visible: &VisibleExtents,
    ) -> Result<ExtentList> {
        Ok(self.compile(node)?.make_secure(visible))
    }

    fn term_leaf(&self, term: &str) -> Result<ExtentList> {
        let entry = match self.lexicon.lookup(term) {
            Some(entry) => entry,
            // Unknown terms match nothing; this is not an error.
            None => return Ok(ExtentList::empty()),
        };
        match &entry.payload {
            TermPayload::Memory { compressed, .. } => {
                let postings =
                    crate::index::lexicon::decode_memory_payload(compressed, entry.posting_count)?;
                Ok(ExtentList::postings(postings))
            }
            TermPayload::Stored { file_no } => {
                let store = self.store.ok_or_else(|| {
                    QuarryError::Protocol(format!(
                        "term {} lives on disk but no store is attached",
                        term
                    ))
                })?;
                let file = StoreFile::open(store.clone(), *file_no)?;
                Ok(ExtentList::Stored(StoredList::open(
                    file,
                    self.errors.clone(),
                )?))
            }
        }
    }
}

/// Drives a compiled iterator tree and streams its extents to a sink.
pub struct QueryExecutor {
    cancel: Arc<AtomicBool>,
    gate: Option<Arc<ReaderGate>>,
}

impl Default for QueryExecutor {
    fn default() -> Self {
        QueryExecutor::new()
    }
}

impl QueryExecutor {
    pub fn new() -> QueryExecutor {
        QueryExecutor {
            cancel: Arc::new(AtomicBool::new(false)),
            gate: None,
        }
    }

    pub fn with_gate(gate: Arc<ReaderGate>) -> QueryExecutor {
        QueryExecutor {
            cancel: Arc::new(AtomicBool::new(false)),
            gate: Some(gate),
        }
    }

    /// Flag checked between result deliveries; set it from any thread to
    /// stop the executor at the next iteration.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Stream all extents of `list` within `[from, to]` into `sink`.
    /// The sink returns false to stop early. Returns the number of
    /// extents delivered; storage errors recorded during traversal take
    /// precedence over the count.
    pub fn run(
        &self,
        list: &mut ExtentList,
        errors: &SideChannel,
        from: Offset,
        to: Offset,
        sink: &mut dyn FnMut(Extent) -> bool,
    ) -> Result<u64> {
        let _pass = self.gate.as_ref().map(|g| g.enter());

        let mut delivered = 0u64;
        let mut position = from;
        while !self.cancel.load(Ordering::Relaxed) {
            match list.first_start_ge(position) {
                Some(e) if e.end <= to => {
                    delivered += 1;
                    position = e.start.saturating_add(1);
                    if !sink(e) {
                        break;
                    }
                }
                _ => break,
            }
        }

        if let Some(error) = errors.take().into_iter().next() {
            return Err(error);
        }
        Ok(delivered)
    }

    /// Collect instead of streaming.
    pub fn run_collect(
        &self,
        list: &mut ExtentList,
        errors: &SideChannel,
    ) -> Result<Vec<Extent>> {
        let mut out = Vec::new();
        self.run(list, errors, 0, MAX_OFFSET, &mut |e| {
            out.push(e);
            true
        })?;
        Ok(out)
    }
}
