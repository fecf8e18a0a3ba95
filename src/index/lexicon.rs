/// Term lexicon.
///
/// Maps term strings to posting lists. A hot (recently built) index keeps
/// each term's postings as an incrementally grown delta+vbyte buffer in
/// memory; terms flushed to the store are referenced by file handle and
/// decoded lazily at query time.
///
/// Stemming: at level >= 3, postings of a term with a stemmed form are
/// folded into the representative entry (the stem prefixed with '$'), and
/// the sorted iteration skips the folded term so no posting is emitted
/// twice.
use std::collections::BTreeMap;

use crate::codec::{
    decode_vbyte, encode_vbyte, next_segment_len, SegmentHeader, MAX_SEGMENT_SIZE,
    TARGET_SEGMENT_SIZE,
};
use crate::error::{QuarryError, Result};
use crate::extent::{ExtentList, Offset, MAX_OFFSET};
use crate::store::FileNo;

/// One compressed chunk of one term's posting list, sized by the segment
/// rule, as produced by the sorted iteration.
#[derive(Debug, Clone)]
pub struct TermChunk {
    pub term: String,
    pub header: SegmentHeader,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum TermPayload {
    /// Delta+vbyte compressed postings held in memory.
    Memory {
        compressed: Vec<u8>,
        last_posting: Offset,
    },
    /// Postings written to a store file.
    Stored { file_no: FileNo },
}

#[derive(Debug, Clone)]
pub struct LexiconEntry {
    pub term: String,
    pub posting_count: u64,
    pub stemmed_form: Option<String>,
    pub payload: TermPayload,
}

pub trait Lexicon {
    fn lookup(&self, term: &str) -> Option<&LexiconEntry>;
    fn term_count(&self) -> usize;
    /// Terms in sorted order, each cut into segment-sized chunks. Terms
    /// folded into their stem representative are skipped.
    fn iterate_sorted(&self) -> Box<dyn Iterator<Item = TermChunk> + '_>;
}

/// Marks the stem representative entry for a stem string.
pub fn stem_representative(stem: &str) -> String {
    format!("${}", stem)
}

pub struct MemoryLexicon {
    terms: BTreeMap<String, LexiconEntry>,
    stemming_level: u8,
    first_posting: Offset,
    last_posting: Offset,
    target_segment_size: usize,
    max_segment_size: usize,
}

impl MemoryLexicon {
    pub fn new(stemming_level: u8) -> MemoryLexicon {
        MemoryLexicon::with_segment_sizes(stemming_level, TARGET_SEGMENT_SIZE, MAX_SEGMENT_SIZE)
    }

    pub fn with_segment_sizes(
        stemming_level: u8,
        target_segment_size: usize,
        max_segment_size: usize,
    ) -> MemoryLexicon {
        MemoryLexicon {
            terms: BTreeMap::new(),
            stemming_level,
            first_posting: MAX_OFFSET,
            last_posting: 0,
            target_segment_size,
            max_segment_size,
        }
    }

    /// Record an occurrence of `term` at `posting`. Postings must arrive
    /// in increasing order per term.
    pub fn add_posting(&mut self, term: &str, posting: Offset) -> Result<()> {
        self.add_posting_stemmed(term, None, posting)
    }

    /// Like `add_posting`, with the term's stemmed form. At stemming
    /// level >= 3 the posting is also folded into the representative.
    pub fn add_posting_stemmed(
        &mut self,
        term: &str,
        stem: Option<&str>,
        posting: Offset,
    ) -> Result<()> {
        if posting < 0 {
            return Err(QuarryError::Protocol(format!(
                "negative posting for {}",
                term
            )));
        }
        self.append_to_entry(term, posting)?;
        if let Some(stem) = stem {
            let representative = stem_representative(stem);
            if representative != term {
                self.terms
                    .get_mut(term)
                    .expect("entry just created")
                    .stemmed_form = Some(representative.clone());
                if self.stemming_level >= 3 {
                    self.append_to_entry(&representative, posting)?;
                }
            }
        }
        self.first_posting = self.first_posting.min(posting);
        self.last_posting = self.last_posting.max(posting);
        Ok(())
    }

    fn append_to_entry(&mut self, term: &str, posting: Offset) -> Result<()> {
        let entry = self
            .terms
            .entry(term.to_string())
            .or_insert_with(|| LexiconEntry {
                term: term.to_string(),
                posting_count: 0,
                stemmed_form: None,
                payload: TermPayload::Memory {
                    compressed: Vec::new(),
                    last_posting: 0,
                },
            });
        match &mut entry.payload {
            TermPayload::Memory {
                compressed,
                last_posting,
            } => {
                let delta = if entry.posting_count == 0 {
                    posting
                } else if posting > *last_posting {
                    posting - *last_posting
                } else {
                    return Err(QuarryError::Protocol(format!(
                        "posting {} for {} is not increasing (last {})",
                        posting, term, last_posting
                    )));
                };
                encode_vbyte(compressed, delta as u64);
                *last_posting = posting;
                entry.posting_count += 1;
                Ok(())
            }
            TermPayload::Stored { .. } => Err(QuarryError::Protocol(format!(
                "term {} is already on disk",
                term
            ))),
        }
    }

    /// Replace a term's in-memory postings with a store-file reference.
    pub fn mark_stored(&mut self, term: &str, file_no: FileNo) -> Result<()> {
        let entry = self
            .terms
            .get_mut(term)
            .ok_or_else(|| QuarryError::NotFound(format!("term {} not in lexicon", term)))?;
        entry.payload = TermPayload::Stored { file_no };
        Ok(())
    }

    /// Decode the full posting list of one term.
    pub fn postings(&self, term: &str) -> Result<Option<Vec<Offset>>> {
        let entry = match self.terms.get(term) {
            Some(e) => e,
            None => return Ok(None),
        };
        match &entry.payload {
            TermPayload::Memory { compressed, .. } => {
                Ok(Some(decode_memory_payload(compressed, entry.posting_count)?))
            }
            TermPayload::Stored { .. } => Ok(None),
        }
    }

    /// An extent list for the term; unknown terms come back empty.
    pub fn term_list(&self, term: &str) -> Result<ExtentList> {
        match self.postings(term)? {
            Some(postings) => Ok(ExtentList::postings(postings)),
            None => Ok(ExtentList::empty()),
        }
    }

    /// Range of the token address space this lexicon covers.
    pub fn index_range(&self) -> (Offset, Offset) {
        (self.first_posting, self.last_posting)
    }

    pub fn extend_index_range(&mut self, first: Offset, last: Offset) {
        self.first_posting = self.first_posting.min(first);
        self.last_posting = self.last_posting.max(last);
    }

    fn skip_in_iteration(&self, entry: &LexiconEntry) -> bool {
        if self.stemming_level < 3 {
            return false;
        }
        match &entry.stemmed_form {
            Some(rep) => rep != &entry.term && self.terms.contains_key(rep),
            None => false,
        }
    }
}

pub(crate) fn decode_memory_payload(compressed: &[u8], count: u64) -> Result<Vec<Offset>> {
    let mut postings = Vec::with_capacity(count as usize);
    let mut pos = 0;
    let mut current: Offset = 0;
    for i in 0..count {
        let delta = decode_vbyte(compressed, &mut pos)? as Offset;
        current = if i == 0 { delta } else { current + delta };
        postings.push(current);
    }
    Ok(postings)
}

impl Lexicon for MemoryLexicon {
    fn lookup(&self, term: &str) -> Option<&LexiconEntry> {
        self.terms.get(term)
    }

    fn term_count(&self) -> usize {
        self.terms.len()
    }

    fn iterate_sorted(&self) -> Box<dyn Iterator<Item = TermChunk> + '_> {
        let target = self.target_segment_size;
        let max = self.max_segment_size;
        Box::new(
            self.terms
                .values()
                .filter(move |entry| !self.skip_in_iteration(entry))
                .flat_map(move |entry| {
                    let postings = match &entry.payload {
                        TermPayload::Memory { compressed, .. } => {
                            decode_memory_payload(compressed, entry.posting_count)
                                .unwrap_or_default()
                        }
                        TermPayload::Stored { .. } => Vec::new(),
                    };
                    let mut chunks = Vec::new();
                    let mut rest = postings.as_slice();
                    while !rest.is_empty() {
                        let take = next_segment_len(rest.len(), target, max);
                        let (head, tail) = rest.split_at(take);
                        let mut payload = Vec::new();
                        let mut previous = 0;
                        for (i, &p) in head.iter().enumerate() {
                            let delta = if i == 0 { p } else { p - previous };
                            encode_vbyte(&mut payload, delta as u64);
                            previous = p;
                        }
                        chunks.push(TermChunk {
                            term: entry.term.clone(),
                            header: SegmentHeader {
                                posting_count: head.len() as u32,
                                byte_length: payload.len() as u32,
                                first_element: head[0],
                                last_element: head[head.len() - 1],
                            },
                            payload,
                        });
                        rest = tail;
                    }
                    chunks
                }),
        )
    }
}
