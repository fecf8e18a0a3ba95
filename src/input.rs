/// Collaborator interfaces of the core: token input, external text
/// conversion, and the document caches. The core never implements
/// tokenization or conversion itself; it consumes these traits.
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;

use crate::error::Result;
use crate::extent::Offset;

/// One token produced by the filter layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub bytes: Vec<u8>,
    /// Ordinal of the token within its file.
    pub sequence_no: u32,
    /// Byte position of the token in the source file.
    pub file_position: i64,
    /// Landmark tokens are safe positions to resume tokenization from.
    pub is_landmark: bool,
}

pub trait TokenStream {
    fn next_token(&mut self) -> Option<Token>;

    /// Re-position the stream; returns false if the position cannot be
    /// resumed from.
    fn seek(&mut self, file_position: i64, sequence_no: u32) -> bool;
}

/// Converts a document (PDF, PostScript, office formats) into raw text
/// through some external process. Implementations are expected to be
/// idempotent so results can be cached.
pub trait TextExtractor {
    fn extract(&mut self, path: &Path) -> Result<Vec<u8>>;
}

/// Maps the start offset of an indexed document to its external id.
/// A miss is never fatal; callers re-derive from source.
pub struct DocIdCache {
    cache: LruCache<Offset, String>,
}

impl DocIdCache {
    pub fn new(capacity: usize) -> DocIdCache {
        DocIdCache {
            cache: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
        }
    }

    pub fn get(&mut self, doc_start: Offset) -> Option<&str> {
        self.cache.get(&doc_start).map(String::as_str)
    }

    pub fn insert(&mut self, doc_start: Offset, doc_id: String) {
        self.cache.put(doc_start, doc_id);
    }

    /// Look up an id, re-deriving it on a miss.
    pub fn get_or_derive<F>(&mut self, doc_start: Offset, derive: F) -> Result<String>
    where
        F: FnOnce() -> Result<String>,
    {
        if let Some(id) = self.cache.get(&doc_start) {
            return Ok(id.clone());
        }
        let id = derive()?;
        self.cache.put(doc_start, id.clone());
        Ok(id)
    }
}

/// Caches extracted document text by document id.
pub struct DocumentCache {
    cache: LruCache<String, Vec<u8>>,
}

impl DocumentCache {
    pub fn new(capacity: usize) -> DocumentCache {
        DocumentCache {
            cache: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
        }
    }

    pub fn get(&mut self, doc_id: &str) -> Option<&[u8]> {
        self.cache.get(doc_id).map(Vec::as_slice)
    }

    pub fn insert(&mut self, doc_id: String, text: Vec<u8>) {
        self.cache.put(doc_id, text);
    }

    pub fn get_or_load<F>(&mut self, doc_id: &str, load: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        if let Some(text) = self.cache.get(doc_id) {
            return Ok(text.clone());
        }
        let text = load()?;
        self.cache.put(doc_id.to_string(), text.clone());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_id_cache_rederives_on_miss() {
        let mut cache = DocIdCache::new(2);
        let mut derivations = 0;
        for _ in 0..3 {
            let id = cache
                .get_or_derive(1000, || {
                    derivations += 1;
                    Ok("doc-1000".to_string())
                })
                .unwrap();
            assert_eq!(id, "doc-1000");
        }
        assert_eq!(derivations, 1);
    }

    #[test]
    fn test_document_cache_evicts_lru() {
        let mut cache = DocumentCache::new(2);
        cache.insert("a".into(), b"aaa".to_vec());
        cache.insert("b".into(), b"bbb".to_vec());
        assert!(cache.get("a").is_some());
        cache.insert("c".into(), b"ccc".to_vec()); // evicts "b"
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }
}
