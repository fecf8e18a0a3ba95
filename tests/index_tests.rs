/// Index-layer integration: codec round-trips, lexicon to store to lazy
/// leaf, index-to-text filtering, and address-space transformations.
use std::sync::Arc;

use quarry::codec;
use quarry::extent::{Extent, ExtentList, Offset, SideChannel, StoredList, MAX_OFFSET};
use quarry::index::postings_file;
use quarry::index::{
    AddressSpaceTransformation, IndexToText, Lexicon, MemoryLexicon, TransformationRule,
};
use quarry::store::{FileStore, StoreFile};
use tempfile::TempDir;

struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
    fn below(&mut self, max: u64) -> u64 {
        self.next() % max
    }
}

fn random_postings(rng: &mut Rng, len: usize, max_gap: u64) -> Vec<Offset> {
    let mut postings = Vec::with_capacity(len);
    let mut position: Offset = 0;
    for _ in 0..len {
        position += 1 + rng.below(max_gap) as Offset;
        postings.push(position);
    }
    postings
}

// ── P3: codec round-trip ──

#[test]
fn p3_codec_roundtrip_random() {
    for seed in 1..30 {
        let mut rng = Rng::new(seed * 7919);
        let postings = random_postings(&mut rng, 1 + seed as usize * 13, 1 << (seed % 40));
        let encoded = codec::encode_postings(&postings);
        let decoded = codec::decode_postings(&encoded, postings.len()).unwrap();
        assert_eq!(decoded, postings, "seed {}", seed);

        // Exact byte accounting: one byte per 7 bits of each delta.
        let mut expected = 0usize;
        let mut previous = 0;
        for (i, &p) in postings.iter().enumerate() {
            let delta = if i == 0 { p as u64 } else { (p - previous) as u64 };
            expected += (64 - delta.max(1).leading_zeros() as usize).div_ceil(7).max(1);
            previous = p;
        }
        assert_eq!(encoded.len(), expected, "seed {}", seed);
    }
}

// ── lexicon → store → lazy leaf pipeline ──

#[test]
fn build_store_and_query_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.store");
    let store = Arc::new(FileStore::create(&path, 512, 128, 32 * 1024).unwrap());

    let mut rng = Rng::new(99);
    let mut lexicon = MemoryLexicon::with_segment_sizes(0, 32, 64);
    let terms = ["alpha", "beta", "gamma"];
    let mut expected: Vec<Vec<Offset>> = Vec::new();
    for term in &terms {
        let postings = random_postings(&mut rng, 300, 25);
        for &p in &postings {
            lexicon.add_posting(term, p).unwrap();
        }
        expected.push(postings);
    }

    // Flush every term to its own store file via the chunk iteration.
    let mut current: Option<(String, Vec<Offset>)> = None;
    let mut flushed: Vec<(String, Vec<Offset>)> = Vec::new();
    for chunk in lexicon.iterate_sorted() {
        let postings = codec::decode_postings(&chunk.payload, chunk.header.posting_count as usize)
            .unwrap();
        match &mut current {
            Some((term, acc)) if *term == chunk.term => acc.extend(postings),
            _ => {
                if let Some(done) = current.take() {
                    flushed.push(done);
                }
                current = Some((chunk.term.clone(), postings));
            }
        }
    }
    if let Some(done) = current.take() {
        flushed.push(done);
    }

    for (term, postings) in &flushed {
        let file_no = postings_file::write_postings_with_sizes(&store, postings, 32, 64).unwrap();
        lexicon.mark_stored(term, file_no).unwrap();
    }

    // Every stored list answers exactly like the original postings.
    for (i, term) in terms.iter().enumerate() {
        let entry = lexicon.lookup(term).unwrap();
        let file_no = match &entry.payload {
            quarry::index::TermPayload::Stored { file_no } => *file_no,
            _ => panic!("term should be stored"),
        };
        let errors = SideChannel::new();
        let file = StoreFile::open(store.clone(), file_no).unwrap();
        let mut stored = StoredList::open(file, errors.clone()).unwrap();
        let mut memory = ExtentList::postings(expected[i].clone());

        let mut rng = Rng::new(1234 + i as u64);
        for _ in 0..200 {
            let probe = rng.below(9000) as Offset - 100;
            assert_eq!(
                stored.first_start_ge(probe),
                memory.first_start_ge(probe),
                "term {} probe {}",
                term,
                probe
            );
            assert_eq!(
                stored.last_end_le(probe),
                memory.last_end_le(probe),
                "term {} probe {}",
                term,
                probe
            );
        }
        assert!(errors.is_empty());
    }
}

#[test]
fn lexicon_chunks_respect_order_across_terms() {
    let mut lexicon = MemoryLexicon::with_segment_sizes(0, 16, 32);
    let mut rng = Rng::new(4242);
    for term in ["one", "two", "three", "four"] {
        for p in random_postings(&mut rng, 100, 10) {
            lexicon.add_posting(term, p).unwrap();
        }
    }
    let chunks: Vec<_> = lexicon.iterate_sorted().collect();
    let mut terms_in_order: Vec<&str> = chunks.iter().map(|c| c.term.as_str()).collect();
    terms_in_order.dedup();
    assert_eq!(terms_in_order, vec!["four", "one", "three", "two"]);
    for chunk in &chunks {
        assert!(chunk.header.posting_count <= 32);
        assert_eq!(chunk.header.byte_length as usize, chunk.payload.len());
    }
}

// ── index-to-text ──

#[test]
fn index_to_text_tracks_token_positions() {
    let dir = TempDir::new().unwrap();
    let map = IndexToText::create(&dir.path().join("index.map")).unwrap();

    // Three "files" of tokens with byte positions.
    let mut byte_pos = 0i64;
    for token in 0..3000i64 {
        map.append(token, byte_pos).unwrap();
        byte_pos += 5 + (token % 7);
    }

    let (idx, _) = map.last_smaller_eq(1500).unwrap().unwrap();
    assert_eq!(idx, 1500);
    let (idx, _) = map.last_smaller_eq(MAX_OFFSET).unwrap().unwrap();
    assert_eq!(idx, 2999);

    // Filter down to one file's range and verify the edges.
    let mut visible = ExtentList::vector(vec![Extent::new(1000, 1999)]);
    map.filter(&mut visible).unwrap();
    assert_eq!(map.len(), 1000);
    assert_eq!(map.last_smaller_eq(999).unwrap(), None);
    assert!(map.last_smaller_eq(1000).unwrap().is_some());
    let (idx, _) = map.last_smaller_eq(MAX_OFFSET).unwrap().unwrap();
    assert_eq!(idx, 1999);
}

// ── P7: address transform bijection ──

#[test]
fn p7_transform_roundtrip_random() {
    for seed in 1..20 {
        let mut rng = Rng::new(seed * 523);
        // Disjoint source intervals with random disjoint destinations.
        let mut rules = Vec::new();
        let mut src: Offset = 0;
        let mut dst: Offset = 1_000_000;
        for _ in 0..8 {
            let len = 1 + rng.below(50) as u32;
            src += rng.below(200) as Offset + 1;
            dst += rng.below(200) as Offset + len as Offset;
            rules.push(TransformationRule {
                source: src,
                destination: dst,
                length: len,
            });
            src += len as Offset;
        }
        let transform = AddressSpaceTransformation::new(&rules);
        let inverse = transform.invert();

        for rule in &rules {
            for probe in [0, rule.length as Offset / 2, rule.length as Offset - 1] {
                let p = rule.source + probe;
                let mut forward = vec![p];
                transform.transform(&mut forward);
                assert_eq!(forward[0], rule.destination + probe);
                inverse.transform(&mut forward);
                assert_eq!(forward, vec![p], "seed {} point {}", seed, p);
            }
        }
    }
}

#[test]
fn transform_applies_to_posting_arrays() {
    let mut rng = Rng::new(31);
    let postings = random_postings(&mut rng, 200, 15);
    // Move the middle third far away.
    let lo = postings[60];
    let hi = postings[140];
    let rules = [TransformationRule {
        source: lo,
        destination: 100_000,
        length: (hi - lo + 1) as u32,
    }];
    let transform = AddressSpaceTransformation::new(&rules);

    let mut moved = postings.clone();
    transform.transform(&mut moved);
    assert!(moved.windows(2).all(|w| w[0] < w[1]));
    let relocated = moved.iter().filter(|&&p| p >= 100_000).count();
    assert_eq!(relocated, 81); // postings[60..=140]
}
