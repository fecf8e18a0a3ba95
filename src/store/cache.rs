/// Page cache for the file store: a queue of page slots (arena-backed
/// doubly-linked list) plus a hash map from page number to slot. Work
/// mode is LRU (hits move the slot to the front) or FIFO (insertion
/// order only). Dirty slots are written back on eviction and on flush.
use std::collections::HashMap;

use crate::config::CacheMode;
use crate::store::PageNo;

pub struct PageCache {
    page_size: usize,
    capacity: usize,
    mode: CacheMode,
    slots: Vec<Slot>,
    free_slots: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    map: HashMap<PageNo, usize>,
}

struct Slot {
    page: PageNo,
    dirty: bool,
    data: Box<[u8]>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl PageCache {
    /// A cache holding up to `capacity` pages. Callers must not construct
    /// a zero-capacity cache; disable caching instead.
    pub fn new(page_size: usize, capacity: usize, mode: CacheMode) -> PageCache {
        assert!(capacity > 0);
        PageCache {
            page_size,
            capacity,
            mode,
            slots: Vec::new(),
            free_slots: Vec::new(),
            head: None,
            tail: None,
            map: HashMap::new(),
        }
    }

    pub fn contains(&self, page: PageNo) -> bool {
        self.map.contains_key(&page)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[idx].prev = None;
        self.slots[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = None;
        self.slots[idx].next = self.head;
        if let Some(h) = self.head {
            self.slots[h].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.mode == CacheMode::Lru && self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    /// Copy bytes out of a cached page. Returns false on miss.
    pub fn read(&mut self, page: PageNo, offset: usize, buf: &mut [u8]) -> bool {
        let idx = match self.map.get(&page) {
            Some(&idx) => idx,
            None => return false,
        };
        buf.copy_from_slice(&self.slots[idx].data[offset..offset + buf.len()]);
        self.touch(idx);
        true
    }

    /// Modify bytes of a cached page and mark it dirty. False on miss.
    pub fn write(&mut self, page: PageNo, offset: usize, data: &[u8]) -> bool {
        let idx = match self.map.get(&page) {
            Some(&idx) => idx,
            None => return false,
        };
        self.slots[idx].data[offset..offset + data.len()].copy_from_slice(data);
        self.slots[idx].dirty = true;
        self.touch(idx);
        true
    }

    /// Load a page into the cache. If a slot had to be evicted and held
    /// unwritten changes, its page number and data are returned so the
    /// caller can write them back.
    pub fn insert(
        &mut self,
        page: PageNo,
        data: Vec<u8>,
        dirty: bool,
    ) -> Option<(PageNo, Box<[u8]>)> {
        debug_assert_eq!(data.len(), self.page_size);
        if let Some(&idx) = self.map.get(&page) {
            self.slots[idx].data = data.into_boxed_slice();
            self.slots[idx].dirty = dirty;
            self.touch(idx);
            return None;
        }

        let mut evicted = None;
        if self.map.len() >= self.capacity {
            let victim = self.tail.expect("non-empty cache has a tail");
            self.unlink(victim);
            self.map.remove(&self.slots[victim].page);
            if self.slots[victim].dirty {
                let old = std::mem::replace(
                    &mut self.slots[victim].data,
                    Vec::new().into_boxed_slice(),
                );
                evicted = Some((self.slots[victim].page, old));
            }
            self.free_slots.push(victim);
        }

        let slot = Slot {
            page,
            dirty,
            data: data.into_boxed_slice(),
            prev: None,
            next: None,
        };
        let idx = match self.free_slots.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.map.insert(page, idx);
        self.push_front(idx);
        evicted
    }

    /// Replace the content of a cached page after a direct full-page
    /// write; the slot is clean afterwards. No-op if the page is absent.
    pub fn refresh(&mut self, page: PageNo, data: &[u8]) {
        if let Some(&idx) = self.map.get(&page) {
            self.slots[idx].data.copy_from_slice(data);
            self.slots[idx].dirty = false;
        }
    }

    /// Drop a page from the cache, returning its data if it was dirty.
    pub fn remove(&mut self, page: PageNo) -> Option<(PageNo, Box<[u8]>)> {
        let idx = self.map.remove(&page)?;
        self.unlink(idx);
        self.free_slots.push(idx);
        if self.slots[idx].dirty {
            let data =
                std::mem::replace(&mut self.slots[idx].data, Vec::new().into_boxed_slice());
            Some((page, data))
        } else {
            None
        }
    }

    /// All dirty pages, cleanest path to flush: entries stay cached but
    /// are marked clean.
    pub fn drain_dirty(&mut self) -> Vec<(PageNo, Box<[u8]>)> {
        let mut dirty = Vec::new();
        let live: Vec<usize> = self.map.values().copied().collect();
        for idx in live {
            let slot = &mut self.slots[idx];
            if slot.dirty {
                slot.dirty = false;
                dirty.push((slot.page, slot.data.clone()));
            }
        }
        dirty.sort_by_key(|(page, _)| *page);
        dirty
    }
}
