/// Ordered combination: several sub-lists, each shifted by a relative
/// offset, viewed as one stream. The shifted sub-lists must form a
/// disjoint ordered partition of the combined range; this is validated at
/// construction. Probes dispatch to the sub-list whose range covers the
/// position, with the last sub-index cached for locality.
///
/// Used to present the posting lists of several sub-indexes as a single
/// list.
use log::error;

use crate::extent::{Extent, ExtentList, Offset, MAX_OFFSET};
use crate::error::{QuarryError, Result};

pub struct OrderedList {
    pub(crate) lists: Vec<ExtentList>,
    offsets: Vec<Offset>,
    first_start: Vec<Offset>,
    first_end: Vec<Offset>,
    last_start: Vec<Offset>,
    last_end: Vec<Offset>,
    current: usize,
}

impl OrderedList {
    pub fn new(mut lists: Vec<ExtentList>, offsets: Option<Vec<Offset>>) -> Result<OrderedList> {
        if lists.is_empty() {
            return Err(QuarryError::Protocol(
                "ordered combination needs at least one sub-list".into(),
            ));
        }
        let offsets = match offsets {
            Some(o) => {
                if o.len() != lists.len() {
                    return Err(QuarryError::Protocol(
                        "ordered combination: offset count != list count".into(),
                    ));
                }
                o
            }
            None => vec![0; lists.len()],
        };

        let n = lists.len();
        let mut first_start = vec![0; n];
        let mut first_end = vec![0; n];
        let mut last_start = vec![0; n];
        let mut last_end = vec![0; n];
        for (i, list) in lists.iter_mut().enumerate() {
            let first = list.first_start_ge(0);
            let last = list.last_end_le(MAX_OFFSET);
            match (first, last) {
                (Some(f), Some(l)) => {
                    first_start[i] = f.start + offsets[i];
                    first_end[i] = f.end + offsets[i];
                    last_start[i] = l.start + offsets[i];
                    last_end[i] = l.end + offsets[i];
                }
                _ => {
                    return Err(QuarryError::Protocol(format!(
                        "ordered combination: sub-list {} is empty",
                        i
                    )));
                }
            }
        }
        for i in 1..n {
            if first_start[i] < last_start[i - 1] || first_end[i] < last_end[i - 1] {
                for k in 0..n {
                    error!(
                        "ordered combination sub-list {}: {} - {}",
                        k, first_start[k], last_end[k]
                    );
                }
                return Err(QuarryError::Protocol(
                    "ordered combination: sub-lists are not ordered".into(),
                ));
            }
        }

        Ok(OrderedList {
            lists,
            offsets,
            first_start,
            first_end,
            last_start,
            last_end,
            current: 0,
        })
    }

    pub(crate) fn rewrite_children<F>(&mut self, mut f: F)
    where
        F: FnMut(ExtentList) -> ExtentList,
    {
        let lists = std::mem::take(&mut self.lists);
        self.lists = lists
            .into_iter()
            .map(|c| if c.is_almost_secure() { c } else { f(c) })
            .collect();
    }

    fn shifted(&mut self, i: usize, local: Option<Extent>) -> Option<Extent> {
        let off = self.offsets[i];
        local.map(|e| Extent::new(e.start + off, e.end + off))
    }

    pub(crate) fn first_start_ge(&mut self, position: Offset) -> Option<Extent> {
        let csi = self.current;
        if position >= self.first_start[csi] && position <= self.last_start[csi] {
            let local = self.lists[csi].first_start_ge(position - self.offsets[csi]);
            return self.shifted(csi, local);
        }
        for i in 0..self.lists.len() {
            if self.last_start[i] >= position {
                let local = self.lists[i].first_start_ge(position - self.offsets[i]);
                self.current = i;
                return self.shifted(i, local);
            }
        }
        None
    }

    pub(crate) fn first_end_ge(&mut self, position: Offset) -> Option<Extent> {
        let csi = self.current;
        if position >= self.first_end[csi] && position <= self.last_end[csi] {
            let local = self.lists[csi].first_end_ge(position - self.offsets[csi]);
            return self.shifted(csi, local);
        }
        for i in 0..self.lists.len() {
            if self.last_end[i] >= position {
                let local = self.lists[i].first_end_ge(position - self.offsets[i]);
                self.current = i;
                return self.shifted(i, local);
            }
        }
        None
    }

    pub(crate) fn last_start_le(&mut self, position: Offset) -> Option<Extent> {
        let csi = self.current;
        if position >= self.first_start[csi] && position <= self.last_start[csi] {
            let local = self.lists[csi].last_start_le(position - self.offsets[csi]);
            return self.shifted(csi, local);
        }
        for i in (0..self.lists.len()).rev() {
            if self.first_start[i] <= position {
                let local = self.lists[i].last_start_le(position - self.offsets[i]);
                self.current = i;
                return self.shifted(i, local);
            }
        }
        None
    }

    pub(crate) fn last_end_le(&mut self, position: Offset) -> Option<Extent> {
        let csi = self.current;
        if position >= self.first_end[csi] && position <= self.last_end[csi] {
            let local = self.lists[csi].last_end_le(position - self.offsets[csi]);
            return self.shifted(csi, local);
        }
        for i in (0..self.lists.len()).rev() {
            if self.first_end[i] <= position {
                let local = self.lists[i].last_end_le(position - self.offsets[i]);
                self.current = i;
                return self.shifted(i, local);
            }
        }
        None
    }

    pub(crate) fn length(&mut self) -> Offset {
        self.lists.iter_mut().map(|l| l.length()).sum()
    }

    pub(crate) fn count(&mut self, start: Offset, end: Offset) -> Offset {
        let mut result = 0;
        for i in 0..self.lists.len() {
            if self.first_end[i] <= end && self.last_start[i] >= start {
                result += self.lists[i].count(start - self.offsets[i], end - self.offsets[i]);
            }
        }
        result
    }
}
