/// K-way OR: the union of the operands, duplicates suppressed, ties broken
/// by (start, end). When operand extents nest across children, the
/// enclosing extent is dropped so the output keeps the no-containment
/// invariant.
use crate::extent::{Extent, ExtentList, Offset, MAX_OFFSET};

pub struct OrList {
    pub(crate) children: Vec<ExtentList>,
    cached_length: Option<Offset>,
}

impl OrList {
    pub fn new(children: Vec<ExtentList>) -> OrList {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                ExtentList::Or(inner) => flat.extend(inner.children),
                other => flat.push(other),
            }
        }
        OrList {
            children: flat,
            cached_length: None,
        }
    }

    pub(crate) fn rewrite_children<F>(&mut self, mut f: F)
    where
        F: FnMut(ExtentList) -> ExtentList,
    {
        let children = std::mem::take(&mut self.children);
        self.children = children
            .into_iter()
            .map(|c| if c.is_almost_secure() { c } else { f(c) })
            .collect();
    }

    /// Smallest (start, end) candidate across children, ignoring nesting.
    fn candidate_first_start_ge(&mut self, position: Offset) -> Option<Extent> {
        let mut best: Option<Extent> = None;
        for child in &mut self.children {
            if let Some(e) = child.first_start_ge(position) {
                best = match best {
                    Some(b) if (b.start, b.end) <= (e.start, e.end) => Some(b),
                    _ => Some(e),
                };
            }
        }
        best
    }

    /// Smallest end among extents starting strictly after `position`.
    fn min_end_starting_after(&mut self, position: Offset) -> Option<Offset> {
        let mut best: Option<Offset> = None;
        for child in &mut self.children {
            if let Some(e) = child.first_start_ge(position.saturating_add(1)) {
                best = Some(best.map_or(e.end, |b: Offset| b.min(e.end)));
            }
        }
        best
    }

    pub(crate) fn first_start_ge(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        loop {
            let candidate = self.candidate_first_start_ge(position)?;
            // The candidate is not minimal if some operand holds an extent
            // strictly inside it; skip it and move on.
            if let Some(inner_end) = self.min_end_starting_after(candidate.start) {
                if inner_end <= candidate.end {
                    position = candidate.start.saturating_add(1);
                    continue;
                }
            }
            return Some(candidate);
        }
    }

    pub(crate) fn first_end_ge(&mut self, position: Offset) -> Option<Extent> {
        let s = match self.last_end_le(position.saturating_sub(1)) {
            Some(e) => e.start,
            None => -1,
        };
        self.first_start_ge(s.saturating_add(1))
    }

    pub(crate) fn last_start_le(&mut self, position: Offset) -> Option<Extent> {
        let e = match self.first_start_ge(position.saturating_add(1)) {
            Some(x) => x.end,
            None => MAX_OFFSET,
        };
        self.last_end_le(e.saturating_sub(1))
    }

    pub(crate) fn last_end_le(&mut self, position: Offset) -> Option<Extent> {
        // The latest non-nested extent with end <= position is the one with
        // the largest start; equal starts keep the shorter extent.
        let mut best: Option<Extent> = None;
        for child in &mut self.children {
            if let Some(e) = child.last_end_le(position) {
                best = match best {
                    None => Some(e),
                    Some(b) if e.start > b.start || (e.start == b.start && e.end < b.end) => {
                        Some(e)
                    }
                    b => b,
                };
            }
        }
        best
    }

    pub(crate) fn length(&mut self) -> Offset {
        if let Some(len) = self.cached_length {
            return len;
        }
        let mut len = 0;
        let mut position = 0;
        while let Some(e) = self.first_start_ge(position) {
            len += 1;
            position = e.start.saturating_add(1);
        }
        self.cached_length = Some(len);
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::ExtentList;

    fn enumerate(list: &mut ExtentList) -> Vec<(Offset, Offset)> {
        let mut result = Vec::new();
        let mut position = 0;
        while let Some(e) = list.first_start_ge(position) {
            result.push((e.start, e.end));
            position = e.start + 1;
        }
        result
    }

    #[test]
    fn test_union_of_postings() {
        let mut list = ExtentList::or(vec![
            ExtentList::postings(vec![5, 20]),
            ExtentList::postings(vec![10, 20, 30]),
        ]);
        assert_eq!(
            enumerate(&mut list),
            vec![(5, 5), (10, 10), (20, 20), (30, 30)]
        );
        assert_eq!(list.length(), 4);
    }

    #[test]
    fn test_tie_break_prefers_smaller_end() {
        let mut list = ExtentList::or(vec![
            ExtentList::vector(vec![Extent::new(10, 30)]),
            ExtentList::vector(vec![Extent::new(10, 12)]),
        ]);
        // [10, 30] contains [10, 12]; only the inner extent survives.
        assert_eq!(enumerate(&mut list), vec![(10, 12)]);
        assert_eq!(list.last_end_le(100), Some(Extent::new(10, 12)));
    }

    #[test]
    fn test_nested_extent_across_children_is_suppressed() {
        let mut list = ExtentList::or(vec![
            ExtentList::vector(vec![Extent::new(5, 20), Extent::new(40, 45)]),
            ExtentList::vector(vec![Extent::new(8, 12)]),
        ]);
        assert_eq!(enumerate(&mut list), vec![(8, 12), (40, 45)]);
        assert_eq!(list.last_end_le(39), Some(Extent::new(8, 12)));
        assert_eq!(list.first_end_ge(13), Some(Extent::new(40, 45)));
    }

    #[test]
    fn test_overlap_without_nesting_keeps_both() {
        let mut list = ExtentList::or(vec![
            ExtentList::vector(vec![Extent::new(5, 15)]),
            ExtentList::vector(vec![Extent::new(10, 25)]),
        ]);
        assert_eq!(enumerate(&mut list), vec![(5, 15), (10, 25)]);
    }

    #[test]
    fn test_or_with_empty_child() {
        let mut list = ExtentList::or(vec![
            ExtentList::empty(),
            ExtentList::postings(vec![7]),
        ]);
        assert_eq!(enumerate(&mut list), vec![(7, 7)]);
    }
}
