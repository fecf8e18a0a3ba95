/// K-way AND: the covers that hold one extent from every operand.
///
/// Leap-frog synchronization: probing forward first widens the right edge
/// to the largest child end at-or-after the position, then pulls the left
/// edge back to the earliest child extent still ending inside the cover.
/// Nested ANDs are merged into a single k-way node at construction.
use crate::extent::{Extent, ExtentList, Offset, MAX_OFFSET};

pub struct AndList {
    pub(crate) children: Vec<ExtentList>,
    cached_length: Option<Offset>,
}

impl AndList {
    pub fn new(children: Vec<ExtentList>) -> AndList {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                ExtentList::And(inner) => flat.extend(inner.children),
                other => flat.push(other),
            }
        }
        AndList {
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

    pub(crate) fn first_start_ge(&mut self, position: Offset) -> Option<Extent> {
        let mut last_end = position.saturating_sub(1);
        for child in &mut self.children {
            let e = child.first_start_ge(position)?;
            if e.end > last_end {
                last_end = e.end;
            }
        }
        let mut first_start = last_end;
        for child in &mut self.children {
            let e = child.last_end_le(last_end)?;
            if e.start < first_start {
                first_start = e.start;
            }
        }
        Some(Extent::new(first_start, last_end))
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
        let mut first_start = position.saturating_add(1);
        for child in &mut self.children {
            let e = child.last_end_le(position)?;
            if e.start < first_start {
                first_start = e.start;
            }
        }
        let mut last_end = first_start;
        for child in &mut self.children {
            let e = child.first_start_ge(first_start)?;
            if e.end > last_end {
                last_end = e.end;
            }
        }
        Some(Extent::new(first_start, last_end))
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

    fn and_of(lists: Vec<Vec<Offset>>) -> ExtentList {
        ExtentList::and(lists.into_iter().map(ExtentList::postings).collect())
    }

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
    fn test_two_way_covers() {
        let mut list = and_of(vec![vec![5, 15, 25], vec![10, 20]]);
        assert_eq!(
            enumerate(&mut list),
            vec![(5, 10), (10, 15), (15, 20), (20, 25)]
        );
        assert_eq!(list.first_start_ge(0), Some(Extent::new(5, 10)));
        assert_eq!(list.first_start_ge(21), None);
    }

    #[test]
    fn test_backward_probes_match_forward() {
        let mut list = and_of(vec![vec![5, 15, 25], vec![10, 20]]);
        assert_eq!(list.last_end_le(25), Some(Extent::new(20, 25)));
        assert_eq!(list.last_end_le(19), Some(Extent::new(10, 15)));
        assert_eq!(list.last_end_le(9), None);
        assert_eq!(list.last_start_le(12), Some(Extent::new(10, 15)));
        assert_eq!(list.first_end_ge(16), Some(Extent::new(15, 20)));
    }

    #[test]
    fn test_empty_operand_kills_the_and() {
        let mut list = ExtentList::and(vec![
            ExtentList::postings(vec![1, 2, 3]),
            ExtentList::empty(),
        ]);
        assert_eq!(list.first_start_ge(0), None);
        assert_eq!(list.last_end_le(100), None);
        assert_eq!(list.length(), 0);
    }

    #[test]
    fn test_flatten_merges_nested_ands() {
        let nested = ExtentList::and(vec![
            ExtentList::and(vec![
                ExtentList::postings(vec![2, 12]),
                ExtentList::postings(vec![4, 14]),
            ]),
            ExtentList::postings(vec![6, 16]),
        ]);
        let mut nested = nested;
        let mut flat = and_of(vec![vec![2, 12], vec![4, 14], vec![6, 16]]);
        if let ExtentList::And(inner) = &nested {
            assert_eq!(inner.children.len(), 3);
        } else {
            panic!("expected AND node");
        }
        assert_eq!(enumerate(&mut nested), enumerate(&mut flat));
    }

    #[test]
    fn test_single_child_behaves_like_child() {
        let mut list = and_of(vec![vec![3, 9, 27]]);
        assert_eq!(enumerate(&mut list), vec![(3, 3), (9, 9), (27, 27)]);
    }
}
