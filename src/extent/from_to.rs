/// FromTo: intervals that run from the end of a `from`-extent to the start
/// of the next `to`-extent, with no other `to`-extent strictly between.
/// Successive outputs never overlap.
use crate::extent::{Extent, ExtentList, Offset, MAX_OFFSET};

pub struct FromToList {
    pub(crate) from: Box<ExtentList>,
    pub(crate) to: Box<ExtentList>,
    cached_length: Option<Offset>,
}

impl FromToList {
    pub fn new(from: ExtentList, to: ExtentList) -> FromToList {
        FromToList {
            from: Box::new(from),
            to: Box::new(to),
            cached_length: None,
        }
    }

    pub(crate) fn first_start_ge(&mut self, position: Offset) -> Option<Extent> {
        let f = self.from.first_start_ge(position)?;
        let t = self.to.first_start_ge(f.end.saturating_add(1))?;
        let back = self.from.last_end_le(t.start.saturating_sub(1))?;
        Some(Extent::new(back.start, t.end))
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
        let t = self.to.last_end_le(position)?;
        let f = self.from.last_end_le(t.start.saturating_sub(1))?;
        let forward = self.to.first_start_ge(f.end.saturating_add(1))?;
        Some(Extent::new(f.start, forward.end))
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

    fn make(from: Vec<Extent>, to: Vec<Extent>) -> ExtentList {
        ExtentList::from_to(ExtentList::vector(from), ExtentList::vector(to))
    }

    fn ex(s: Offset, e: Offset) -> Extent {
        Extent::new(s, e)
    }

    #[test]
    fn test_basic_pairs() {
        let mut list = make(
            vec![ex(5, 6), ex(20, 21)],
            vec![ex(10, 11), ex(30, 31)],
        );
        assert_eq!(list.first_start_ge(0), Some(ex(5, 11)));
        assert_eq!(list.first_start_ge(6), Some(ex(20, 31)));
        assert_eq!(list.first_start_ge(21), None);
        assert_eq!(list.length(), 2);
    }

    #[test]
    fn test_latest_from_wins() {
        // Two from-extents before the same to-extent: the closer one is
        // reported, so outputs never overlap.
        let mut list = make(vec![ex(1, 2), ex(4, 5)], vec![ex(9, 10)]);
        assert_eq!(list.first_start_ge(0), Some(ex(4, 10)));
        assert_eq!(list.first_start_ge(5), None);
    }

    #[test]
    fn test_backward_probe() {
        let mut list = make(
            vec![ex(5, 6), ex(20, 21)],
            vec![ex(10, 11), ex(30, 31)],
        );
        assert_eq!(list.last_end_le(100), Some(ex(20, 31)));
        assert_eq!(list.last_end_le(30), Some(ex(5, 11)));
        assert_eq!(list.last_end_le(10), None);
        assert_eq!(list.last_start_le(19), Some(ex(5, 11)));
        assert_eq!(list.first_end_ge(12), Some(ex(20, 31)));
    }

    #[test]
    fn test_empty_sides() {
        let mut list = make(vec![], vec![ex(10, 11)]);
        assert_eq!(list.first_start_ge(0), None);
        let mut list = make(vec![ex(5, 6)], vec![]);
        assert_eq!(list.first_start_ge(0), None);
    }
}
