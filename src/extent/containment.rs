/// Positional containment in four flavors, selected by two flags:
///
///   return_container = true   extents of the container list that hold
///                              (or, inverted, do not hold) an extent of
///                              the containee list
///   return_container = false  extents of the containee list that lie
///                              (or, inverted, do not lie) inside some
///                              container extent
///
/// Endpoint equality counts as containment. The container extent found by
/// the previous probe is memoized so a run of containees inside the same
/// container does not rescan it.
use crate::extent::{Extent, ExtentList, Offset};

pub struct ContainmentList {
    pub(crate) container: Box<ExtentList>,
    pub(crate) containee: Box<ExtentList>,
    pub(crate) return_container: bool,
    pub(crate) inverted: bool,
    last_container: Option<Extent>,
    cached_length: Option<Offset>,
}

impl ContainmentList {
    pub fn new(
        container: ExtentList,
        containee: ExtentList,
        return_container: bool,
        inverted: bool,
    ) -> ContainmentList {
        ContainmentList {
            container: Box::new(container),
            containee: Box::new(containee),
            return_container,
            inverted,
            last_container: None,
            cached_length: None,
        }
    }

    pub(crate) fn first_start_ge(&mut self, position: Offset) -> Option<Extent> {
        if self.return_container {
            let c = self.container.first_start_ge(position)?;
            return self.first_end_ge(c.end);
        }
        if self.inverted {
            let mut position = position;
            loop {
                let c1 = self.containee.first_start_ge(position)?;
                match self.container.first_end_ge(c1.end) {
                    None => return Some(c1),
                    Some(c2) => {
                        if c2.start > c1.start {
                            return Some(c1);
                        }
                        let next = self.containee.first_end_ge(c2.end.saturating_add(1))?;
                        position = next.start;
                    }
                }
            }
        } else {
            let mut position = position;
            loop {
                let c1 = self.containee.first_start_ge(position)?;
                if let Some(anchor) = self.last_container {
                    if anchor.contains(&c1) {
                        return Some(c1);
                    }
                }
                let c2 = self.container.first_end_ge(c1.end)?;
                self.last_container = Some(c2);
                if c2.start <= c1.start {
                    return Some(c1);
                }
                position = c2.start;
            }
        }
    }

    pub(crate) fn first_end_ge(&mut self, position: Offset) -> Option<Extent> {
        if self.return_container {
            if self.inverted {
                let mut position = position;
                loop {
                    let c1 = self.container.first_end_ge(position)?;
                    match self.containee.first_start_ge(c1.start) {
                        None => return Some(c1),
                        Some(c2) => {
                            if c2.end > c1.end {
                                return Some(c1);
                            }
                            let next = self.container.first_start_ge(c2.start.saturating_add(1))?;
                            position = next.end;
                        }
                    }
                }
            } else {
                let mut position = position;
                loop {
                    let c1 = self.container.first_end_ge(position)?;
                    let c2 = self.containee.first_start_ge(c1.start)?;
                    if c2.end <= c1.end {
                        return Some(c1);
                    }
                    position = c2.end;
                }
            }
        } else {
            let c = self.containee.first_end_ge(position)?;
            if let Some(anchor) = self.last_container {
                if anchor.contains(&c) {
                    return Some(c);
                }
            }
            self.first_start_ge(c.start)
        }
    }

    pub(crate) fn last_start_le(&mut self, position: Offset) -> Option<Extent> {
        if self.return_container {
            if self.inverted {
                let mut position = position;
                loop {
                    let c1 = self.container.last_start_le(position)?;
                    match self.containee.last_end_le(c1.end) {
                        None => return Some(c1),
                        Some(c2) => {
                            if c2.start < c1.start {
                                return Some(c1);
                            }
                            let prev = self.container.last_end_le(c2.end.saturating_sub(1))?;
                            position = prev.start;
                        }
                    }
                }
            } else {
                let mut position = position;
                loop {
                    let c1 = self.container.last_start_le(position)?;
                    let c2 = self.containee.last_end_le(c1.end)?;
                    if c2.start >= c1.start {
                        return Some(c1);
                    }
                    position = c2.start;
                }
            }
        } else {
            let c = self.containee.last_start_le(position)?;
            self.last_end_le(c.end)
        }
    }

    pub(crate) fn last_end_le(&mut self, position: Offset) -> Option<Extent> {
        if self.return_container {
            let c = self.container.last_end_le(position)?;
            return self.last_start_le(c.start);
        }
        if self.inverted {
            let mut position = position;
            loop {
                let c1 = self.containee.last_end_le(position)?;
                match self.container.last_start_le(c1.start) {
                    None => return Some(c1),
                    Some(c2) => {
                        if c2.end < c1.end {
                            return Some(c1);
                        }
                        let prev = self.containee.last_start_le(c2.start.saturating_sub(1))?;
                        position = prev.end;
                    }
                }
            }
        } else {
            let mut position = position;
            loop {
                let c1 = self.containee.last_end_le(position)?;
                let c2 = self.container.last_start_le(c1.start)?;
                if c2.end >= c1.end {
                    return Some(c1);
                }
                position = c2.end;
            }
        }
    }

    pub(crate) fn length(&mut self) -> Offset {
        if let Some(len) = self.cached_length {
            return len;
        }
        let len = self.compute_length();
        self.cached_length = Some(len);
        len
    }

    fn compute_length(&mut self) -> Offset {
        let mut result = 0;
        if self.return_container || self.inverted {
            if self.return_container {
                let mut position = 0;
                while let Some(e) = self.first_start_ge(position) {
                    result += 1;
                    position = e.start.saturating_add(1);
                }
                return result;
            }
            // inverted containee
            let mut position = 0;
            loop {
                let c1 = match self.containee.first_start_ge(position) {
                    Some(x) => x,
                    None => return result,
                };
                match self.container.first_end_ge(c1.end) {
                    None => {
                        result += 1;
                        position = c1.start.saturating_add(1);
                    }
                    Some(c2) => {
                        if c2.start > c1.start {
                            result += 1;
                            position = c1.start.saturating_add(1);
                        } else {
                            match self.containee.first_end_ge(c2.end.saturating_add(1)) {
                                Some(next) => position = next.start,
                                None => return result,
                            }
                        }
                    }
                }
            }
        }
        // plain containee: batch-count whole runs inside each container
        let mut c1 = match self.containee.first_start_ge(0) {
            Some(x) => x,
            None => return 0,
        };
        loop {
            let c2 = match self.container.first_end_ge(c1.end) {
                Some(x) => x,
                None => return result,
            };
            if c2.start <= c1.start {
                result += self.containee.count(c1.start, c2.end);
                match self.containee.first_end_ge(c2.end.saturating_add(1)) {
                    Some(next) => c1 = next,
                    None => return result,
                }
            } else {
                match self.containee.first_start_ge(c2.start) {
                    Some(next) => c1 = next,
                    None => return result,
                }
            }
        }
    }

    pub(crate) fn count(&mut self, start: Offset, end: Offset) -> Offset {
        let mut result = 0;
        if self.return_container || self.inverted {
            let mut position = start;
            while let Some(e) = self.first_start_ge(position) {
                if e.end > end {
                    return result;
                }
                result += 1;
                position = e.start.saturating_add(1);
            }
            return result;
        }
        let mut c1 = match self.containee.first_start_ge(start) {
            Some(x) => x,
            None => return 0,
        };
        while c1.end <= end {
            let c2 = match self.container.first_end_ge(c1.end) {
                Some(x) => x,
                None => return result,
            };
            if c2.start <= c1.start {
                result += self.containee.count(c1.start, c2.end.min(end));
                match self.containee.first_end_ge(c2.end.saturating_add(1)) {
                    Some(next) => c1 = next,
                    None => return result,
                }
            } else {
                match self.containee.first_start_ge(c2.start) {
                    Some(next) => c1 = next,
                    None => return result,
                }
            }
        }
        result
    }

    pub(crate) fn is_secure(&self) -> bool {
        if self.return_container {
            self.containee.is_almost_secure() && self.container.is_secure()
        } else if self.inverted {
            self.containee.is_secure() && self.container.is_secure()
        } else {
            // Every output extent lies inside a container extent, so a
            // secure container certifies the output by itself.
            self.containee.is_secure() || self.container.is_secure()
        }
    }

    pub(crate) fn is_almost_secure(&self) -> bool {
        if self.return_container {
            self.containee.is_almost_secure() && self.container.is_almost_secure()
        } else if self.inverted {
            self.containee.is_almost_secure() && self.container.is_secure()
        } else {
            self.containee.is_almost_secure()
                || self.container.is_secure()
                || self.container.is_almost_secure()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::{ExtentList, MAX_OFFSET};

    fn containers() -> ExtentList {
        ExtentList::vector(vec![Extent::new(0, 100), Extent::new(200, 300)])
    }

    fn containees() -> ExtentList {
        ExtentList::vector(vec![
            Extent::new(10, 12),
            Extent::new(250, 260),
            Extent::new(400, 410),
        ])
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
    fn test_return_container() {
        let mut list = ExtentList::containment(containers(), containees(), true, false);
        assert_eq!(list.first_start_ge(0), Some(Extent::new(0, 100)));
        assert_eq!(list.first_start_ge(1), Some(Extent::new(200, 300)));
        assert_eq!(list.first_start_ge(201), None);
        assert_eq!(enumerate(&mut list), vec![(0, 100), (200, 300)]);
        assert_eq!(list.length(), 2);
    }

    #[test]
    fn test_return_containee() {
        let mut list = ExtentList::containment(containers(), containees(), false, false);
        assert_eq!(enumerate(&mut list), vec![(10, 12), (250, 260)]);
        assert_eq!(list.last_end_le(MAX_OFFSET), Some(Extent::new(250, 260)));
        assert_eq!(list.last_end_le(100), Some(Extent::new(10, 12)));
        assert_eq!(list.length(), 2);
        assert_eq!(list.count(0, 100), 1);
    }

    #[test]
    fn test_inverted_containee() {
        let mut list = ExtentList::containment(containers(), containees(), false, true);
        assert_eq!(enumerate(&mut list), vec![(400, 410)]);
        assert_eq!(list.length(), 1);
        assert_eq!(list.last_end_le(MAX_OFFSET), Some(Extent::new(400, 410)));
    }

    #[test]
    fn test_inverted_container() {
        // Add a container that holds nothing.
        let container = ExtentList::vector(vec![
            Extent::new(0, 100),
            Extent::new(150, 180),
            Extent::new(200, 300),
        ]);
        let mut list = ExtentList::containment(container, containees(), true, true);
        assert_eq!(enumerate(&mut list), vec![(150, 180)]);
        assert_eq!(list.last_start_le(MAX_OFFSET), Some(Extent::new(150, 180)));
        assert_eq!(list.first_end_ge(0), Some(Extent::new(150, 180)));
    }

    #[test]
    fn test_containment_duality_within_container() {
        // The containers holding something plus the containers holding
        // nothing partition the container list.
        let container_extents = vec![
            Extent::new(0, 100),
            Extent::new(150, 180),
            Extent::new(200, 300),
        ];
        let mut holding = ExtentList::containment(
            ExtentList::vector(container_extents.clone()),
            containees(),
            true,
            false,
        );
        let mut not_holding = ExtentList::containment(
            ExtentList::vector(container_extents.clone()),
            containees(),
            true,
            true,
        );
        let mut both = enumerate(&mut holding);
        both.extend(enumerate(&mut not_holding));
        both.sort();
        let all: Vec<(Offset, Offset)> = container_extents
            .iter()
            .map(|e| (e.start, e.end))
            .collect();
        assert_eq!(both, all);
    }

    #[test]
    fn test_empty_operands_yield_empty_output() {
        let mut list =
            ExtentList::containment(ExtentList::empty(), containees(), true, false);
        assert_eq!(list.first_start_ge(0), None);
        assert_eq!(list.length(), 0);

        let mut list =
            ExtentList::containment(containers(), ExtentList::empty(), false, false);
        assert_eq!(list.first_start_ge(0), None);
        assert_eq!(list.length(), 0);
    }

    #[test]
    fn test_endpoint_equality_counts() {
        let container = ExtentList::vector(vec![Extent::new(5, 9)]);
        let containee = ExtentList::vector(vec![Extent::new(5, 9)]);
        let mut list = ExtentList::containment(container, containee, false, false);
        assert_eq!(list.first_start_ge(0), Some(Extent::new(5, 9)));
    }

    #[test]
    fn test_memoized_container_is_reused() {
        // Many containees inside one container; the anchor check short
        // circuits every probe after the first.
        let container = ExtentList::vector(vec![Extent::new(0, 1000)]);
        let containee = ExtentList::postings((0..100).map(|i| i * 10).collect());
        let mut list = ExtentList::containment(container, containee, false, false);
        let extents = enumerate(&mut list);
        assert_eq!(extents.len(), 100);
        assert_eq!(extents[99], (990, 990));
    }
}
