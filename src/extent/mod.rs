/// Extent lists: lazy, sorted streams of intervals on the token address
/// space, navigated through four primitives:
///
///   first_start_ge(p)  smallest-index extent with start >= p
///   first_end_ge(p)    smallest-index extent with end >= p
///   last_start_le(p)   largest-index extent with start <= p
///   last_end_le(p)     largest-index extent with end <= p
///
/// Every list is sorted by start, ties by end, with ends monotone and no
/// duplicates; no extent of a list properly contains another. Probe
/// positions may be negative ("before the beginning"); `MAX_OFFSET` means
/// "past the end".
///
/// The set of list kinds is closed, so dispatch is a tagged enum rather
/// than a trait object. Parents own their children; flattening moves the
/// grandchildren out instead of detaching raw pointers.
pub mod and;
pub mod containment;
pub mod from_to;
pub mod or;
pub mod ordered;
pub mod postings;
pub mod secure;
pub mod simple;
pub mod stored;
pub mod vector;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{QuarryError, Result};

pub use self::and::AndList;
pub use self::containment::ContainmentList;
pub use self::from_to::FromToList;
pub use self::or::OrList;
pub use self::ordered::OrderedList;
pub use self::postings::PostingsList;
pub use self::secure::VisibleExtents;
pub use self::simple::{OneElement, RangeList};
pub use self::stored::StoredList;
pub use self::vector::VectorList;

/// A position in the token address space.
pub type Offset = i64;

/// Unreachable supremum of the address space.
pub const MAX_OFFSET: Offset = i64::MAX;

/// An inclusive interval of token positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Extent {
    pub start: Offset,
    pub end: Offset,
}

impl Extent {
    pub fn new(start: Offset, end: Offset) -> Extent {
        Extent { start, end }
    }

    /// Whether `other` lies fully inside this extent (endpoint equality
    /// counts as containment).
    pub fn contains(&self, other: &Extent) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Out-of-band error carrier for an iterator tree.
///
/// The navigation primitives never return errors; storage-level failures
/// are recorded here while the affected leaf turns empty. The query driver
/// checks the channel after traversal.
#[derive(Clone, Default)]
pub struct SideChannel {
    inner: Arc<Mutex<Vec<QuarryError>>>,
}

impl SideChannel {
    pub fn new() -> SideChannel {
        SideChannel::default()
    }

    pub fn record(&self, error: QuarryError) {
        self.inner.lock().push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn take(&self) -> Vec<QuarryError> {
        std::mem::take(&mut *self.inner.lock())
    }
}

/// A lazy extent list. Leaves sit on posting arrays or storage; internal
/// nodes synchronize their children through the navigation primitives.
pub enum ExtentList {
    Empty,
    One(OneElement),
    Range(RangeList),
    Vector(VectorList),
    Postings(PostingsList),
    Stored(StoredList),
    And(AndList),
    Or(OrList),
    Containment(ContainmentList),
    FromTo(FromToList),
    Ordered(OrderedList),
}

impl ExtentList {
    // ── constructors ──

    pub fn empty() -> ExtentList {
        ExtentList::Empty
    }

    pub fn one(from: Offset, to: Offset) -> ExtentList {
        ExtentList::One(OneElement::new(from, to))
    }

    pub fn range(width: Offset, max_offset: Offset) -> ExtentList {
        ExtentList::Range(RangeList::new(width, max_offset))
    }

    pub fn vector(extents: Vec<Extent>) -> ExtentList {
        ExtentList::Vector(VectorList::new(extents))
    }

    pub fn postings(postings: Vec<Offset>) -> ExtentList {
        ExtentList::Postings(PostingsList::new(postings))
    }

    pub fn and(children: Vec<ExtentList>) -> ExtentList {
        ExtentList::And(AndList::new(children))
    }

    pub fn or(children: Vec<ExtentList>) -> ExtentList {
        ExtentList::Or(OrList::new(children))
    }

    pub fn containment(
        container: ExtentList,
        containee: ExtentList,
        return_container: bool,
        inverted: bool,
    ) -> ExtentList {
        ExtentList::Containment(ContainmentList::new(
            container,
            containee,
            return_container,
            inverted,
        ))
    }

    pub fn from_to(from: ExtentList, to: ExtentList) -> ExtentList {
        ExtentList::FromTo(FromToList::new(from, to))
    }

    pub fn ordered(lists: Vec<ExtentList>, offsets: Option<Vec<Offset>>) -> Result<ExtentList> {
        Ok(ExtentList::Ordered(OrderedList::new(lists, offsets)?))
    }

    // ── navigation primitives ──

    pub fn first_start_ge(&mut self, position: Offset) -> Option<Extent> {
        match self {
            ExtentList::Empty => None,
            ExtentList::One(l) => l.first_start_ge(position),
            ExtentList::Range(l) => l.first_start_ge(position),
            ExtentList::Vector(l) => l.first_start_ge(position),
            ExtentList::Postings(l) => l.first_start_ge(position),
            ExtentList::Stored(l) => l.first_start_ge(position),
            ExtentList::And(l) => l.first_start_ge(position),
            ExtentList::Or(l) => l.first_start_ge(position),
            ExtentList::Containment(l) => l.first_start_ge(position),
            ExtentList::FromTo(l) => l.first_start_ge(position),
            ExtentList::Ordered(l) => l.first_start_ge(position),
        }
    }

    pub fn first_end_ge(&mut self, position: Offset) -> Option<Extent> {
        match self {
            ExtentList::Empty => None,
            ExtentList::One(l) => l.first_end_ge(position),
            ExtentList::Range(l) => l.first_end_ge(position),
            ExtentList::Vector(l) => l.first_end_ge(position),
            ExtentList::Postings(l) => l.first_end_ge(position),
            ExtentList::Stored(l) => l.first_end_ge(position),
            ExtentList::And(l) => l.first_end_ge(position),
            ExtentList::Or(l) => l.first_end_ge(position),
            ExtentList::Containment(l) => l.first_end_ge(position),
            ExtentList::FromTo(l) => l.first_end_ge(position),
            ExtentList::Ordered(l) => l.first_end_ge(position),
        }
    }

    pub fn last_start_le(&mut self, position: Offset) -> Option<Extent> {
        match self {
            ExtentList::Empty => None,
            ExtentList::One(l) => l.last_start_le(position),
            ExtentList::Range(l) => l.last_start_le(position),
            ExtentList::Vector(l) => l.last_start_le(position),
            ExtentList::Postings(l) => l.last_start_le(position),
            ExtentList::Stored(l) => l.last_start_le(position),
            ExtentList::And(l) => l.last_start_le(position),
            ExtentList::Or(l) => l.last_start_le(position),
            ExtentList::Containment(l) => l.last_start_le(position),
            ExtentList::FromTo(l) => l.last_start_le(position),
            ExtentList::Ordered(l) => l.last_start_le(position),
        }
    }

    pub fn last_end_le(&mut self, position: Offset) -> Option<Extent> {
        match self {
            ExtentList::Empty => None,
            ExtentList::One(l) => l.last_end_le(position),
            ExtentList::Range(l) => l.last_end_le(position),
            ExtentList::Vector(l) => l.last_end_le(position),
            ExtentList::Postings(l) => l.last_end_le(position),
            ExtentList::Stored(l) => l.last_end_le(position),
            ExtentList::And(l) => l.last_end_le(position),
            ExtentList::Or(l) => l.last_end_le(position),
            ExtentList::Containment(l) => l.last_end_le(position),
            ExtentList::FromTo(l) => l.last_end_le(position),
            ExtentList::Ordered(l) => l.last_end_le(position),
        }
    }

    // ── bulk and metadata ──

    /// Collect up to `n` extents with start >= `from` and end <= `to`.
    pub fn next_n(&mut self, from: Offset, to: Offset, n: usize, out: &mut Vec<Extent>) -> usize {
        let mut found = 0;
        let mut position = from;
        while found < n {
            match self.first_start_ge(position) {
                Some(e) if e.end <= to => {
                    out.push(e);
                    position = e.start.saturating_add(1);
                    found += 1;
                }
                _ => break,
            }
        }
        found
    }

    /// Total number of extents in the list.
    pub fn length(&mut self) -> Offset {
        match self {
            ExtentList::Empty => 0,
            ExtentList::One(_) => 1,
            ExtentList::Range(l) => l.length(),
            ExtentList::Vector(l) => l.length(),
            ExtentList::Postings(l) => l.length(),
            ExtentList::Stored(l) => l.length(),
            ExtentList::And(l) => l.length(),
            ExtentList::Or(l) => l.length(),
            ExtentList::Containment(l) => l.length(),
            ExtentList::FromTo(l) => l.length(),
            ExtentList::Ordered(l) => l.length(),
        }
    }

    /// Number of extents lying fully inside `[start, end]`.
    pub fn count(&mut self, start: Offset, end: Offset) -> Offset {
        match self {
            ExtentList::Empty => 0,
            ExtentList::Range(l) => l.count(start, end),
            ExtentList::Vector(l) => l.count(start, end),
            ExtentList::Postings(l) => l.count(start, end),
            ExtentList::Stored(l) => l.count(start, end),
            ExtentList::Containment(l) => l.count(start, end),
            ExtentList::Ordered(l) => l.count(start, end),
            other => count_by_probing(other, start, end),
        }
    }

    /// Bytes of memory pinned by this list and its children.
    pub fn memory_usage(&self) -> usize {
        match self {
            ExtentList::Empty => 0,
            ExtentList::One(_) | ExtentList::Range(_) => std::mem::size_of::<Extent>(),
            ExtentList::Vector(l) => l.memory_usage(),
            ExtentList::Postings(l) => l.memory_usage(),
            ExtentList::Stored(l) => l.memory_usage(),
            ExtentList::And(l) => l.children.iter().map(ExtentList::memory_usage).sum(),
            ExtentList::Or(l) => l.children.iter().map(ExtentList::memory_usage).sum(),
            ExtentList::Containment(l) => l.container.memory_usage() + l.containee.memory_usage(),
            ExtentList::FromTo(l) => l.from.memory_usage() + l.to.memory_usage(),
            ExtentList::Ordered(l) => l.lists.iter().map(ExtentList::memory_usage).sum(),
        }
    }

    /// Idempotent optimization hint.
    pub fn optimize(&mut self) {
        match self {
            ExtentList::Vector(l) => l.optimize(),
            ExtentList::Postings(l) => l.optimize(),
            ExtentList::And(l) => l.children.iter_mut().for_each(ExtentList::optimize),
            ExtentList::Or(l) => l.children.iter_mut().for_each(ExtentList::optimize),
            ExtentList::Containment(l) => {
                l.container.optimize();
                l.containee.optimize();
            }
            ExtentList::FromTo(l) => {
                l.from.optimize();
                l.to.optimize();
            }
            ExtentList::Ordered(l) => l.lists.iter_mut().for_each(ExtentList::optimize),
            _ => {}
        }
    }

    // ── security ──

    /// Every returned extent is visible to the asking user as-is.
    pub fn is_secure(&self) -> bool {
        match self {
            ExtentList::Empty => true,
            ExtentList::One(_) | ExtentList::Range(_) => false,
            ExtentList::Vector(l) => l.secure,
            ExtentList::Postings(_) | ExtentList::Stored(_) => false,
            ExtentList::And(_) | ExtentList::FromTo(_) => false,
            ExtentList::Or(l) => l.children.iter().all(ExtentList::is_secure),
            ExtentList::Containment(l) => l.is_secure(),
            ExtentList::Ordered(l) => l.lists.iter().all(ExtentList::is_secure),
        }
    }

    /// Every returned extent is contained in some visible extent.
    pub fn is_almost_secure(&self) -> bool {
        match self {
            ExtentList::Empty => true,
            ExtentList::One(_) | ExtentList::Range(_) => true,
            ExtentList::Vector(l) => l.secure,
            ExtentList::Postings(_) | ExtentList::Stored(_) => false,
            ExtentList::And(l) => l.children.iter().all(ExtentList::is_almost_secure),
            ExtentList::Or(l) => l.children.iter().all(ExtentList::is_almost_secure),
            ExtentList::Containment(l) => l.is_almost_secure(),
            ExtentList::FromTo(l) => l.from.is_almost_secure() && l.to.is_almost_secure(),
            ExtentList::Ordered(l) => l.lists.iter().all(ExtentList::is_almost_secure),
        }
    }

    /// Rewrite the tree so that every extent it produces is contained in
    /// some extent visible to the user.
    pub fn make_almost_secure(self, visible: &VisibleExtents) -> ExtentList {
        if self.is_almost_secure() {
            return self;
        }
        match self {
            ExtentList::And(mut list) => {
                list.rewrite_children(|c| c.make_almost_secure(visible));
                ExtentList::And(list)
            }
            ExtentList::Or(mut list) => {
                list.rewrite_children(|c| c.make_almost_secure(visible));
                ExtentList::Or(list)
            }
            ExtentList::Ordered(mut list) => {
                list.rewrite_children(|c| c.make_almost_secure(visible));
                ExtentList::Ordered(list)
            }
            ExtentList::FromTo(mut list) => {
                list.from = rewrite_boxed(list.from, |c| c.make_almost_secure(visible));
                list.to = rewrite_boxed(list.to, |c| c.make_almost_secure(visible));
                ExtentList::FromTo(list)
            }
            ExtentList::Containment(mut list) => {
                if list.return_container {
                    list.containee = rewrite_boxed(list.containee, |c| {
                        c.make_almost_secure(visible)
                    });
                    list.container = rewrite_boxed(list.container, |c| {
                        c.make_almost_secure(visible)
                    });
                } else {
                    list.containee = rewrite_boxed(list.containee, |c| {
                        c.make_almost_secure(visible)
                    });
                    let container = *list.container;
                    list.container = Box::new(if container.is_secure() {
                        container
                    } else {
                        container.make_secure(visible)
                    });
                }
                ExtentList::Containment(list)
            }
            leaf => ExtentList::containment(visible.extent_list(), leaf, false, false),
        }
    }

    /// Rewrite the tree so that every extent it produces is visible to the
    /// user without further filtering.
    pub fn make_secure(self, visible: &VisibleExtents) -> ExtentList {
        if self.is_secure() {
            return self;
        }
        let rewritten = self.make_almost_secure(visible);
        if rewritten.is_secure() {
            return rewritten;
        }
        ExtentList::containment(visible.extent_list(), rewritten, false, false)
    }
}

fn rewrite_boxed<F>(list: Box<ExtentList>, f: F) -> Box<ExtentList>
where
    F: FnOnce(ExtentList) -> ExtentList,
{
    let inner = *list;
    if inner.is_almost_secure() {
        Box::new(inner)
    } else {
        Box::new(f(inner))
    }
}

/// Generic count: walk the list and stop once the ends leave the window.
fn count_by_probing(list: &mut ExtentList, start: Offset, end: Offset) -> Offset {
    let mut result = 0;
    let mut position = start;
    while let Some(e) = list.first_start_ge(position) {
        if e.end > end {
            break;
        }
        result += 1;
        position = e.start.saturating_add(1);
    }
    result
}

impl fmt::Display for ExtentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtentList::Empty => write!(f, "()"),
            ExtentList::One(l) => write!(f, "[{}, {}]", l.from, l.to),
            ExtentList::Range(l) => write!(f, "[{}]", l.width),
            ExtentList::Vector(l) => write!(f, "<extents:{}>", l.len()),
            ExtentList::Postings(l) => write!(f, "<postings:{}>", l.len()),
            ExtentList::Stored(l) => write!(f, "<stored:{}>", l.total()),
            ExtentList::And(l) => {
                write!(f, "(")?;
                for (i, child) in l.children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            ExtentList::Or(l) => {
                write!(f, "(")?;
                for (i, child) in l.children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " OR ")?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            ExtentList::Containment(l) => {
                let op = if l.return_container { '>' } else { '<' };
                let inv = if l.inverted { "/" } else { "" };
                if l.return_container {
                    write!(f, "({} {}{} {})", l.container, inv, op, l.containee)
                } else {
                    write!(f, "({} {}{} {})", l.containee, inv, op, l.container)
                }
            }
            ExtentList::FromTo(l) => write!(f, "({} .. {})", l.from, l.to),
            ExtentList::Ordered(l) => {
                write!(f, "{{")?;
                if let Some(first) = l.lists.first() {
                    write!(f, "{}", first)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_containment_includes_endpoints() {
        let outer = Extent::new(5, 10);
        assert!(outer.contains(&Extent::new(5, 10)));
        assert!(outer.contains(&Extent::new(6, 10)));
        assert!(!outer.contains(&Extent::new(4, 10)));
        assert!(!outer.contains(&Extent::new(6, 11)));
    }

    #[test]
    fn test_empty_list() {
        let mut list = ExtentList::empty();
        assert_eq!(list.first_start_ge(0), None);
        assert_eq!(list.first_end_ge(0), None);
        assert_eq!(list.last_start_le(MAX_OFFSET), None);
        assert_eq!(list.last_end_le(MAX_OFFSET), None);
        assert_eq!(list.length(), 0);
        assert!(list.is_secure());
        assert!(list.is_almost_secure());
    }

    #[test]
    fn test_next_n_respects_window_and_limit() {
        let mut list = ExtentList::postings(vec![10, 20, 30, 40, 50]);
        let mut out = Vec::new();
        let n = list.next_n(15, 45, 10, &mut out);
        assert_eq!(n, 3);
        assert_eq!(
            out,
            vec![Extent::new(20, 20), Extent::new(30, 30), Extent::new(40, 40)]
        );

        let mut out = Vec::new();
        let n = list.next_n(0, MAX_OFFSET, 2, &mut out);
        assert_eq!(n, 2);
        assert_eq!(out, vec![Extent::new(10, 10), Extent::new(20, 20)]);
    }

    #[test]
    fn test_side_channel_collects_errors() {
        let channel = SideChannel::new();
        assert!(channel.is_empty());
        channel.record(QuarryError::Codec("bad payload".into()));
        let clone = channel.clone();
        assert!(!clone.is_empty());
        let errors = clone.take();
        assert_eq!(errors.len(), 1);
        assert!(channel.is_empty());
    }

    #[test]
    fn test_display_shapes() {
        let and = ExtentList::and(vec![
            ExtentList::one(1, 2),
            ExtentList::range(3, 100),
        ]);
        assert_eq!(and.to_string(), "([1, 2] AND [3])");
        let inside = ExtentList::containment(
            ExtentList::one(0, 9),
            ExtentList::one(2, 3),
            false,
            false,
        );
        assert_eq!(inside.to_string(), "([2, 3] < [0, 9])");
    }
}
