/// The set of extents a user is allowed to see, as provided by the
/// visibility collaborator. Lists handed out from here are secure by
/// definition; the rewrite methods on `ExtentList` use them to tighten
/// arbitrary query trees.
use crate::extent::{Extent, ExtentList, VectorList};

pub struct VisibleExtents {
    extents: Vec<Extent>,
}

impl VisibleExtents {
    pub fn new(mut extents: Vec<Extent>) -> VisibleExtents {
        extents.sort();
        extents.dedup();
        VisibleExtents { extents }
    }

    /// A secure extent list over the visible ranges.
    pub fn extent_list(&self) -> ExtentList {
        ExtentList::Vector(VectorList::secure(self.extents.clone()))
    }

    /// True iff `extent` lies fully inside some visible extent.
    pub fn covers(&self, extent: &Extent) -> bool {
        let idx = self.extents.partition_point(|e| e.start <= extent.start);
        idx.checked_sub(1)
            .map(|i| self.extents[i].contains(extent))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }
}
