//! Segments of a face-face blend: stretches where the ball touches one
//! specific pair of faces, linked in order along the blended edge.

use cad_kernel::topology::brep::FaceId;
use cad_kernel::{Interval, Tolerance};

use crate::error::Side;
use crate::geom_cache::FfblendGeomRef;
use crate::intercept::Segside;
use crate::segend::{segends_join, Segend};

#[derive(Debug)]
pub struct FfSegment {
    start: Segend,
    end: Segend,
    left: Segside,
    right: Segside,
    left_face: FaceId,
    right_face: FaceId,
    /// Range of the blend parameter covered, within `[0, 1]`.
    range: Interval,
    geom: Option<FfblendGeomRef>,
    sheet_face: Option<FaceId>,
}

impl FfSegment {
    pub fn new(start: Segend, end: Segend, left_face: FaceId, right_face: FaceId, range: Interval) -> Self {
        Self {
            start,
            end,
            left: Segside::default(),
            right: Segside::default(),
            left_face,
            right_face,
            range,
            geom: None,
            sheet_face: None,
        }
    }

    pub fn with_segsides(mut self, left: Segside, right: Segside) -> Self {
        self.left = left;
        self.right = right;
        self
    }

    pub fn with_geom(mut self, geom: FfblendGeomRef) -> Self {
        self.geom = Some(geom);
        self
    }

    pub fn start(&self) -> &Segend {
        &self.start
    }

    pub fn end(&self) -> &Segend {
        &self.end
    }

    pub fn start_mut(&mut self) -> &mut Segend {
        &mut self.start
    }

    pub fn end_mut(&mut self) -> &mut Segend {
        &mut self.end
    }

    pub fn segend(&self, at_start: bool) -> &Segend {
        if at_start { &self.start } else { &self.end }
    }

    pub fn segend_mut(&mut self, at_start: bool) -> &mut Segend {
        if at_start { &mut self.start } else { &mut self.end }
    }

    pub fn segside(&self, side: Side) -> &Segside {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn face(&self, side: Side) -> FaceId {
        match side {
            Side::Left => self.left_face,
            Side::Right => self.right_face,
        }
    }

    pub fn range(&self) -> Interval {
        self.range
    }

    pub fn geom(&self) -> Option<&FfblendGeomRef> {
        self.geom.as_ref()
    }

    pub fn sheet_face(&self) -> Option<FaceId> {
        self.sheet_face
    }

    pub fn set_sheet_face(&mut self, face: FaceId) {
        self.sheet_face = Some(face);
    }

    /// Give up the segment, keeping its two ends.
    pub fn into_segends(self) -> (Segend, Segend) {
        (self.start, self.end)
    }
}

/// Segments in order along the blended edge. Neighbours are found by index.
#[derive(Debug, Default)]
pub struct FfSegmentChain {
    segments: Vec<FfSegment>,
}

impl FfSegmentChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: FfSegment) {
        self.segments.push(segment);
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn head(&self) -> Option<&FfSegment> {
        self.segments.first()
    }

    pub fn tail(&self) -> Option<&FfSegment> {
        self.segments.last()
    }

    pub fn get(&self, index: usize) -> Option<&FfSegment> {
        self.segments.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut FfSegment> {
        self.segments.get_mut(index)
    }

    pub fn next(&self, index: usize) -> Option<usize> {
        (index + 1 < self.segments.len()).then_some(index + 1)
    }

    pub fn prev(&self, index: usize) -> Option<usize> {
        index.checked_sub(1).filter(|i| *i < self.segments.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FfSegment> {
        self.segments.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FfSegment> {
        self.segments.iter_mut()
    }

    /// Indices whose end does not meet the next segment's start.
    pub fn gaps(&self, tol: &Tolerance) -> Vec<usize> {
        self.segments
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| !segends_join(pair[0].end(), pair[1].start(), tol))
            .map(|(i, _)| i)
            .collect()
    }

    /// Insert a segment after `index`, returning its index.
    pub fn insert_after(&mut self, index: usize, segment: FfSegment) -> usize {
        let at = (index + 1).min(self.segments.len());
        self.segments.insert(at, segment);
        at
    }

    pub fn into_segments(self) -> Vec<FfSegment> {
        self.segments
    }
}
