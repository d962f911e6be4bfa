//! One end of a blend segment: spine point, the two spring contacts and the
//! cross curve closing the sheet there.

use cad_kernel::geometry::unit;
use cad_kernel::topology::brep::CoedgeId;
use cad_kernel::{BoundedCurve, EntityRef, OrientedSurface, Point3, Tolerance, Vec3};
use tracing::debug;

use crate::chain::FfSegment;
use crate::error::Side;
use crate::geom_cache::{FfblendGeomRef, PointCur};
use crate::intercept::Intercept;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpineInfo {
    pub param: f64,
    pub position: Point3,
    pub direction: Vec3,
}

/// Owned by one segment or one pending-end slot. Ownership moves with
/// [`replace_segend`]; the only shared part is the blend geometry, which a
/// clone takes another handle to.
#[derive(Debug)]
pub struct Segend {
    spine: Option<SpineInfo>,
    left: Intercept,
    right: Intercept,
    cross_cur: Option<BoundedCurve>,
    cross_ffbl_geom: Option<FfblendGeomRef>,
    /// Coedge of this end's own sheet face on its cross edge.
    sheet_coed: Option<CoedgeId>,
    /// The neighbouring sheet's coedge this end was joined to.
    cross_sh_coed: Option<CoedgeId>,
    owner: Option<EntityRef>,
    ruled: bool,
    near_tangent: [bool; 2],
}

impl Clone for Segend {
    fn clone(&self) -> Self {
        Self {
            spine: self.spine,
            left: self.left.clone(),
            right: self.right.clone(),
            cross_cur: self.cross_cur.clone(),
            cross_ffbl_geom: self.cross_ffbl_geom.as_ref().map(|g| g.add()),
            sheet_coed: self.sheet_coed,
            cross_sh_coed: self.cross_sh_coed,
            owner: self.owner,
            ruled: self.ruled,
            near_tangent: self.near_tangent,
        }
    }
}

fn end_index(at_start: bool) -> usize {
    if at_start { 0 } else { 1 }
}

impl Segend {
    pub fn new(left: Intercept, right: Intercept) -> Self {
        Self {
            spine: None,
            left,
            right,
            cross_cur: None,
            cross_ffbl_geom: None,
            sheet_coed: None,
            cross_sh_coed: None,
            owner: None,
            ruled: false,
            near_tangent: [false; 2],
        }
    }

    pub fn with_owner(mut self, owner: EntityRef) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_geom(mut self, geom: FfblendGeomRef) -> Self {
        self.cross_ffbl_geom = Some(geom);
        self
    }

    pub fn with_ruled(mut self, ruled: bool) -> Self {
        self.ruled = ruled;
        self
    }

    pub fn with_spine(mut self, spine: SpineInfo) -> Self {
        self.spine = Some(spine);
        self
    }

    pub fn spine(&self) -> Option<&SpineInfo> {
        self.spine.as_ref()
    }

    pub fn spine_info_set(&self) -> bool {
        self.spine.is_some()
    }

    pub fn incpt(&self, side: Side) -> &Intercept {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn left_incpt(&self) -> &Intercept {
        &self.left
    }

    pub fn right_incpt(&self) -> &Intercept {
        &self.right
    }

    pub fn cross_cur(&self) -> Option<&BoundedCurve> {
        self.cross_cur.as_ref()
    }

    pub fn set_cross_cur(&mut self, cross: Option<BoundedCurve>) {
        self.cross_cur = cross;
    }

    pub fn cross_ffbl_geom(&self) -> Option<&FfblendGeomRef> {
        self.cross_ffbl_geom.as_ref()
    }

    pub fn owner(&self) -> Option<EntityRef> {
        self.owner
    }

    pub fn ruled(&self) -> bool {
        self.ruled
    }

    pub fn sheet_coedge(&self) -> Option<CoedgeId> {
        self.sheet_coed
    }

    pub fn set_sheet_coedge(&mut self, coedge: Option<CoedgeId>) {
        self.sheet_coed = coedge;
    }

    /// Abuts a neighbouring sheet face that already exists.
    pub fn is_external(&self) -> bool {
        self.cross_sh_coed.is_some()
    }

    pub fn cross_sh_coed(&self) -> Option<CoedgeId> {
        self.cross_sh_coed
    }

    /// Join to the neighbour's sheet coedge. Own cross geometry becomes
    /// advisory from here on.
    pub fn make_external(&mut self, coedge: CoedgeId) {
        self.cross_sh_coed = Some(coedge);
    }

    /// Swap the two contacts, as seen by a blend arriving from the other side.
    pub fn mirror(&mut self) {
        std::mem::swap(&mut self.left, &mut self.right);
    }

    pub fn mark_near_tangent_lateral(&mut self, at_start: bool) {
        self.near_tangent[end_index(at_start)] = true;
    }

    pub fn near_tangent_laterals(&self, at_start: bool) -> bool {
        self.near_tangent[end_index(at_start)]
    }

    fn any_near_tangent(&self) -> bool {
        self.near_tangent.iter().any(|b| *b) || self.left.tolerant() || self.right.tolerant()
    }

    /// Fill the spine point, direction and parameter once, from the
    /// segment's geometry or else this end's own. Returns whether it is set.
    pub fn update_spine_info(&mut self, convex: bool, at_start: bool, seg: Option<&FfSegment>) -> bool {
        if self.spine.is_some() {
            return true;
        }
        let spine = seg
            .and_then(FfSegment::geom)
            .or(self.cross_ffbl_geom.as_ref())
            .map(|g| g.spine());
        match spine {
            Some(spine) => self.update_spine_info_from(&spine, convex, at_start),
            None => false,
        }
    }

    /// As [`Segend::update_spine_info`], from a spine computed elsewhere.
    pub fn update_spine_info_from(&mut self, spine: &PointCur, convex: bool, at_start: bool) -> bool {
        if self.spine.is_some() {
            return true;
        }
        self.spine = match spine {
            PointCur::Curve { curve, .. } => {
                let param = if at_start { curve.range.low() } else { curve.range.high() };
                curve.curve.tangent(param).map(|direction| SpineInfo {
                    param,
                    position: curve.curve.position(param),
                    direction,
                })
            }
            PointCur::Point(p) => {
                let across = (self.left.position() - p).cross(&(self.right.position() - p));
                unit(&across).map(|d| SpineInfo {
                    param: 0.0,
                    position: *p,
                    direction: if convex { d } else { -d },
                })
            }
            PointCur::Unset | PointCur::Impossible => None,
        };
        self.spine.is_some()
    }

    fn spring_end(&self, side: Side, at_start: bool) -> Option<Point3> {
        let spring = self.cross_ffbl_geom.as_ref()?.spring(side);
        if at_start { spring.start() } else { spring.end() }
    }

    fn pos(&self, side: Side, at_start: bool) -> Option<Point3> {
        let incpt = self.incpt(side);
        if incpt.rel() != crate::intercept::SpringIntRel::Unknown {
            return Some(incpt.position());
        }
        self.spring_end(side, at_start)
    }

    /// Left contact point. A blank intercept falls back to the start or end
    /// of the left spring curve.
    pub fn left_pos(&self, at_start: bool) -> Option<Point3> {
        self.pos(Side::Left, at_start)
    }

    pub fn right_pos(&self, at_start: bool) -> Option<Point3> {
        self.pos(Side::Right, at_start)
    }

    fn offset(&self, side: Side, at_start: bool, convex: bool) -> Option<f64> {
        if self.ruled {
            return None;
        }
        let spine = self.spine.as_ref()?;
        let d = nalgebra::distance(&spine.position, &self.pos(side, at_start)?);
        Some(if convex { d } else { -d })
    }

    /// Signed offset of the spine from the left support. `None` where no
    /// offset is meaningful, as on chamfers.
    pub fn left_offset(&self, at_start: bool, convex: bool) -> Option<f64> {
        self.offset(Side::Left, at_start, convex)
    }

    pub fn right_offset(&self, at_start: bool, convex: bool) -> Option<f64> {
        self.offset(Side::Right, at_start, convex)
    }

    fn set_incpt(&mut self, side: Side, at_start: bool, base: &OrientedSurface) -> bool {
        let Some(p) = self.pos(side, at_start) else {
            return false;
        };
        let foot = base.foot_point(&p);
        let old = self.incpt(side);
        let mut incpt = Intercept::from_position(foot.point, old.face(), Some(foot.normal), Some(foot.uv));
        incpt.copy_blank_info(old);
        match side {
            Side::Left => self.left = incpt,
            Side::Right => self.right = incpt,
        }
        true
    }

    /// Re-seat the left intercept on `base`, taking the normal as direction.
    pub fn set_left_incpt(&mut self, at_start: bool, base: &OrientedSurface) -> bool {
        self.set_incpt(Side::Left, at_start, base)
    }

    pub fn set_right_incpt(&mut self, at_start: bool, base: &OrientedSurface) -> bool {
        self.set_incpt(Side::Right, at_start, base)
    }

    /// Zero width: the two contacts meet and nothing spans between them.
    pub fn pointy_end(&self, tol: f64) -> bool {
        let width = nalgebra::distance(&self.left.position(), &self.right.position());
        width < tol && self.cross_cur.as_ref().is_none_or(|c| c.approximate_length(4) < tol)
    }

    pub(crate) fn take_info_from(&mut self, other: &Segend) {
        self.left.copy_blank_info(&other.left);
        self.right.copy_blank_info(&other.right);
        self.sheet_coed = self.sheet_coed.or(other.sheet_coed);
        if self.cross_sh_coed.is_none() {
            self.cross_sh_coed = other.cross_sh_coed;
        }
        if self.cross_ffbl_geom.is_none() {
            self.cross_ffbl_geom = other.cross_ffbl_geom.as_ref().map(|g| g.add());
        }
        if self.cross_cur.is_none() {
            self.cross_cur = other.cross_cur.clone();
        }
        if self.spine.is_none() {
            self.spine = other.spine;
        }
        self.owner = self.owner.or(other.owner);
        self.near_tangent[0] |= other.near_tangent[0];
        self.near_tangent[1] |= other.near_tangent[1];
    }
}

fn spine_param(end: &Segend, seg: Option<&FfSegment>, at_start: bool) -> Option<f64> {
    if let Some(spine) = end.spine() {
        return Some(spine.param);
    }
    let spine = seg?.geom()?.spine();
    let curve = spine.as_curve()?;
    Some(if at_start { curve.range.low() } else { curve.range.high() })
}

/// Whether every contact of `a` lies within `tol` of its partner on `b`.
/// `crossed` pairs `a`'s left with `b`'s right.
fn contacts_within(a: &Segend, b: &Segend, crossed: bool, tol: f64) -> bool {
    [Side::Left, Side::Right].iter().all(|&side| {
        let (ia, ib) = (a.incpt(side), b.incpt(if crossed { side.other() } else { side }));
        let reach = tol.max(ia.tolerance()).max(ib.tolerance());
        nalgebra::distance(&ia.position(), &ib.position()) < reach
    })
}

/// Whether `a` (ending one segment) and `b` (starting the next) meet within
/// the absolute resolution. With `respar`, their spine parameters must also
/// agree that closely.
pub fn segends_coincident(
    a: &Segend,
    b: &Segend,
    seg_a: Option<&FfSegment>,
    seg_b: Option<&FfSegment>,
    respar: Option<f64>,
    tol: &Tolerance,
) -> bool {
    if !contacts_within(a, b, false, tol.resabs) {
        return false;
    }
    match respar {
        Some(respar) => match (spine_param(a, seg_a, false), spine_param(b, seg_b, true)) {
            (Some(ta), Some(tb)) => (ta - tb).abs() < respar,
            _ => true,
        },
        None => true,
    }
}

/// Fallback join test, consulted only when [`segends_coincident`] fails:
/// near-tangent or tolerant laterals let the contacts miss by up to the
/// fitting tolerance.
pub fn segends_near_tangent(a: &Segend, b: &Segend, tol: &Tolerance) -> bool {
    near_tangent_pairing(a, b, false, tol)
}

fn near_tangent_pairing(a: &Segend, b: &Segend, crossed: bool, tol: &Tolerance) -> bool {
    if contacts_within(a, b, crossed, tol.resabs) {
        return false;
    }
    (a.any_near_tangent() || b.any_near_tangent()) && contacts_within(a, b, crossed, tol.resfit)
}

/// The join decision.
pub fn segends_join(a: &Segend, b: &Segend, tol: &Tolerance) -> bool {
    segends_coincident(a, b, None, None, None, tol) || segends_near_tangent(a, b, tol)
}

/// The join decision for ends of two blends meeting at a vertex, which may
/// see each other's sides swapped. `Some(crossed)` when they join, with
/// `crossed` set if `a`'s left contact meets `b`'s right.
pub fn segends_join_pairing(a: &Segend, b: &Segend, tol: &Tolerance) -> Option<bool> {
    [false, true]
        .into_iter()
        .find(|&crossed| contacts_within(a, b, crossed, tol.resabs) || near_tangent_pairing(a, b, crossed, tol))
}

/// Move `new` into `slot`, dropping the segend held there. With `test`, the
/// two must pass the join test first, otherwise nothing changes. With
/// `copy_back`, whatever `new` lacks is taken from the old segend. `new` is
/// left empty on success.
pub fn replace_segend(slot: &mut Segend, new: &mut Option<Segend>, test: bool, copy_back: bool, tol: &Tolerance) -> bool {
    let Some(candidate) = new.as_ref() else {
        return false;
    };
    if test && !segends_join(slot, candidate, tol) {
        debug!("segend replacement refused, ends do not meet");
        return false;
    }
    let Some(mut candidate) = new.take() else {
        return false;
    };
    if copy_back {
        candidate.take_info_from(slot);
    }
    *slot = candidate;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom_cache::FfblendGeom;
    use approx::assert_relative_eq;
    use cad_kernel::geometry::surfaces::Plane;
    use cad_kernel::Surface;

    fn at(l: [f64; 3], r: [f64; 3]) -> Segend {
        Segend::new(
            Intercept::from_position(Point3::from(l), None, None, None),
            Intercept::from_position(Point3::from(r), None, None, None),
        )
    }

    fn spine_geom() -> FfblendGeomRef {
        let geom = FfblendGeom::shared();
        geom.set_spine(PointCur::curve(
            BoundedCurve::segment(Point3::new(0.0, 1.0, 1.0), Point3::new(0.0, 1.0, 5.0)).unwrap(),
        ));
        geom.set_spring(
            Side::Left,
            PointCur::curve(BoundedCurve::segment(Point3::new(0.0, 0.0, 1.0), Point3::new(0.0, 0.0, 5.0)).unwrap()),
        );
        geom
    }

    #[test]
    fn test_update_spine_info_is_idempotent() {
        let geom = spine_geom();
        let mut end = at([0.0, 0.0, 1.0], [1.0, 1.0, 1.0]).with_geom(geom.add());
        assert!(end.update_spine_info(true, true, None));
        let first = *end.spine().unwrap();
        geom.set_spine(PointCur::Impossible);
        assert!(end.update_spine_info(true, true, None));
        assert_eq!(*end.spine().unwrap(), first);
        assert_relative_eq!(first.position, Point3::new(0.0, 1.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_offsets_and_sentinel() {
        let mut end = at([0.0, 0.0, 1.0], [1.0, 1.0, 1.0]).with_geom(spine_geom());
        assert_eq!(end.left_offset(true, true), None);
        end.update_spine_info(true, true, None);
        assert_relative_eq!(end.left_offset(true, true).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(end.right_offset(true, false).unwrap(), -1.0, epsilon = 1e-12);
        let ruled = at([0.0, 0.0, 1.0], [1.0, 1.0, 1.0]).with_ruled(true).with_spine(*end.spine().unwrap());
        assert_eq!(ruled.left_offset(true, true), None);
    }

    #[test]
    fn test_blank_contact_falls_back_to_spring() {
        let end = Segend::new(Intercept::blank(), Intercept::blank()).with_geom(spine_geom());
        assert_relative_eq!(end.left_pos(false).unwrap(), Point3::new(0.0, 0.0, 5.0), epsilon = 1e-12);
        assert_eq!(end.right_pos(true), None);
    }

    #[test]
    fn test_set_left_incpt_projects_onto_base() {
        let mut end = at([0.3, 0.2, 1.5], [1.0, 1.0, 1.0]);
        let base = OrientedSurface::new(Surface::Plane(Plane::new(Point3::origin(), Vec3::z()).unwrap()), false);
        assert!(end.set_left_incpt(true, &base));
        let left = end.left_incpt();
        assert_relative_eq!(left.position().z, 0.0, epsilon = 1e-12);
        assert_relative_eq!(left.direction().unwrap(), Vec3::z(), epsilon = 1e-12);
        assert!(left.face_pars_set());
    }

    #[test]
    fn test_join_predicates_are_exclusive() {
        let tol = Tolerance::default();
        let a = at([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        let b = at([0.0, 0.0, 1e-8], [1.0, 0.0, 0.0]);
        assert!(segends_coincident(&a, &b, None, None, None, &tol));
        assert!(!segends_near_tangent(&a, &b, &tol));

        let mut c = at([0.0, 0.0, 1e-4], [1.0, 0.0, 0.0]);
        assert!(!segends_coincident(&a, &c, None, None, None, &tol));
        assert!(!segends_near_tangent(&a, &c, &tol));
        c.mark_near_tangent_lateral(true);
        assert!(c.near_tangent_laterals(true));
        assert!(segends_near_tangent(&a, &c, &tol));
        assert!(segends_join(&a, &c, &tol));
    }

    #[test]
    fn test_join_pairing_finds_crossed_sides() {
        let tol = Tolerance::default();
        let a = at([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        let mut b = at([1.0, 0.0, 0.0], [0.0, 0.0, 0.0]);
        assert!(!segends_join(&a, &b, &tol));
        assert_eq!(segends_join_pairing(&a, &b, &tol), Some(true));
        b.mirror();
        assert!(segends_join(&a, &b, &tol));
        assert_eq!(segends_join_pairing(&a, &b, &tol), Some(false));
        let far = at([5.0, 0.0, 0.0], [6.0, 0.0, 0.0]);
        assert_eq!(segends_join_pairing(&a, &far, &tol), None);
    }

    #[test]
    fn test_clone_shares_geometry() {
        let geom = spine_geom();
        let end = at([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]).with_geom(geom.add());
        let copy = end.clone();
        assert_eq!(geom.use_count(), 3);
        assert!(FfblendGeomRef::ptr_eq(copy.cross_ffbl_geom().unwrap(), &geom));
        drop(end);
        assert_eq!(geom.use_count(), 2);
    }

    #[test]
    fn test_replace_segend_fails_closed() {
        let tol = Tolerance::default();
        let mut slot = at([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        let mut far = Some(at([5.0, 0.0, 0.0], [6.0, 0.0, 0.0]));
        assert!(!replace_segend(&mut slot, &mut far, true, false, &tol));
        assert!(far.is_some());
        assert_relative_eq!(slot.left_incpt().position().x, 0.0);

        slot.make_external(CoedgeId::default());
        let mut near = Some(at([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]));
        assert!(replace_segend(&mut slot, &mut near, true, true, &tol));
        assert!(near.is_none());
        assert!(slot.is_external());
    }

    #[test]
    fn test_replace_releases_old_geometry() {
        let tol = Tolerance::default();
        let geom = spine_geom();
        let mut slot = at([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]).with_geom(geom.add());
        assert_eq!(geom.use_count(), 2);
        let mut new = Some(at([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]));
        assert!(replace_segend(&mut slot, &mut new, false, false, &tol));
        assert_eq!(geom.use_count(), 1);
    }

    #[test]
    fn test_pointy_end() {
        let end = at([1.0, 1.0, 1.0], [1.0, 1.0, 1.0]);
        assert!(end.pointy_end(1e-6));
        assert!(!at([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]).pointy_end(1e-6));
    }
}
