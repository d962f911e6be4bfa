//! Property-based tests for blend invariants using the `proptest` crate.

use proptest::prelude::*;

use cad_blend::attrib::{ReorderInfo, ReorderSide};
use cad_blend::{BlendOutcome, Cvty, EdCvtyInfo, Intercept, PtCvtyInfo, SpringIntRel};
use cad_kernel::topology::brep::FaceId;
use cad_kernel::topology::primitives::make_block;
use cad_kernel::{EntityStore, Interval, Point3, Vec3};
use slotmap::SlotMap;

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

const ANGLE_TOL: f64 = 1e-3;

fn arb_sharp_angle() -> impl Strategy<Value = f64> {
    prop_oneof![(2.0 * ANGLE_TOL)..3.0, -3.0..(-2.0 * ANGLE_TOL)]
}

fn arb_side() -> impl Strategy<Value = ReorderSide> {
    prop_oneof![Just(ReorderSide::NotNeeded), Just(ReorderSide::Needed)]
}

fn arb_point() -> impl Strategy<Value = Point3> {
    (-10.0f64..10.0, -10.0f64..10.0, -10.0f64..10.0).prop_map(|(x, y, z)| Point3::new(x, y, z))
}

// ---------------------------------------------------------------------------
// Convexity
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn convexity_follows_angle_sign(angle in arb_sharp_angle()) {
        let cvty = PtCvtyInfo::new(angle, Cvty::UNSET, None).instantiate(ANGLE_TOL);
        prop_assert_eq!(cvty.sharp_convex(), angle > 0.0);
        prop_assert_eq!(cvty.sharp_concave(), angle < 0.0);
        let flipped = PtCvtyInfo::new(-angle, Cvty::UNSET, None).instantiate(ANGLE_TOL);
        prop_assert_eq!(flipped.sharp_convex(), cvty.sharp_concave());
        prop_assert!(!flipped.same_sense(cvty));
    }

    #[test]
    fn small_angles_are_tangent(angle in -0.5 * ANGLE_TOL..0.5 * ANGLE_TOL) {
        let cvty = PtCvtyInfo::new(angle, Cvty::UNSET, None).instantiate(ANGLE_TOL);
        prop_assert!(cvty.tangent());
        prop_assert!(!cvty.sharp_convex() && !cvty.sharp_concave());
    }

    #[test]
    fn edge_spanning_both_signs_is_mixed(lo in -3.0..(-2.0 * ANGLE_TOL), hi in (2.0 * ANGLE_TOL)..3.0) {
        let range = Interval::new(0.0, 1.0);
        let info = EdCvtyInfo::new(Interval::new(lo, hi), Cvty::UNSET, None, range, false);
        prop_assert!(info.instantiate(ANGLE_TOL).mixed());
        let convex = EdCvtyInfo::new(Interval::new(hi * 0.5, hi), Cvty::UNSET, None, range, false);
        prop_assert_eq!(convex.instantiate(ANGLE_TOL), Cvty::CONVEX);
    }

    #[test]
    fn merge_keeps_agreeing_sense(a in arb_sharp_angle(), b in arb_sharp_angle()) {
        let ca = PtCvtyInfo::new(a, Cvty::UNSET, None).instantiate(ANGLE_TOL);
        let cb = PtCvtyInfo::new(b, Cvty::UNSET, None).instantiate(ANGLE_TOL);
        let merged = ca.merge(cb);
        prop_assert_eq!(merged.mixed(), (a > 0.0) != (b > 0.0));
        prop_assert_eq!(merged, cb.merge(ca));
    }
}

// ---------------------------------------------------------------------------
// Reorder
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn reversal_complements_reorder_number(left in arb_side(), right in arb_side()) {
        let plain = ReorderInfo::new(left, right, false).reorder_no();
        let reversed = ReorderInfo::new(left, right, true).reorder_no();
        prop_assert_eq!(plain + reversed, 1);
    }

    #[test]
    fn impossible_side_never_reorders(other in arb_side(), rev in any::<bool>(), on_left in any::<bool>()) {
        let info = if on_left {
            ReorderInfo::new(ReorderSide::Impossible, other, rev)
        } else {
            ReorderInfo::new(other, ReorderSide::Impossible, rev)
        };
        prop_assert_eq!(info.reorder_no(), 0);
        prop_assert!(!info.needs_reorder());
    }
}

// ---------------------------------------------------------------------------
// Intercepts
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn face_intercepts_carry_face_parameters(p in arb_point(), u in -5.0f64..5.0, v in -5.0f64..5.0, inside in any::<bool>()) {
        let mut faces: SlotMap<FaceId, ()> = SlotMap::with_key();
        let face = inside.then(|| faces.insert(()));
        let incpt = Intercept::from_position(p, face, Some(Vec3::x()), Some((u, v)));
        let expected = if inside { SpringIntRel::InFace } else { SpringIntRel::OutFace };
        prop_assert_eq!(incpt.rel(), expected);
        prop_assert_eq!(incpt.face_pars(), Some((u, v)));
        prop_assert_eq!(incpt.edge_par(), None);
        prop_assert!(incpt.face_pars_set() && !incpt.edge_par_set());
    }

    #[test]
    fn edge_intercepts_carry_edge_parameter(s in 0.0f64..1.0) {
        let mut store = EntityStore::new();
        make_block(&mut store, Point3::origin(), Point3::new(2.0, 2.0, 2.0)).unwrap();
        let (_, edge) = store.edges.iter().next().unwrap();
        let coedge = edge.coedges[0];
        let t = edge.range.interpolate(s);
        let p = edge.curve.position(t);
        let incpt = Intercept::on_coedge(&store, coedge, p, t, 1e-6).unwrap();
        prop_assert!(incpt.rel().uses_edge_par());
        prop_assert_eq!(incpt.edge_par(), Some(t));
        prop_assert_eq!(incpt.face_pars(), None);
        prop_assert_eq!(incpt.coedge(), Some(coedge));
        let at_end = [edge.start, edge.end]
            .iter()
            .any(|v| nalgebra::distance(&store.vertex_point(*v).unwrap(), &p) < 1e-6);
        prop_assert_eq!(incpt.rel() == SpringIntRel::AtVertex, at_end);
    }
}

// ---------------------------------------------------------------------------
// Outcome codes
// ---------------------------------------------------------------------------

#[test]
fn outcome_codes_are_fixed() {
    assert_eq!(BlendOutcome::Success.code(), 1);
    assert_eq!(BlendOutcome::RetryLater.code(), 0);
    assert_eq!(BlendOutcome::Impossible.code(), -1);
    assert_eq!(BlendOutcome::from_code(0), Some(BlendOutcome::RetryLater));
    assert_eq!(BlendOutcome::from_code(2), None);
}
