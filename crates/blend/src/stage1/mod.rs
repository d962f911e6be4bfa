//! Stage 1 of blending: build the blend sheet, one attribute at a time.
//!
//! [`make_sheet_faces`] builds the sheet faces of one attribute. Everything
//! it creates is staged in an [`Attempt`] and only handed to the session
//! once the whole attribute has succeeded. Joins to neighbouring sheets are
//! checked during the build and made only after it. On failure the faces
//! are taken down again and the attribute rolled back to where it was,
//! apart from the recorded error. [`run_stage1`] drives the work list over
//! all attributes.

mod face_blend;
mod ffints;
mod geometry;
mod junction;
mod segments;
mod sheet;
mod vertex;
mod worklist;

use cad_kernel::topology::brep::{EdgeId, FaceId, ShellId, VertexId};
use cad_kernel::{BoundedCurve, EntityRef, EntityStore, Interval, Tolerance};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

pub use vertex::EndPlanKind;
pub use worklist::{move_bl_attrib_to_list_end, run_stage1};

use crate::attrib::info::merge_owner;
use crate::attrib::{AttribId, BlendInfo, BlendKind, BlendStatus, EndCondition, InfoTable, SupportEntity};
use crate::config::BlendConfig;
use crate::convexity::ConvexityCache;
use crate::error::{BlendError, BlendOutcome, BlendResult, Side};
use crate::geom_cache::FfblendGeomRef;
use crate::intercept::{Intercept, SpringIntRel};
use crate::segend::{Segend, SpineInfo};
use crate::session::{BlendSession, PendingEnd, PendingKind, VertexSphere};
use face_blend::{build_face_blend_sheet, face_blend_curves};
use ffints::{process_ffints, spring_end_incpt};
use geometry::{compute_ffblend_geom, section_at, BlendCurves, EdgeFrame, EndCut};
use junction::{
    join_sheet_faces, join_sheet_faces_on_sphere, make_end_join, make_sphere_join, mitre_sheet_end, EndJoin, Join,
    SphereJoin,
};
use segments::{edge_ffblend_segments, SegmentPlan};
use sheet::{build_ring_face, SheetFace};
use vertex::{find_cuspate_incpt, neighbours, plan_end, EndContext, EndPlan};

/// How one end of one attribute was finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndPlanRecord {
    pub attrib: AttribId,
    pub at_start: bool,
    pub kind: EndPlanKind,
    pub condition: EndCondition,
    pub mate: Option<AttribId>,
    /// The springs meet at this end, leaving no cross curve.
    pub pointy: bool,
}

/// What one attempt has built, held back until it succeeds.
#[derive(Debug, Default)]
struct Attempt {
    built: Vec<FaceId>,
    infos: InfoTable,
    pending: Vec<(VertexId, PendingEnd)>,
    /// Neighbours' ends taken from the session, to be put back if we fail.
    consumed: Vec<(VertexId, PendingEnd)>,
    /// Joins checked during the build, made once it has succeeded.
    joins: Vec<Join>,
    /// Cross edges the blend runs on smoothly across.
    tangent: Vec<(EdgeId, VertexId)>,
    spheres: Vec<(VertexId, VertexSphere)>,
    plans: Vec<EndPlanRecord>,
    conditions: Vec<(bool, EndCondition)>,
}

impl Attempt {
    fn note(&mut self, owner: EntityRef, info: BlendInfo) {
        self.infos.attach(owner, info);
    }

    fn note_sheet(&mut self, id: AttribId, sheet: &SheetFace, supports: SupportEntity) {
        self.note(EntityRef::Face(sheet.face), BlendInfo::ExplicitBlend { attrib: id });
        for side in [Side::Left, Side::Right] {
            let support = supports.face(side);
            self.note(EntityRef::Edge(sheet.spring(side)), BlendInfo::Spring { support, side });
        }
    }
}

/// Build the sheet faces of attribute `id`.
///
/// Returns the three-way outcome: on `RetryLater` or `Impossible` the sheet
/// is left as it was and the first error is kept on the attribute. Only a
/// missing attribute is an `Err`.
#[instrument(skip(store, session))]
pub fn make_sheet_faces(store: &mut EntityStore, session: &mut BlendSession, id: AttribId) -> BlendResult<BlendOutcome> {
    let kind = session.graph.get(id)?.kind();
    let geom = match kind {
        BlendKind::FaceFace => match cached_geom(store, session, id) {
            Ok(geom) => Some(geom),
            Err(err) => return fail(session, id, err),
        },
        BlendKind::FaceOnly => None,
    };

    let mark = session.history.mark();
    let mut attempt = Attempt::default();
    let built = match geom {
        Some(geom) => build_face_face(store, session, id, geom, &mut attempt),
        None => build_face_only(store, session, id, &mut attempt),
    };
    let built = match built {
        Ok(()) => make_joins(store, session, &mut attempt),
        Err(err) => Err(err),
    };
    match built {
        Ok(()) => {
            commit(session, id, attempt)?;
            info!(?id, "sheet built");
            Ok(BlendOutcome::Success)
        }
        Err(err) => {
            abandon(store, session, attempt);
            session.graph.roll_back(&mut session.history, mark);
            fail(session, id, err)
        }
    }
}

/// The attribute's explicit geometry, computed and cached on first use.
fn cached_geom(store: &EntityStore, session: &mut BlendSession, id: AttribId) -> BlendResult<FfblendGeomRef> {
    let attrib = session.graph.get(id)?;
    if let Some(geom) = attrib.geom() {
        if geom.is_impossible() {
            return Err(BlendError::ImpossibleGeometry);
        }
        if geom.complete() {
            return Ok(geom.add());
        }
    }
    let frame = EdgeFrame::new(store, attrib)?;
    let tol = session.config().tolerance;
    let geom = compute_ffblend_geom(&frame, attrib.profile(), &tol)?;
    session.edit(id)?.set_geom(Some(geom.add()));
    if geom.is_impossible() {
        return Err(BlendError::ImpossibleGeometry);
    }
    Ok(geom)
}

fn fail(session: &mut BlendSession, id: AttribId, err: BlendError) -> BlendResult<BlendOutcome> {
    let outcome = err.outcome();
    match outcome {
        BlendOutcome::Impossible => warn!(?id, %err, "blend failed"),
        _ => debug!(?id, %err, "blend must wait"),
    }
    let mut attrib = session.edit(id)?;
    attrib.record_error(err);
    attrib.set_outcome(outcome);
    attrib.set_status(BlendStatus::Disagree);
    Ok(outcome)
}

/// Make the joins checked during the build. They stay in the attempt, so
/// if one fails every neighbour's end, joined or not, is handed back by
/// [`abandon`] once our faces are gone.
fn make_joins(store: &mut EntityStore, session: &mut BlendSession, attempt: &mut Attempt) -> BlendResult<()> {
    let tol = session.config().tolerance;
    let joins = std::mem::take(&mut attempt.joins);
    let mut result = Ok(());
    for join in &joins {
        result = make_join(store, session, attempt, join, &tol);
        if result.is_err() {
            break;
        }
    }
    attempt.joins = joins;
    result
}

fn make_join(
    store: &mut EntityStore,
    session: &mut BlendSession,
    attempt: &mut Attempt,
    join: &Join,
    tol: &Tolerance,
) -> BlendResult<()> {
    match join {
        Join::Ends(join) => {
            let joined = make_end_join(store, join, tol)?;
            if let Some((gone, kept)) = joined.merged {
                merge_owner(&mut attempt.infos, EntityRef::Edge(kept), EntityRef::Edge(gone));
                if join.smooth {
                    attempt.tangent.push((kept, join.vertex));
                }
            }
            debug!(vertex = ?join.vertex, external = joined.segend.is_external(), "end joined");
        }
        Join::Sphere(join) => {
            let shell = session.sheet_shell(store);
            let face = make_sphere_join(store, shell, join, tol)?;
            attempt.built.push(face);
            attempt.note(EntityRef::Face(face), BlendInfo::PointVertexXRef { model_vertex: join.vertex });
            for &attrib in &join.sphere.members {
                attempt.note(EntityRef::Face(face), BlendInfo::ExplicitBlend { attrib });
            }
            attempt.spheres.push((
                join.vertex,
                VertexSphere {
                    face: Some(face),
                    ..join.sphere.clone()
                },
            ));
        }
    }
    Ok(())
}

fn commit(session: &mut BlendSession, id: AttribId, attempt: Attempt) -> BlendResult<()> {
    let Attempt {
        built,
        infos,
        pending,
        consumed: _,
        joins: _,
        tangent,
        spheres,
        plans,
        conditions,
    } = attempt;
    for owner in infos.owners() {
        for info in infos.infos_of(owner) {
            session.infos.attach(owner, info.clone());
        }
    }
    for (edge, vertex) in tangent {
        let owner = EntityRef::Edge(edge);
        let vertex = Some(vertex);
        for info in session.infos.detach_all(owner) {
            let info = match info {
                BlendInfo::CrossEdge { .. } => BlendInfo::TanCrossEdge { vertex },
                other => other,
            };
            session.infos.attach(owner, info);
        }
        session.infos.attach(owner, BlendInfo::TanCrossEdge { vertex });
    }
    for (vertex, end) in pending {
        session.pending.entry(vertex).or_default().push(end);
    }
    for (vertex, sphere) in spheres {
        session.spheres.insert(vertex, sphere);
    }
    session.end_plans.extend(plans);
    let mut attrib = session.edit(id)?;
    for face in built {
        attrib.add_sheet_face(face);
    }
    for (at_start, condition) in conditions {
        attrib.set_end_condition(at_start, condition);
    }
    attrib.set_status(BlendStatus::Agree);
    attrib.set_outcome(BlendOutcome::Success);
    Ok(())
}

fn abandon(store: &mut EntityStore, session: &mut BlendSession, attempt: Attempt) {
    for face in attempt.built.into_iter().rev() {
        if let Err(err) = store.delete_face(face) {
            debug!(?face, %err, "sheet face already gone");
        }
    }
    let handed_back = attempt.joins.into_iter().flat_map(Join::into_theirs);
    for (vertex, end) in attempt.consumed.into_iter().chain(handed_back) {
        session.pending.entry(vertex).or_default().push(end);
    }
}

/// Segend closing the blend at one end cut. A cuspate end takes the contact
/// lying on its mate's edge from that edge. Contacts inside their support
/// are seated on the support surface.
#[allow(clippy::too_many_arguments)]
fn end_segend(
    store: &EntityStore,
    frame: &EdgeFrame,
    curves: &BlendCurves,
    cut: &EndCut,
    at_start: bool,
    geom: &FfblendGeomRef,
    ruled: bool,
    cuspate: Option<(Side, Intercept)>,
    tol: &Tolerance,
) -> BlendResult<Segend> {
    let mut incpts = Vec::with_capacity(2);
    for side in [Side::Left, Side::Right] {
        let incpt = match &cuspate {
            Some((s, incpt)) if *s == side => incpt.clone(),
            _ => {
                let (param, p) = cut.contact(side);
                let along = curves.spring(side).curve.tangent(param);
                spring_end_incpt(store, frame.face(side), Some(frame.edge), p, along, tol)?
            }
        };
        incpts.push(incpt);
    }
    let right = incpts.pop().ok_or(BlendError::ImpossibleGeometry)?;
    let left = incpts.pop().ok_or(BlendError::ImpossibleGeometry)?;
    let direction = curves
        .spine
        .curve
        .tangent(cut.spine_param)
        .ok_or(BlendError::ImpossibleGeometry)?;
    let mut segend = Segend::new(left, right)
        .with_owner(EntityRef::Edge(frame.edge))
        .with_geom(geom.add())
        .with_ruled(ruled)
        .with_spine(SpineInfo {
            param: cut.spine_param,
            position: cut.spine_point,
            direction,
        });
    segend.set_cross_cur(cut.cross.clone());
    for side in [Side::Left, Side::Right] {
        if segend.incpt(side).rel() != SpringIntRel::InFace {
            continue;
        }
        let seated = match side {
            Side::Left => segend.set_left_incpt(at_start, frame.surf(side)),
            Side::Right => segend.set_right_incpt(at_start, frame.surf(side)),
        };
        if !seated {
            debug!(?side, at_start, "contact left unseated");
        }
    }
    Ok(segend)
}

/// Mark the end's laterals near-tangent when another model edge at its
/// vertex is within the near-tangent angle of smooth.
fn mark_near_tangent(
    store: &EntityStore,
    cvty_cache: &mut ConvexityCache,
    frame: &EdgeFrame,
    segend: &mut Segend,
    at_start: bool,
    config: &BlendConfig,
) -> BlendResult<()> {
    for edge in store.vertex_edges(frame.vertex(at_start)) {
        if edge == frame.edge {
            continue;
        }
        let info = cvty_cache.compute_cache_mid_pt_cvty_info(store, edge, config)?;
        if info.unset() || info.unknown() {
            continue;
        }
        if info.angle().abs() < config.near_tangent_angle {
            debug!(?edge, at_start, "near-tangent lateral");
            segend.mark_near_tangent_lateral(at_start);
            return Ok(());
        }
    }
    Ok(())
}

/// The blend's curves cut back to run from `start` to `end`.
fn trimmed(curves: &BlendCurves, start: &EndCut, end: &EndCut, tol: &Tolerance) -> BlendResult<BlendCurves> {
    let part = |bc: &BoundedCurve, a: f64, b: f64| -> BlendResult<BoundedCurve> {
        let speed = bc.curve.derivative(bc.range.mid()).norm();
        if b - a <= tol.param_resolution(speed) {
            debug!(a, b, "end cuts cross over");
            return Err(BlendError::ImpossibleGeometry);
        }
        Ok(BoundedCurve::new(bc.curve.clone(), Interval::new(a, b)))
    };
    Ok(BlendCurves {
        spine: part(&curves.spine, start.spine_param, end.spine_param)?,
        left: part(&curves.left, start.left.0, end.left.0)?,
        right: part(&curves.right, start.right.0, end.right.0)?,
        surface: curves.surface.clone(),
    })
}

fn build_face_face(
    store: &mut EntityStore,
    session: &mut BlendSession,
    id: AttribId,
    geom: FfblendGeomRef,
    attempt: &mut Attempt,
) -> BlendResult<()> {
    let config = *session.config();
    let tol = config.tolerance;
    let (frame, profile) = {
        let attrib = session.graph.get(id)?;
        (EdgeFrame::new(store, attrib)?, attrib.profile().clone())
    };
    let curves = BlendCurves::from_geom(&geom)?;
    let shell = session.sheet_shell(store);
    let supports = SupportEntity {
        left: frame.left,
        right: frame.right,
    };

    if frame.closed() {
        return build_ring(store, session, id, &frame, &curves, shell, attempt);
    }

    let plans = {
        let ctx = EndContext {
            store: &*store,
            graph: &session.graph,
            config: &config,
            id,
            frame: &frame,
            curves: &curves,
        };
        [plan_end(&ctx, &mut session.cvty_cache, true)?, plan_end(&ctx, &mut session.cvty_cache, false)?]
    };
    for (at_start, plan) in [true, false].into_iter().zip(&plans) {
        debug!(at_start, kind = ?plan.kind, mate = ?plan.mate, "end plan");
    }

    let reach = 2.0 * profile.size() + frame.length();
    let start_cut = section_at(&curves, &plans[0].plane, 0.0, &frame.curve.curve, reach, &tol)?;
    let end_cut = section_at(&curves, &plans[1].plane, 1.0, &frame.curve.curve, reach, &tol)?;
    let trimmed = trimmed(&curves, &start_cut, &end_cut, &tol)?;

    let left = process_ffints(store, frame.left, Some(frame.edge), &trimmed.left, &tol)?;
    let right = process_ffints(store, frame.right, Some(frame.edge), &trimmed.right, &tol)?;

    let ruled = profile.is_ruled();
    let mut ends = Vec::with_capacity(2);
    for ((plan, cut), at_start) in plans.iter().zip([&start_cut, &end_cut]).zip([true, false]) {
        let cuspate = match (plan.kind, plan.mate) {
            (EndPlanKind::Cuspate, Some(mate)) => match session.graph.get(mate)?.owner_edge() {
                Some(edge) => find_cuspate_incpt(store, &frame, edge, cut, &tol)?,
                None => None,
            },
            _ => None,
        };
        let mut segend = end_segend(store, &frame, &trimmed, cut, at_start, &geom, ruled, cuspate, &tol)?;
        mark_near_tangent(store, &mut session.cvty_cache, &frame, &mut segend, at_start, &config)?;
        ends.push(segend);
    }
    let end = ends.pop().ok_or(BlendError::ImpossibleGeometry)?;
    let start = ends.pop().ok_or(BlendError::ImpossibleGeometry)?;

    let plan = SegmentPlan {
        frame: &frame,
        curves: &trimmed,
        geom: &geom,
        ruled,
        reach,
    };
    let run = edge_ffblend_segments(
        store,
        shell,
        &plan,
        &left,
        &right,
        start,
        end,
        config.fill_gap_planarity,
        &tol,
        &mut attempt.built,
    )?;
    let stretches: Vec<SupportEntity> = run
        .chain
        .iter()
        .map(|segment| SupportEntity {
            left: segment.face(Side::Left),
            right: segment.face(Side::Right),
        })
        .collect();
    let (start, end, sheets) = run.into_ends()?;
    let (Some(first), Some(last)) = (sheets.first().copied(), sheets.last().copied()) else {
        return Err(BlendError::ImpossibleGeometry);
    };

    for (sheet, &pair) in sheets.iter().zip(&stretches) {
        // A bi-blend stretch is noted against its own supports.
        let bi_blend = pair != supports;
        if bi_blend {
            session.edit(id)?.push_supports(pair);
        }
        let current = session.graph.get(id)?.supports();
        attempt.note_sheet(id, sheet, current);
        for side in [Side::Left, Side::Right] {
            note_edge_coincidence(store, frame.edge, current.face(side), sheet.spring(side), attempt, &tol)?;
        }
        if bi_blend {
            session.edit(id)?.pop_supports();
        }
    }
    for pair in sheets.windows(2) {
        for cross in [pair[0].end_cross, pair[1].start_cross].into_iter().flatten() {
            attempt.note(EntityRef::Edge(cross), BlendInfo::CrossEdge { vertex: None });
        }
    }

    let [start_plan, end_plan] = plans;
    finish_end(store, session, id, &frame, start_plan, start, first, true, attempt)?;
    finish_end(store, session, id, &frame, end_plan, end, last, false, attempt)?;
    Ok(())
}

/// Note a spring edge lying along a model edge of its support.
fn note_edge_coincidence(
    store: &EntityStore,
    blended: EdgeId,
    support: FaceId,
    spring: EdgeId,
    attempt: &mut Attempt,
    tol: &Tolerance,
) -> BlendResult<()> {
    let bc = store.edge_bounded_curve(spring)?;
    for edge in store.face_edges(support)? {
        if edge == blended {
            continue;
        }
        let mut on = true;
        for p in [bc.start(), bc.mid(), bc.end()] {
            on &= store.point_on_edge(edge, &p, tol.resabs)?.is_some();
        }
        if on {
            attempt.note(EntityRef::Edge(spring), BlendInfo::EdgeCoincidence { model_edge: edge });
        }
    }
    Ok(())
}

/// Pull the first end waiting at `vertex` that belongs to `mate` and
/// expects to be finished as `kind`.
fn take_pending(session: &mut BlendSession, vertex: VertexId, mate: Option<AttribId>, kind: PendingKind) -> Option<PendingEnd> {
    let list = session.pending.get_mut(&vertex)?;
    let at = list.iter().position(|p| p.kind == kind && mate.is_none_or(|m| p.attrib == m))?;
    let end = list.remove(at);
    if list.is_empty() {
        session.pending.remove(&vertex);
    }
    Some(end)
}

/// Hand a neighbour's end back to the session and fail with `err`.
fn refuse(attempt: &mut Attempt, vertex: VertexId, theirs: PendingEnd, err: BlendError) -> BlendResult<()> {
    attempt.consumed.push((vertex, theirs));
    Err(err)
}

/// Finish one end of a built blend according to its plan: check it against
/// a neighbour already waiting there, or leave it waiting. Joins that pass
/// are made once the whole blend is built.
#[allow(clippy::too_many_arguments)]
fn finish_end(
    store: &EntityStore,
    session: &mut BlendSession,
    id: AttribId,
    frame: &EdgeFrame,
    plan: EndPlan,
    segend: Segend,
    sheet: SheetFace,
    at_start: bool,
    attempt: &mut Attempt,
) -> BlendResult<()> {
    let tol = session.config().tolerance;
    let vertex = frame.vertex(at_start);
    let cross_edge = sheet.cross(at_start);
    if let Some(cap) = plan.cap {
        attempt.note(EntityRef::Face(sheet.face), BlendInfo::CapFace { cap });
    }
    if let Some(cross) = cross_edge {
        attempt.note(EntityRef::Edge(cross), BlendInfo::CrossEdge { vertex: Some(vertex) });
    }
    attempt.plans.push(EndPlanRecord {
        attrib: id,
        at_start,
        kind: plan.kind,
        condition: plan.kind.condition(),
        mate: plan.mate,
        pointy: segend.pointy_end(tol.resabs),
    });
    attempt.conditions.push((at_start, plan.kind.condition()));

    let pending = |kind: PendingKind, segend: Segend| PendingEnd {
        attrib: id,
        kind,
        segend,
        cross_edge,
        face: sheet.face,
    };
    match plan.kind {
        EndPlanKind::Ring | EndPlanKind::Open | EndPlanKind::Capped => {}
        EndPlanKind::Reordered => {
            if let Some(mate) = plan.mate {
                for &face in session.graph.get(mate)?.sheet_faces() {
                    attempt.note(EntityRef::Face(sheet.face), BlendInfo::AdjFace { face });
                }
            }
        }
        EndPlanKind::Cuspate => {
            // The corner is left to a vertex blend; its ends wait only until
            // every live blend there has been built.
            let members = 1 + neighbours(store, &session.graph, vertex, frame.edge)?
                .iter()
                .filter(|n| !n.failed)
                .count();
            let waiting = session
                .pending_at(vertex)
                .iter()
                .filter(|p| p.kind == PendingKind::Cuspate)
                .count();
            if waiting + 1 < members {
                attempt.pending.push((vertex, pending(PendingKind::Cuspate, segend)));
            } else {
                while let Some(theirs) = take_pending(session, vertex, None, PendingKind::Cuspate) {
                    attempt.consumed.push((vertex, theirs));
                }
                debug!(?vertex, members, "cuspate vertex complete");
            }
        }
        EndPlanKind::Smooth => {
            let ours = pending(PendingKind::Smooth, segend);
            match take_pending(session, vertex, plan.mate, PendingKind::Smooth) {
                Some(theirs) => match join_sheet_faces(store, &ours, &theirs, &tol) {
                    Ok(crossed) => attempt.joins.push(Join::Ends(EndJoin {
                        vertex,
                        ours,
                        theirs,
                        crossed,
                        smooth: true,
                    })),
                    Err(err) => return refuse(attempt, vertex, theirs, err),
                },
                None => attempt.pending.push((vertex, ours)),
            }
        }
        EndPlanKind::Mitred => {
            let ours = pending(PendingKind::Mitre, segend);
            match take_pending(session, vertex, plan.mate, PendingKind::Mitre) {
                Some(theirs) => {
                    let join = match mitre_sheet_end(store, &ours, &theirs, vertex, &tol) {
                        Ok(join) => join,
                        Err(err) => return refuse(attempt, vertex, theirs, err),
                    };
                    if !join.processed {
                        return refuse(attempt, vertex, theirs, BlendError::MitreFailed);
                    }
                    if !join.both_processed {
                        return refuse(attempt, vertex, theirs, BlendError::MateMismatch);
                    }
                    if join.pointy {
                        attempt.consumed.push((vertex, theirs));
                    } else {
                        attempt.joins.push(Join::Ends(EndJoin {
                            vertex,
                            ours,
                            theirs,
                            crossed: join.crossed,
                            smooth: false,
                        }));
                    }
                }
                None => attempt.pending.push((vertex, ours)),
            }
        }
        EndPlanKind::VertexBlend => {
            let ours = pending(PendingKind::Sphere, segend);
            let sphere = match (session.spheres.get(&vertex), plan.sphere) {
                (Some(known), _) => known.clone(),
                (None, Some(planned)) => planned,
                (None, None) => return Err(BlendError::ImpossibleGeometry),
            };
            let waiting = session
                .pending_at(vertex)
                .iter()
                .filter(|p| p.kind == PendingKind::Sphere && sphere.members.contains(&p.attrib))
                .count();
            if waiting + 1 < sphere.members.len() {
                attempt.pending.push((vertex, ours));
                attempt.spheres.push((vertex, sphere));
                return Ok(());
            }
            let mut theirs = Vec::with_capacity(sphere.members.len());
            while let Some(end) = take_pending(session, vertex, None, PendingKind::Sphere) {
                theirs.push(end);
            }
            match join_sheet_faces_on_sphere(store, &sphere, theirs.iter().chain(std::iter::once(&ours)), &tol) {
                Ok(run) => attempt.joins.push(Join::Sphere(SphereJoin {
                    vertex,
                    sphere,
                    ours,
                    theirs,
                    run,
                })),
                Err(err) => {
                    attempt.consumed.extend(theirs.into_iter().map(|end| (vertex, end)));
                    return Err(err);
                }
            }
        }
    }
    Ok(())
}

/// A blend right round a closed edge: one ring face, no ends to finish.
fn build_ring(
    store: &mut EntityStore,
    session: &mut BlendSession,
    id: AttribId,
    frame: &EdgeFrame,
    curves: &BlendCurves,
    shell: ShellId,
    attempt: &mut Attempt,
) -> BlendResult<()> {
    let tol = session.config().tolerance;
    for side in [Side::Left, Side::Right] {
        let crossings = process_ffints(store, frame.face(side), Some(frame.edge), curves.spring(side), &tol)?;
        if !crossings.fully_inside() {
            return Err(BlendError::SpringOffFace { side });
        }
    }
    let sheet = build_ring_face(store, shell, &curves.surface, &curves.left, &curves.right)?;
    attempt.built.push(sheet.face);
    attempt.note_sheet(
        id,
        &sheet,
        SupportEntity {
            left: frame.left,
            right: frame.right,
        },
    );
    for at_start in [true, false] {
        attempt.plans.push(EndPlanRecord {
            attrib: id,
            at_start,
            kind: EndPlanKind::Ring,
            condition: EndPlanKind::Ring.condition(),
            mate: None,
            pointy: false,
        });
        attempt.conditions.push((at_start, EndPlanKind::Ring.condition()));
    }
    Ok(())
}

fn build_face_only(store: &mut EntityStore, session: &mut BlendSession, id: AttribId, attempt: &mut Attempt) -> BlendResult<()> {
    let tol = session.config().tolerance;
    let attrib = session.graph.get(id)?;
    let supports = attrib.supports();
    let (curves, reference) = face_blend_curves(store, attrib, &tol)?;
    let shell = session.sheet_shell(store);
    let sheet = build_face_blend_sheet(store, shell, &curves, &reference, &tol)?;
    attempt.built.push(sheet.face);
    attempt.note_sheet(id, &sheet, supports);
    for cross in [sheet.start_cross, sheet.end_cross].into_iter().flatten() {
        attempt.note(EntityRef::Edge(cross), BlendInfo::CrossEdge { vertex: None });
    }
    attempt.conditions.push((true, EndCondition::Unknown));
    attempt.conditions.push((false, EndCondition::Unknown));
    Ok(())
}

/// One attribute's line in a [`Stage1Report`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttribReport {
    pub attrib: AttribId,
    pub owner: Option<EntityRef>,
    pub outcome: Option<BlendOutcome>,
    /// The first error recorded, even if later attempts failed differently.
    pub error: Option<BlendError>,
    pub attempts: i32,
    pub sheet_faces: usize,
    pub ends: [EndCondition; 2],
}

/// What a stage-1 run did, in a form that serializes deterministically.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stage1Report {
    /// Attributes in the order they were attempted, repeats included.
    pub order: Vec<AttribId>,
    pub attribs: Vec<AttribReport>,
    pub end_plans: Vec<EndPlanRecord>,
}

impl Stage1Report {
    pub fn to_json(&self) -> BlendResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BlendError::Kernel(e.to_string()))
    }

    /// Where `id` was first attempted.
    pub fn position_of(&self, id: AttribId) -> Option<usize> {
        self.order.iter().position(|a| *a == id)
    }

    pub fn attrib(&self, id: AttribId) -> Option<&AttribReport> {
        self.attribs.iter().find(|a| a.attrib == id)
    }

    pub fn all_succeeded(&self) -> bool {
        self.attribs.iter().all(|a| a.outcome == Some(BlendOutcome::Success))
    }

    pub fn end_plan(&self, id: AttribId, at_start: bool) -> Option<&EndPlanRecord> {
        self.end_plans.iter().find(|p| p.attrib == id && p.at_start == at_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlendConfig;
    use cad_kernel::topology::primitives::{make_block, make_prism};
    use cad_kernel::Point3;

    fn edge_between(store: &EntityStore, a: Point3, b: Point3) -> EdgeId {
        store
            .edges
            .iter()
            .find(|(_, e)| {
                let (s, t) = (store.vertex_point(e.start).unwrap(), store.vertex_point(e.end).unwrap());
                (nalgebra::distance(&s, &a) < 1e-9 && nalgebra::distance(&t, &b) < 1e-9)
                    || (nalgebra::distance(&s, &b) < 1e-9 && nalgebra::distance(&t, &a) < 1e-9)
            })
            .map(|(id, _)| id)
            .unwrap()
    }

    fn vertex_at(store: &EntityStore, p: Point3) -> VertexId {
        store
            .vertices
            .iter()
            .find(|(_, v)| nalgebra::distance(&v.point, &p) < 1e-9)
            .map(|(id, _)| id)
            .unwrap()
    }

    #[test]
    fn test_single_round_builds_one_capped_face() {
        let mut store = EntityStore::new();
        make_block(&mut store, Point3::origin(), Point3::new(4.0, 4.0, 4.0)).unwrap();
        let edge = edge_between(&store, Point3::new(0.0, 0.0, 4.0), Point3::new(4.0, 0.0, 4.0));
        let mut session = BlendSession::new(BlendConfig::default());
        let id = session.request_round(&store, edge, 1.0).unwrap();

        assert_eq!(make_sheet_faces(&mut store, &mut session, id), Ok(BlendOutcome::Success));
        let attrib = session.graph.get(id).unwrap();
        assert_eq!(attrib.sheet_faces().len(), 1);
        assert_eq!(attrib.status(), BlendStatus::Agree);
        assert_eq!(attrib.end_condition(true), EndCondition::Closed);
        assert_eq!(attrib.end_condition(false), EndCondition::Closed);
        let face = attrib.sheet_faces()[0];
        assert!(session.infos.infos_of(EntityRef::Face(face)).contains(&BlendInfo::ExplicitBlend { attrib: id }));
        assert_eq!(store.face(face).unwrap().loops.len(), 1);
        assert_eq!(session.end_plans().len(), 2);
    }

    #[test]
    fn test_failed_attempt_leaves_no_sheet() {
        let mut store = EntityStore::new();
        make_block(&mut store, Point3::origin(), Point3::new(4.0, 4.0, 1.0)).unwrap();
        let edge = edge_between(&store, Point3::new(0.0, 0.0, 1.0), Point3::new(4.0, 0.0, 1.0));
        let mut session = BlendSession::new(BlendConfig::default());
        let id = session.request_round(&store, edge, 2.0).unwrap();
        let faces_before = store.faces.len();

        assert_eq!(make_sheet_faces(&mut store, &mut session, id), Ok(BlendOutcome::Impossible));
        let attrib = session.graph.get(id).unwrap();
        assert!(matches!(attrib.error(), Some(BlendError::SpringOffFace { .. })));
        assert!(attrib.sheet_faces().is_empty());
        assert_eq!(attrib.end_condition(true), EndCondition::Unset);
        assert!(attrib.geom().is_some());
        assert_eq!(store.faces.len(), faces_before);
        assert!(session.end_plans().is_empty());
    }

    #[test]
    fn test_failed_end_leaves_checked_joins_unmade() {
        let mut store = EntityStore::new();
        let profile = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(4.0, 4.0, 0.0),
            Point3::new(0.0, 4.0, 0.0),
        ];
        make_prism(&mut store, &profile, 3.0).unwrap();
        let split = Point3::new(2.0, 0.0, 3.0);
        let corner = Point3::new(4.0, 0.0, 3.0);
        let first = edge_between(&store, Point3::new(0.0, 0.0, 3.0), split);
        let side = edge_between(&store, corner, Point3::new(4.0, 4.0, 3.0));
        let middle = edge_between(&store, split, corner);
        let (split, corner) = (vertex_at(&store, split), vertex_at(&store, corner));
        let mut session = BlendSession::new(BlendConfig::default());
        let a = session.request_round(&store, first, 0.5).unwrap();
        let b = session.request_round(&store, side, 0.5).unwrap();
        let c = session.request_round(&store, middle, 0.5).unwrap();
        assert_eq!(make_sheet_faces(&mut store, &mut session, a), Ok(BlendOutcome::Success));
        assert_eq!(make_sheet_faces(&mut store, &mut session, b), Ok(BlendOutcome::Success));

        // Move b's waiting end out of reach so c cannot mitre with it.
        let waiting = session.pending.get_mut(&corner).unwrap();
        let far = waiting.iter_mut().find(|p| p.attrib == b && p.kind == PendingKind::Mitre).unwrap();
        far.segend = Segend::new(
            Intercept::from_position(Point3::new(9.0, 9.0, 9.0), None, None, None),
            Intercept::from_position(Point3::new(9.0, 9.0, 8.0), None, None, None),
        );
        let ours = session.pending_at(split).iter().find(|p| p.attrib == a).unwrap();
        assert_eq!(ours.kind, PendingKind::Smooth);
        let cross = ours.cross_edge.unwrap();
        let shell = session.sheet_shell(&mut store);
        let euler = store.euler_characteristic(shell).unwrap();
        let faces = store.faces.len();

        let outcome = make_sheet_faces(&mut store, &mut session, c).unwrap();
        assert_ne!(outcome, BlendOutcome::Success);
        assert!(session.graph.get(c).unwrap().sheet_faces().is_empty());
        assert_eq!(store.faces.len(), faces);
        assert_eq!(store.euler_characteristic(shell).unwrap(), euler);
        // Both neighbours are waiting again, a's cross edge as it was.
        assert!(session.pending_at(split).iter().any(|p| p.attrib == a && p.kind == PendingKind::Smooth));
        assert!(session.pending_at(corner).iter().any(|p| p.attrib == b && p.kind == PendingKind::Mitre));
        assert!(store.contains(EntityRef::Edge(cross)));
        assert_eq!(store.edge(cross).unwrap().coedges.len(), 1);
        assert!(!session
            .infos
            .infos_of(EntityRef::Edge(cross))
            .iter()
            .any(|info| matches!(info, BlendInfo::TanCrossEdge { .. })));
    }

    #[test]
    fn test_report_lookup() {
        let mut ids: slotmap::SlotMap<AttribId, ()> = slotmap::SlotMap::with_key();
        let (a, b) = (ids.insert(()), ids.insert(()));
        let report = Stage1Report {
            order: vec![b, a, b],
            ..Stage1Report::default()
        };
        assert_eq!(report.position_of(b), Some(0));
        assert_eq!(report.position_of(a), Some(1));
        assert!(report.all_succeeded());
        assert!(report.to_json().unwrap().contains("order"));
    }
}
