//! Stitching the sheet ends of neighbouring blends together at a vertex.
//!
//! Joins come in two steps. While an attribute is being built its ends are
//! only checked against the neighbours waiting for them, and the joins that
//! pass are held in the attempt. Nothing in the model changes until the
//! whole attribute has been built, when [`make_end_join`] and
//! [`make_sphere_join`] carry them out.

use cad_kernel::geometry::curves::curves_coincident;
use cad_kernel::topology::brep::{EdgeId, FaceId, ShellId, VertexId};
use cad_kernel::{EntityStore, OrientedSurface, Point3, Surface, Tolerance};
use tracing::{debug, instrument};

use crate::error::{BlendError, BlendResult, Side};
use crate::segend::{replace_segend, segends_join_pairing, Segend};
use crate::session::{PendingEnd, VertexSphere};
use crate::stage1::ffints::coedge_in_face;
use crate::stage1::sheet::orient_loop;

/// What [`mitre_sheet_end`] found. `both_processed` is only set when the
/// two sheets can actually be stitched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct MitreJoin {
    pub processed: bool,
    pub both_processed: bool,
    /// Our left contact meets their right.
    pub crossed: bool,
    /// Neither end has a cross edge, so there is nothing to stitch.
    pub pointy: bool,
}

/// Two ends found to meet, to be stitched along their cross edges.
#[derive(Debug)]
pub(crate) struct EndJoin {
    pub vertex: VertexId,
    pub ours: PendingEnd,
    pub theirs: PendingEnd,
    pub crossed: bool,
    /// The blend runs on smoothly across the shared cross edge.
    pub smooth: bool,
}

/// Ends closing on a vertex sphere, with the loop of cross edges bounding
/// the sphere face.
#[derive(Debug)]
pub(crate) struct SphereJoin {
    pub vertex: VertexId,
    pub sphere: VertexSphere,
    pub ours: PendingEnd,
    pub theirs: Vec<PendingEnd>,
    pub run: Vec<(EdgeId, bool)>,
}

/// A checked join waiting for its attribute to succeed.
#[derive(Debug)]
pub(crate) enum Join {
    Ends(EndJoin),
    Sphere(SphereJoin),
}

impl Join {
    /// The neighbours' ends, handed back when the attempt is abandoned.
    pub fn into_theirs(self) -> Vec<(VertexId, PendingEnd)> {
        match self {
            Join::Ends(join) => vec![(join.vertex, join.theirs)],
            Join::Sphere(join) => join.theirs.into_iter().map(|end| (join.vertex, end)).collect(),
        }
    }
}

/// What carrying out an [`EndJoin`] did to the sheet.
#[derive(Debug)]
pub(crate) struct Joined {
    /// Our cross edge, merged away, and the neighbour's edge that replaced it.
    pub merged: Option<(EdgeId, EdgeId)>,
    /// The single end standing for both after the join.
    pub segend: Segend,
}

/// Whether each of our contacts lies on the same boundary as one of theirs,
/// walking round `vertex`.
fn contacts_adjacent(store: &EntityStore, ours: &PendingEnd, theirs: &PendingEnd, vertex: VertexId) -> bool {
    [Side::Left, Side::Right].iter().all(|&side| {
        let ours = ours.segend.incpt(side);
        [Side::Left, Side::Right].iter().any(|&s| {
            let theirs = theirs.segend.incpt(s);
            ours.adjacent(theirs, store, false, Some(vertex)).is_some()
                || ours.adjacent(theirs, store, true, Some(vertex)).is_some()
        })
    })
}

/// Whether the two cross edges trace the same curve.
fn cross_edges_match(store: &EntityStore, ours: &PendingEnd, theirs: &PendingEnd, tol: &Tolerance) -> BlendResult<bool> {
    let (Some(mine), Some(keep)) = (ours.cross_edge, theirs.cross_edge) else {
        return Ok(false);
    };
    if mine == keep {
        return Ok(true);
    }
    let a = store.edge_bounded_curve(mine)?;
    let b = store.edge_bounded_curve(keep)?;
    Ok(curves_coincident(&a, &b, tol.resfit))
}

/// Check a mitre between our sheet end and a neighbour's at `vertex`. The
/// ends are processed when their contacts pair up, by the join test or along
/// a shared boundary, and can be stitched when their cross curves coincide.
#[instrument(skip_all, fields(ours = ?ours.attrib, theirs = ?theirs.attrib))]
pub(crate) fn mitre_sheet_end(
    store: &EntityStore,
    ours: &PendingEnd,
    theirs: &PendingEnd,
    vertex: VertexId,
    tol: &Tolerance,
) -> BlendResult<MitreJoin> {
    let Some(crossed) = segends_join_pairing(&ours.segend, &theirs.segend, tol) else {
        let processed = contacts_adjacent(store, ours, theirs, vertex);
        debug!(processed, "mitre contacts do not meet");
        return Ok(MitreJoin {
            processed,
            ..MitreJoin::default()
        });
    };
    if ours.cross_edge.is_none() && theirs.cross_edge.is_none() {
        return Ok(MitreJoin {
            processed: true,
            both_processed: true,
            crossed,
            pointy: true,
        });
    }
    let stitched = cross_edges_match(store, ours, theirs, tol)?;
    debug!(stitched, "mitre processed");
    Ok(MitreJoin {
        processed: true,
        both_processed: stitched,
        crossed,
        pointy: false,
    })
}

/// Check that two sheet ends continuing smoothly into each other across a
/// vertex can be joined. Returns whether their sides are crossed.
#[instrument(skip_all, fields(ours = ?ours.attrib, theirs = ?theirs.attrib))]
pub(crate) fn join_sheet_faces(store: &EntityStore, ours: &PendingEnd, theirs: &PendingEnd, tol: &Tolerance) -> BlendResult<bool> {
    let crossed = segends_join_pairing(&ours.segend, &theirs.segend, tol).ok_or(BlendError::MateMismatch)?;
    if !cross_edges_match(store, ours, theirs, tol)? {
        debug!("cross curves differ");
        return Err(BlendError::MateMismatch);
    }
    Ok(crossed)
}

/// Stitch a checked pair of ends: our cross edge is merged into theirs and
/// a copy of our end replaces a copy of theirs, made external on their
/// sheet. The join itself is left as it was, so the neighbour's end can be
/// handed back if the attempt is abandoned.
#[instrument(skip_all, fields(vertex = ?join.vertex, smooth = join.smooth))]
pub(crate) fn make_end_join(store: &mut EntityStore, join: &EndJoin, tol: &Tolerance) -> BlendResult<Joined> {
    let EndJoin {
        ours, theirs, crossed, ..
    } = join;
    let mut segend = theirs.segend.clone();
    let mut incoming = Some(ours.segend.clone());
    if *crossed {
        if let Some(end) = incoming.as_mut() {
            end.mirror();
        }
    }
    if !replace_segend(&mut segend, &mut incoming, true, true, tol) {
        return Err(BlendError::MateMismatch);
    }
    let mut merged = None;
    if let (Some(mine), Some(keep)) = (ours.cross_edge, theirs.cross_edge) {
        if mine != keep {
            store.merge_edges(keep, mine)?;
            merged = Some((mine, keep));
        }
        if let Some(c) = coedge_in_face(store, keep, theirs.face)? {
            segend.make_external(c);
        }
    }
    debug!(?merged, "ends stitched");
    Ok(Joined { merged, segend })
}

fn sphere_surface(sphere: &VertexSphere) -> OrientedSurface {
    OrientedSurface::new(Surface::Sphere(sphere.sphere), !sphere.convex)
}

/// Order the cross edges of the ends meeting at a vertex sphere into a
/// closed loop on the sphere, matching their ends by position, and orient
/// it to bound the sphere face. The edges belong to different sheets, so
/// their end vertices are only coincident.
pub(crate) fn join_sheet_faces_on_sphere<'a>(
    store: &EntityStore,
    sphere: &VertexSphere,
    ends: impl IntoIterator<Item = &'a PendingEnd>,
    tol: &Tolerance,
) -> BlendResult<Vec<(EdgeId, bool)>> {
    let mut unused: Vec<(EdgeId, Point3, Point3)> = Vec::new();
    for end in ends {
        let edge = end.cross_edge.ok_or(BlendError::MateMismatch)?;
        let on_sphere = store
            .edge_bounded_curve(edge)?
            .sample(4)
            .iter()
            .all(|p| (nalgebra::distance(p, &sphere.sphere.center) - sphere.sphere.radius).abs() < tol.resfit);
        if !on_sphere {
            debug!(?edge, "cross edge leaves the vertex sphere");
            return Err(BlendError::MateMismatch);
        }
        let data = store.edge(edge)?;
        unused.push((edge, store.vertex_point(data.start)?, store.vertex_point(data.end)?));
    }
    if unused.is_empty() {
        return Err(BlendError::MateMismatch);
    }
    let near = |a: &Point3, b: &Point3| nalgebra::distance(a, b) < tol.resfit;
    let (first, origin, mut at) = unused.remove(0);
    let mut run = vec![(first, true)];
    while !unused.is_empty() {
        let next = unused.iter().position(|(_, s, e)| near(s, &at) || near(e, &at));
        let (edge, s, e) = unused.remove(next.ok_or(BlendError::MateMismatch)?);
        let forward = near(&s, &at);
        run.push((edge, forward));
        at = if forward { e } else { s };
    }
    if !near(&at, &origin) {
        return Err(BlendError::MateMismatch);
    }
    orient_loop(store, &sphere_surface(sphere), run)
}

/// Close a checked vertex sphere with one face bounded by the cross edges,
/// making every end external on it. Returns the new face.
#[instrument(skip_all, fields(vertex = ?join.vertex, ends = join.run.len()))]
pub(crate) fn make_sphere_join(
    store: &mut EntityStore,
    shell: ShellId,
    join: &SphereJoin,
    tol: &Tolerance,
) -> BlendResult<FaceId> {
    let mut ends_of: Vec<VertexId> = Vec::with_capacity(join.run.len() * 2);
    for &(e, _) in &join.run {
        let data = store.edge(e)?;
        ends_of.push(data.start);
        ends_of.push(data.end);
    }
    for i in 0..ends_of.len() {
        for j in i + 1..ends_of.len() {
            let (keep, drop) = (ends_of[i], ends_of[j]);
            if keep == drop {
                continue;
            }
            if nalgebra::distance(&store.vertex_point(keep)?, &store.vertex_point(drop)?) < tol.resfit {
                store.merge_vertices(keep, drop)?;
                for v in ends_of.iter_mut().filter(|v| **v == drop) {
                    *v = keep;
                }
            }
        }
    }

    let surface = sphere_surface(&join.sphere);
    let face = store.add_face(shell, surface.surface.clone(), surface.reversed, &[join.run.clone()])?;
    debug!(?face, ends = join.theirs.len() + 1, "vertex sphere face built");
    Ok(face)
}
