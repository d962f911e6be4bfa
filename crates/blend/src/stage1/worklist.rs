//! The stage-1 work list: attempt every blend, deferring the ones that must
//! wait for a neighbour, until each has succeeded or given up.

use cad_kernel::EntityStore;
use tracing::{debug, info, instrument, warn};

use super::{make_sheet_faces, AttribReport, Stage1Report};
use crate::attrib::reorder::reorder;
use crate::attrib::AttribId;
use crate::error::{BlendError, BlendOutcome, BlendResult};
use crate::session::{BlendSession, PendingKind};

/// Move `id` to the end of `list`, returning its new index, or `None` if it
/// is not in the list.
pub fn move_bl_attrib_to_list_end(list: &mut Vec<AttribId>, id: AttribId) -> Option<usize> {
    let at = list.iter().position(|a| *a == id)?;
    let id = list.remove(at);
    list.push(id);
    Some(list.len() - 1)
}

fn lift_all(session: &mut BlendSession, list: &[AttribId]) -> BlendResult<()> {
    for &id in list {
        if session.graph.get(id)?.suspended() {
            session.edit(id)?.lift_suspension();
        }
    }
    Ok(())
}

fn give_up(session: &mut BlendSession, id: AttribId) -> BlendResult<()> {
    let attempts = session.graph.get(id)?.times_attempted();
    warn!(?id, attempts, "blend gave up after repeated attempts");
    let mut attrib = session.edit(id)?;
    attrib.record_error(BlendError::AttemptsExhausted { attempts });
    attrib.set_outcome(BlendOutcome::Impossible);
    Ok(())
}

/// Ends cut at a mixed-convexity corner only wait for the rest of the
/// corner. Whatever is still waiting once the run is over never will be.
fn drop_cuspate_ends(session: &mut BlendSession) {
    let mut dropped = 0;
    session.pending.retain(|_, ends| {
        let before = ends.len();
        ends.retain(|end| end.kind != PendingKind::Cuspate);
        dropped += before - ends.len();
        !ends.is_empty()
    });
    if dropped > 0 {
        debug!(dropped, "cuspate ends left without a corner");
    }
}

/// Build the sheet faces of every blend in the session that has not yet
/// been built.
///
/// Blends are taken in creation order. A blend with a smaller unbuilt
/// neighbour of the same convexity is deferred behind it; a blend that
/// fails for want of a neighbour is suspended and moved to the end of the
/// list. Suspensions are lifted whenever some blend is built, or when a
/// whole pass gets nowhere, in which case deferral is also skipped for the
/// next pass. A blend that keeps failing becomes permanently failed after
/// `max_attempts` tries, keeping its first error.
#[instrument(skip(store, session))]
pub fn run_stage1(store: &mut EntityStore, session: &mut BlendSession) -> BlendResult<Stage1Report> {
    let config = *session.config();
    let mut list: Vec<AttribId> = Vec::new();
    for id in session.graph.ids() {
        let attrib = session.graph.get(id)?;
        if !attrib.done() && !attrib.failed() {
            list.push(id);
        }
    }
    lift_all(session, &list)?;

    let mut report = Stage1Report::default();
    let max_passes = (list.len() + 1) * (config.max_attempts.max(1) as usize + 2);
    let mut stalled = false;
    let mut passes = 0;
    while !list.is_empty() && passes < max_passes {
        passes += 1;
        let mut progress = false;
        let snapshot = list.clone();
        for id in snapshot {
            if session.graph.get(id)?.suspended() {
                continue;
            }
            let order = reorder(&session.graph, store, id, config.tolerance.resabs)?;
            session.edit(id)?.set_reorder(Some(order));
            if order.needs_reorder() && !stalled {
                session.edit(id)?.note_seen();
                let at = move_bl_attrib_to_list_end(&mut list, id);
                debug!(?id, ?at, "waiting for a smaller neighbour");
                continue;
            }

            session.edit(id)?.note_attempt();
            report.order.push(id);
            let outcome = make_sheet_faces(store, session, id)?;
            info!(?id, ?outcome, "stage 1 attempt");
            match outcome {
                BlendOutcome::Success => {
                    list.retain(|a| *a != id);
                    lift_all(session, &list)?;
                    progress = true;
                }
                BlendOutcome::Impossible => {
                    list.retain(|a| *a != id);
                    progress = true;
                }
                BlendOutcome::RetryLater => {
                    if session.graph.get(id)?.times_attempted() >= config.max_attempts {
                        give_up(session, id)?;
                        list.retain(|a| *a != id);
                        progress = true;
                    } else {
                        session.edit(id)?.suspend();
                        let at = move_bl_attrib_to_list_end(&mut list, id);
                        debug!(?id, ?at, "retry later");
                    }
                }
            }
        }
        stalled = !progress;
        if stalled {
            debug!(remaining = list.len(), "pass made no progress");
            lift_all(session, &list)?;
        }
    }
    for &id in &list {
        give_up(session, id)?;
    }
    drop_cuspate_ends(session);

    for id in session.graph.ids() {
        let attrib = session.graph.get(id)?;
        if attrib.outcome().is_none() {
            continue;
        }
        report.attribs.push(AttribReport {
            attrib: id,
            owner: attrib.owner(),
            outcome: attrib.outcome(),
            error: attrib.error().cloned(),
            attempts: attrib.times_attempted(),
            sheet_faces: attrib.sheet_faces().len(),
            ends: [attrib.end_condition(true), attrib.end_condition(false)],
        });
    }
    report.end_plans = session.end_plans().to_vec();
    Ok(report)
}
