use std::collections::HashMap;

use cad_kernel::topology::brep::EdgeId;
use cad_kernel::EntityStore;
use tracing::{debug, instrument};

use super::calculator::{CvtyCalculator, EvalSide};
use super::cvty::Cvty;
use super::info::{EdCvtyInfo, PtCvtyInfo};
use crate::config::BlendConfig;
use crate::error::BlendResult;

/// Where along an edge a cached point judgement was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgePoint {
    Start,
    Mid,
    End,
}

/// Per-session convexity cache keyed by edge.
///
/// Entries survive until the edge is invalidated or the session is cleared;
/// a model change that moves an edge's supports must invalidate it.
#[derive(Debug, Default)]
pub struct ConvexityCache {
    points: HashMap<(EdgeId, EdgePoint), PtCvtyInfo>,
    edges: HashMap<EdgeId, EdCvtyInfo>,
}

impl ConvexityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached judgements, point and edge together.
    pub fn len(&self) -> usize {
        self.points.len() + self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidate(&mut self, edge: EdgeId) {
        self.points.retain(|(e, _), _| *e != edge);
        self.edges.remove(&edge);
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.edges.clear();
    }

    fn calculator(store: &EntityStore, edge: EdgeId, config: &BlendConfig) -> BlendResult<CvtyCalculator> {
        Ok(CvtyCalculator::from_edge(store, edge)?.with_settings(
            config.adaptive_samples,
            config.precise_iterations,
            config.angle_tol,
        ))
    }

    fn point_info(
        &mut self,
        store: &EntityStore,
        edge: EdgeId,
        at: EdgePoint,
        config: &BlendConfig,
    ) -> BlendResult<PtCvtyInfo> {
        if let Some(info) = self.points.get(&(edge, at)) {
            return Ok(*info);
        }
        let calc = Self::calculator(store, edge, config)?;
        let range = calc.common_range();
        let param = match at {
            EdgePoint::Start => range.low(),
            EdgePoint::Mid => range.mid(),
            EdgePoint::End => range.high(),
        };
        let info = calc.eval(param, true, EvalSide::Nominal);
        debug!(?edge, ?at, angle = info.angle(), "cached point convexity");
        self.points.insert((edge, at), info);
        Ok(info)
    }

    /// Convexity at the middle of `edge`, computed once per edge.
    pub fn compute_cache_mid_pt_cvty_info(
        &mut self,
        store: &EntityStore,
        edge: EdgeId,
        config: &BlendConfig,
    ) -> BlendResult<PtCvtyInfo> {
        self.point_info(store, edge, EdgePoint::Mid, config)
    }

    pub fn bl_edge_mid_smooth(&mut self, store: &EntityStore, edge: EdgeId, config: &BlendConfig) -> BlendResult<bool> {
        let info = self.point_info(store, edge, EdgePoint::Mid, config)?;
        Ok(info.instantiate(config.angle_tol).tangent())
    }

    pub fn bl_edge_start_smooth(&mut self, store: &EntityStore, edge: EdgeId, config: &BlendConfig) -> BlendResult<bool> {
        let info = self.point_info(store, edge, EdgePoint::Start, config)?;
        Ok(info.instantiate(config.angle_tol).tangent())
    }

    pub fn bl_edge_end_smooth(&mut self, store: &EntityStore, edge: EdgeId, config: &BlendConfig) -> BlendResult<bool> {
        let info = self.point_info(store, edge, EdgePoint::End, config)?;
        Ok(info.instantiate(config.angle_tol).tangent())
    }

    /// Smoothness at an interior parameter. Not cached; prefer the start,
    /// mid and end queries wherever they answer the question.
    pub fn bl_edge_param_smooth(store: &EntityStore, edge: EdgeId, param: f64, config: &BlendConfig) -> BlendResult<bool> {
        let calc = Self::calculator(store, edge, config)?;
        Ok(calc
            .eval(param, true, EvalSide::Nominal)
            .instantiate(config.angle_tol)
            .tangent())
    }

    /// Convexity of the whole edge at the configured angular tolerance.
    /// Adaptive bounds are refined precisely when they leave the verdict open.
    #[instrument(skip(self, store, config))]
    pub fn edge_convexity(&mut self, store: &EntityStore, edge: EdgeId, config: &BlendConfig) -> BlendResult<Cvty> {
        if let Some(info) = self.edges.get(&edge) {
            return Ok(info.instantiate(config.angle_tol));
        }
        let calc = Self::calculator(store, edge, config)?;
        let range = calc.common_range();
        let mut info = calc.eval_adaptive(range, true);
        if info.ambiguous(config.angle_tol) {
            info = calc.eval_precise(range, true);
        }
        let cvty = info.instantiate(config.angle_tol);
        debug!(?edge, ?cvty, "edge convexity");
        self.edges.insert(edge, info);
        Ok(cvty)
    }
}
