//! Serializable dump of a pipeline topology.

use super::builder::Graph;
use crate::error::{PipelineError, Result};
use crate::pipeline::id::{LinkId, PipelineId, StageId};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Stages of a pipeline with their links and fan-out targets.
#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    pub pipeline: PipelineId,
    pub name: Option<String>,
    pub stages: Vec<StageSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    pub id: StageId,
    pub name: String,
    /// Downstream stages
    pub feeds: Vec<StageId>,
    pub inputs: Vec<LinkSnapshot>,
    pub outputs: Vec<LinkSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkSnapshot {
    pub id: LinkId,
    /// Payload type name
    pub payload: String,
    /// Receive links an output was linked to; producers for an input
    pub peers: Vec<LinkId>,
    /// Values sitting in the buffer when the snapshot was taken
    pub queued: usize,
}

impl TopologySnapshot {
    /// Capture the stages listed in `order`.
    pub(crate) fn capture(
        pipeline: PipelineId,
        name: Option<String>,
        graph: &Graph,
        order: &[StageId],
    ) -> Self {
        let link_snapshots = |ids: &BTreeSet<LinkId>, outgoing: bool| -> Vec<LinkSnapshot> {
            ids.iter()
                .filter_map(|id| graph.links.get(id))
                .map(|node| LinkSnapshot {
                    id: node.link.id(),
                    payload: node.link.payload_type().to_string(),
                    peers: if outgoing {
                        node.feeds.iter().copied().collect()
                    } else {
                        node.fed_by.iter().copied().collect()
                    },
                    queued: node.link.len(),
                })
                .collect()
        };

        let stages = order
            .iter()
            .filter_map(|id| graph.stages.get(id).map(|node| (id, node)))
            .map(|(&id, node)| StageSnapshot {
                id,
                name: node.stage.name().to_string(),
                feeds: node.feeds.iter().copied().collect(),
                inputs: link_snapshots(&node.inputs, false),
                outputs: link_snapshots(&node.outputs, true),
            })
            .collect();

        Self {
            pipeline,
            name,
            stages,
        }
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Serialization(format!("Failed to serialize topology: {}", e)))
    }
}

fn join_ids<I: fmt::Display>(ids: &[I]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for StageSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.name)?;
        if !self.feeds.is_empty() {
            write!(f, " -> [{}]", join_ids(&self.feeds))?;
        }
        for input in &self.inputs {
            write!(f, "\n  in  {} <{}>", input.id, input.payload)?;
            if !input.peers.is_empty() {
                write!(f, " <- [{}]", join_ids(&input.peers))?;
            }
        }
        for output in &self.outputs {
            write!(
                f,
                "\n  out {} <{}> -> [{}]",
                output.id,
                output.payload,
                join_ids(&output.peers)
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for TopologySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", self.pipeline, name)?,
            None => write!(f, "{}", self.pipeline)?,
        }
        for stage in &self.stages {
            write!(f, "\n{}", stage)?;
        }
        Ok(())
    }
}
