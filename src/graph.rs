//! Stage graph builder and edge table.
//!
//! The workflow topology — which stage follows which, and which route label
//! leads where — lives here, separate from stage logic, so the graph can be
//! inspected and validated independently of what the stages do.
//!
//! A stage has either exactly one direct successor or a set of labelled
//! conditional edges; the label a stage returns at run time selects among
//! them. The [`END`] sentinel marks the successful terminal transition.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

/// Sentinel target for terminal edges.
pub const END: &str = "END";

/// Errors detected while validating a graph definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphBuildError {
    #[error("graph entry point not set")]
    NoEntryPoint,

    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("stage `{0}` has more than one direct successor")]
    DuplicateEdge(String),

    #[error("stage `{0}` has both a direct edge and conditional edges")]
    ConflictingEdges(String),

    #[error("stage `{stage}` declares route `{label}` twice")]
    DuplicateRoute { stage: String, label: String },
}

/// Builder for a workflow graph with a fluent API.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    name: String,
    stages: Vec<String>,
    direct: Vec<(String, String)>,
    conditional: Vec<(String, String, String)>,
    entry: Option<String>,
}

impl WorkflowGraph {
    /// Create an empty graph builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the graph name, used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Declare a stage by name.
    pub fn stage(mut self, id: impl Into<String>) -> Self {
        self.stages.push(id.into());
        self
    }

    /// Set the entry stage.
    pub fn entry(mut self, id: impl Into<String>) -> Self {
        self.entry = Some(id.into());
        self
    }

    /// Add the single unconditional successor of a stage.
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.direct.push((from.into(), to.into()));
        self
    }

    /// Add labelled conditional edges from a stage. The label the stage
    /// returns at run time selects the target.
    pub fn conditional_edges(
        mut self,
        from: impl Into<String>,
        edges: Vec<(&str, &str)>,
    ) -> Self {
        let from = from.into();
        for (label, target) in edges {
            self.conditional
                .push((from.clone(), label.to_string(), target.to_string()));
        }
        self
    }

    /// Validate the definition and freeze it into an edge table.
    pub fn build(self) -> Result<BuiltGraph, GraphBuildError> {
        let entry = self.entry.ok_or(GraphBuildError::NoEntryPoint)?;
        let known: HashSet<&str> = self.stages.iter().map(String::as_str).collect();

        if !known.contains(entry.as_str()) {
            return Err(GraphBuildError::UnknownStage(entry));
        }

        let mut direct: HashMap<String, String> = HashMap::new();
        for (from, to) in self.direct {
            if !known.contains(from.as_str()) {
                return Err(GraphBuildError::UnknownStage(from));
            }
            if to != END && !known.contains(to.as_str()) {
                return Err(GraphBuildError::UnknownStage(to));
            }
            if direct.insert(from.clone(), to).is_some() {
                return Err(GraphBuildError::DuplicateEdge(from));
            }
        }

        let mut conditional: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (from, label, to) in self.conditional {
            if !known.contains(from.as_str()) {
                return Err(GraphBuildError::UnknownStage(from));
            }
            if to != END && !known.contains(to.as_str()) {
                return Err(GraphBuildError::UnknownStage(to));
            }
            if direct.contains_key(&from) {
                return Err(GraphBuildError::ConflictingEdges(from));
            }
            let routes = conditional.entry(from.clone()).or_default();
            if routes.insert(label.clone(), to).is_some() {
                return Err(GraphBuildError::DuplicateRoute { stage: from, label });
            }
        }

        // A direct edge added after conditional ones is the same conflict.
        for from in direct.keys() {
            if conditional.contains_key(from) {
                return Err(GraphBuildError::ConflictingEdges(from.clone()));
            }
        }

        Ok(BuiltGraph {
            name: self.name,
            stages: self.stages,
            direct,
            conditional,
            entry,
        })
    }
}

/// Validated, frozen graph topology.
#[derive(Debug, Clone)]
pub struct BuiltGraph {
    name: String,
    stages: Vec<String>,
    direct: HashMap<String, String>,
    conditional: HashMap<String, HashMap<String, String>>,
    entry: String,
}

impl BuiltGraph {
    /// Graph name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entry stage.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// All declared stage names, in declaration order.
    pub fn stage_names(&self) -> &[String] {
        &self.stages
    }

    /// The unconditional successor of a stage, if it has one.
    pub fn successor(&self, stage: &str) -> Option<&str> {
        self.direct.get(stage).map(String::as_str)
    }

    /// The target of a labelled route out of a stage.
    pub fn route(&self, stage: &str, label: &str) -> Option<&str> {
        self.conditional
            .get(stage)
            .and_then(|routes| routes.get(label))
            .map(String::as_str)
    }

    /// Whether the stage routes via labels rather than a direct edge.
    pub fn is_conditional(&self, stage: &str) -> bool {
        self.conditional.contains_key(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_basic_graph() {
        let graph = WorkflowGraph::new()
            .name("basic")
            .stage("first")
            .stage("second")
            .entry("first")
            .edge("first", "second")
            .edge("second", END)
            .build()
            .unwrap();

        assert_eq!(graph.name(), "basic");
        assert_eq!(graph.entry(), "first");
        assert_eq!(graph.successor("first"), Some("second"));
        assert_eq!(graph.successor("second"), Some(END));
        assert!(!graph.is_conditional("first"));
    }

    #[test]
    fn test_conditional_edges() {
        let graph = WorkflowGraph::new()
            .stage("router")
            .stage("a")
            .stage("b")
            .entry("router")
            .conditional_edges("router", vec![("left", "a"), ("right", "b"), ("done", END)])
            .edge("a", END)
            .edge("b", END)
            .build()
            .unwrap();

        assert!(graph.is_conditional("router"));
        assert_eq!(graph.route("router", "left"), Some("a"));
        assert_eq!(graph.route("router", "right"), Some("b"));
        assert_eq!(graph.route("router", "done"), Some(END));
        assert_eq!(graph.route("router", "missing"), None);
        assert_eq!(graph.successor("router"), None);
    }

    #[test]
    fn test_missing_entry() {
        let result = WorkflowGraph::new().stage("only").build();
        assert_eq!(result.unwrap_err(), GraphBuildError::NoEntryPoint);
    }

    #[test]
    fn test_unknown_edge_target() {
        let result = WorkflowGraph::new()
            .stage("only")
            .entry("only")
            .edge("only", "ghost")
            .build();

        assert_eq!(
            result.unwrap_err(),
            GraphBuildError::UnknownStage("ghost".to_string())
        );
    }

    #[test]
    fn test_unknown_entry() {
        let result = WorkflowGraph::new().stage("only").entry("ghost").build();
        assert_eq!(
            result.unwrap_err(),
            GraphBuildError::UnknownStage("ghost".to_string())
        );
    }

    #[test]
    fn test_conflicting_edges_rejected() {
        let result = WorkflowGraph::new()
            .stage("s")
            .stage("t")
            .entry("s")
            .edge("s", "t")
            .conditional_edges("s", vec![("x", "t")])
            .edge("t", END)
            .build();

        assert_eq!(
            result.unwrap_err(),
            GraphBuildError::ConflictingEdges("s".to_string())
        );
    }

    #[test]
    fn test_duplicate_direct_edge_rejected() {
        let result = WorkflowGraph::new()
            .stage("s")
            .stage("t")
            .entry("s")
            .edge("s", "t")
            .edge("s", END)
            .build();

        assert_eq!(
            result.unwrap_err(),
            GraphBuildError::DuplicateEdge("s".to_string())
        );
    }

    #[test]
    fn test_duplicate_route_label_rejected() {
        let result = WorkflowGraph::new()
            .stage("s")
            .stage("t")
            .entry("s")
            .conditional_edges("s", vec![("x", "t"), ("x", END)])
            .edge("t", END)
            .build();

        assert_eq!(
            result.unwrap_err(),
            GraphBuildError::DuplicateRoute {
                stage: "s".to_string(),
                label: "x".to_string()
            }
        );
    }

    #[test]
    fn test_cycles_are_allowed() {
        // Regeneration and re-search loops are part of the design; the
        // builder must not reject cycles.
        let graph = WorkflowGraph::new()
            .stage("generate")
            .stage("check")
            .entry("generate")
            .edge("generate", "check")
            .conditional_edges("check", vec![("retry", "generate"), ("ok", END)])
            .build()
            .unwrap();

        assert_eq!(graph.route("check", "retry"), Some("generate"));
    }
}
