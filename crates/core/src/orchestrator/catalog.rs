//! Tools and pipelines clients can start runs of.

use std::collections::HashMap;

use thiserror::Error;

use crate::config::{PipelineConfig, ToolConfig};
use crate::stage::{StageKind, StageRegistry};

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("tool {0} defined twice")]
    DuplicateTool(String),

    #[error("pipeline {0} defined twice")]
    DuplicatePipeline(String),

    #[error("pipeline {0} has no tools")]
    EmptyPipeline(String),

    #[error("pipeline {pipeline} references unknown tool {tool}")]
    UnknownTool { pipeline: String, tool: String },

    #[error("stage {0} has no registered handler")]
    Unregistered(StageKind),
}

/// Resolves tool and pipeline ids to the stages they run.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, StageKind>,
    pipelines: HashMap<String, Vec<StageKind>>,
}

impl ToolCatalog {
    pub fn new(tools: &[ToolConfig], pipelines: &[PipelineConfig]) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();

        for tool in tools {
            if catalog.tools.insert(tool.id.clone(), tool.stage).is_some() {
                return Err(CatalogError::DuplicateTool(tool.id.clone()));
            }
        }

        for pipeline in pipelines {
            if pipeline.tools.is_empty() {
                return Err(CatalogError::EmptyPipeline(pipeline.id.clone()));
            }
            let stages = pipeline
                .tools
                .iter()
                .map(|tool| {
                    catalog
                        .tools
                        .get(tool)
                        .copied()
                        .ok_or_else(|| CatalogError::UnknownTool {
                            pipeline: pipeline.id.clone(),
                            tool: tool.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            if catalog.pipelines.insert(pipeline.id.clone(), stages).is_some() {
                return Err(CatalogError::DuplicatePipeline(pipeline.id.clone()));
            }
        }

        Ok(catalog)
    }

    pub fn tool(&self, id: &str) -> Option<StageKind> {
        self.tools.get(id).copied()
    }

    pub fn pipeline(&self, id: &str) -> Option<&[StageKind]> {
        self.pipelines.get(id).map(Vec::as_slice)
    }

    /// Every stage some tool can reach, in catalog order.
    pub fn stages(&self) -> Vec<StageKind> {
        StageKind::ALL
            .into_iter()
            .filter(|stage| self.tools.values().any(|s| s == stage))
            .collect()
    }

    /// Fail when a reachable stage has no handler.
    pub fn validate(&self, registry: &StageRegistry) -> Result<(), CatalogError> {
        for stage in self.stages() {
            if registry.get(stage).is_none() {
                return Err(CatalogError::Unregistered(stage));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(id: &str, stage: StageKind) -> ToolConfig {
        ToolConfig {
            id: id.to_string(),
            name: None,
            stage,
        }
    }

    fn pipeline(id: &str, tools: &[&str]) -> PipelineConfig {
        PipelineConfig {
            id: id.to_string(),
            name: None,
            tools: tools.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_resolves_tools_and_pipelines() {
        let catalog = ToolCatalog::new(
            &[
                tool("extract", StageKind::ExtractText),
                tool("summarize", StageKind::Summarize),
            ],
            &[pipeline("digest", &["extract", "summarize"])],
        )
        .unwrap();

        assert_eq!(catalog.tool("summarize"), Some(StageKind::Summarize));
        assert_eq!(catalog.tool("missing"), None);
        assert_eq!(
            catalog.pipeline("digest").unwrap(),
            &[StageKind::ExtractText, StageKind::Summarize]
        );
    }

    #[test]
    fn test_unknown_tool_in_pipeline() {
        let err = ToolCatalog::new(
            &[tool("extract", StageKind::ExtractText)],
            &[pipeline("digest", &["extract", "nope"])],
        )
        .unwrap_err();

        assert_eq!(
            err,
            CatalogError::UnknownTool {
                pipeline: "digest".into(),
                tool: "nope".into()
            }
        );
    }

    #[test]
    fn test_duplicate_tool_and_empty_pipeline() {
        let err = ToolCatalog::new(
            &[
                tool("a", StageKind::Summarize),
                tool("a", StageKind::ExtractText),
            ],
            &[],
        )
        .unwrap_err();
        assert_eq!(err, CatalogError::DuplicateTool("a".into()));

        let err = ToolCatalog::new(&[tool("a", StageKind::Summarize)], &[pipeline("p", &[])])
            .unwrap_err();
        assert_eq!(err, CatalogError::EmptyPipeline("p".into()));
    }

    #[test]
    fn test_validate_against_registry() {
        let catalog = ToolCatalog::new(&[tool("summarize", StageKind::Summarize)], &[]).unwrap();
        let err = catalog.validate(&StageRegistry::new()).unwrap_err();
        assert_eq!(err, CatalogError::Unregistered(StageKind::Summarize));
    }
}
