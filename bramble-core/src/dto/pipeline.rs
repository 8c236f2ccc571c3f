//! Pipeline DTOs

use serde::{Deserialize, Serialize};

use crate::domain::pipeline::Pipeline;

/// Pipeline name with its task graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub name: String,
    pub namespace: String,
    pub tasks: Vec<TaskSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub name: String,
    pub image: String,
    pub depends_on: Vec<String>,
}

impl From<&Pipeline> for PipelineSummary {
    fn from(pipeline: &Pipeline) -> Self {
        Self {
            name: pipeline.name().to_string(),
            namespace: pipeline.metadata.namespace.clone().unwrap_or_default(),
            tasks: pipeline
                .spec
                .tasks
                .iter()
                .map(|t| TaskSummary {
                    name: t.name.clone(),
                    image: t.image.clone(),
                    depends_on: t.depends_on.clone(),
                })
                .collect(),
        }
    }
}
