//! Project provisioning seam.
//!
//! Projects are owned by the surrounding application; the scan core only
//! needs to look one up or create one as a side effect of starting a
//! scan. [`MemoryProjects`] backs the default server wiring and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use recon_model::ProjectId;

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("{0}")]
    Internal(String),
}

/// A project owning recon artifacts and scan jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub root_domain: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProjectProvider: Send + Sync {
    async fn get(&self, id: ProjectId) -> Result<Option<Project>, ProjectError>;
    async fn create(&self, name: &str, root_domain: &str) -> Result<Project, ProjectError>;
}

/// In-memory project directory.
#[derive(Debug, Default)]
pub struct MemoryProjects {
    inner: RwLock<HashMap<ProjectId, Project>>,
}

impl MemoryProjects {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectProvider for MemoryProjects {
    async fn get(&self, id: ProjectId) -> Result<Option<Project>, ProjectError> {
        Ok(self.inner.read().await.get(&id).cloned())
    }

    async fn create(&self, name: &str, root_domain: &str) -> Result<Project, ProjectError> {
        let project = Project {
            id: ProjectId::new(),
            name: name.to_string(),
            root_domain: root_domain.to_string(),
            created_at: Utc::now(),
        };
        self.inner
            .write()
            .await
            .insert(project.id, project.clone());
        Ok(project)
    }
}
