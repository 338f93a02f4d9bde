use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use super::Project;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("project '{0}' not found")]
    UnknownProject(String),
}

/// Read-mostly collection of loaded projects. The reader/writer lock leaves
/// room for a future config reload without changing the call sites.
#[derive(Debug)]
pub struct Registry {
    projects: RwLock<HashMap<String, Arc<Project>>>,
}

impl Registry {
    pub fn new(projects: HashMap<String, Project>) -> Self {
        Self {
            projects: RwLock::new(
                projects
                    .into_iter()
                    .map(|(name, project)| (name, Arc::new(project)))
                    .collect(),
            ),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<Project>, RegistryError> {
        self.projects
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownProject(name.to_string()))
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .projects
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.projects.read().expect("registry lock poisoned").len()
    }
}
