use super::{Config, ProjectConfig, ProjectConfigFile};
use anyhow::{anyhow, Result};
use glob::glob;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

pub struct ConfigManager {
    current_config: Arc<Config>,
}

impl ConfigManager {
    pub async fn new(config_dir: String) -> Result<Self> {
        let config = Self::load_configuration(&config_dir).await?;
        Ok(Self {
            current_config: Arc::new(config),
        })
    }

    pub fn get_current_config(&self) -> Arc<Config> {
        self.current_config.clone()
    }

    async fn load_configuration(config_dir: &str) -> Result<Config> {
        let main_config_path = format!("{}/main.toml", config_dir);
        let main_config_content = fs::read_to_string(&main_config_path).await
            .map_err(|e| anyhow!("Failed to read main config {}: {}", main_config_path, e))?;

        let mut config: Config = toml::from_str(&main_config_content)
            .map_err(|e| anyhow!("Failed to parse main config: {}", e))?;

        if config.max_workers == 0 {
            return Err(anyhow!("max_workers must be at least 1"));
        }

        // Every other *.toml in the directory describes one project
        let pattern = format!("{}/*.toml", config_dir);
        let mut projects = BTreeMap::new();

        for entry in glob(&pattern).map_err(|e| anyhow!("Glob pattern error: {}", e))? {
            let path = entry.map_err(|e| anyhow!("Glob entry error: {}", e))?;
            let filename = path.file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow!("Invalid filename"))?;

            if filename == "main.toml" {
                continue;
            }

            let project_id = filename.strip_suffix(".toml")
                .ok_or_else(|| anyhow!("Invalid config filename: {}", filename))?;

            debug!("Loading project config: {}", path.display());

            let content = fs::read_to_string(&path).await
                .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;

            let project_file: ProjectConfigFile = toml::from_str(&content)
                .map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))?;

            for (alias, workflow) in &project_file.workflows {
                let channels = workflow.task.notifications_ok.iter()
                    .chain(&workflow.task.notifications_fail);
                for channel in channels {
                    if !config.channels.contains_key(channel) {
                        warn!(
                            "Workflow '{}' in project '{}' references unknown channel '{}'",
                            alias, project_id, channel
                        );
                    }
                }
            }

            projects.insert(
                project_id.to_string(),
                ProjectConfig {
                    project_id: project_id.to_string(),
                    name: project_file.project.name,
                    description: project_file.project.description,
                    workflows: project_file.workflows,
                },
            );
        }

        config.projects = projects;

        info!(
            "Loaded {} projects with {} workflows, {} notification channels",
            config.projects.len(),
            config.projects.values().map(|p| p.workflows.len()).sum::<usize>(),
            config.channels.len()
        );

        Ok(config)
    }
}
