use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Bucket, raw prefix, project and dataset are set
/// - Source names and dataset ids are unique and dataset ids are free of the `__` delimiter
/// - At least one view, unique view names, dependencies point at earlier views
/// - Log buffer and progress queue are not empty
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.storage.bucket.trim().is_empty() {
        return Err(invalid("storage.bucket cannot be empty"));
    }
    if config.storage.raw_prefix.trim().is_empty() {
        return Err(invalid("storage.raw_prefix cannot be empty"));
    }
    if config.warehouse.project_id.trim().is_empty() {
        return Err(invalid("warehouse.project_id cannot be empty"));
    }
    if config.warehouse.dataset.trim().is_empty() {
        return Err(invalid("warehouse.dataset cannot be empty"));
    }
    if config.warehouse.version_table.trim().is_empty() {
        return Err(invalid("warehouse.version_table cannot be empty"));
    }

    let mut names = HashSet::new();
    let mut dataset_ids = HashSet::new();
    for source in &config.sources {
        if !names.insert(source.name.as_str()) {
            return Err(invalid(format!("duplicate source name '{}'", source.name)));
        }
        if source.dataset_id.is_empty() || source.dataset_id.contains("__") {
            return Err(invalid(format!(
                "source '{}' has an invalid dataset_id '{}'",
                source.name, source.dataset_id
            )));
        }
        if !dataset_ids.insert(source.dataset_id.as_str()) {
            return Err(invalid(format!(
                "duplicate dataset_id '{}'",
                source.dataset_id
            )));
        }
        if source.table.trim().is_empty() {
            return Err(invalid(format!("source '{}' has no table", source.name)));
        }
    }

    if config.views.is_empty() {
        return Err(invalid("at least one view must be configured"));
    }

    let mut seen_views: HashSet<&str> = HashSet::new();
    for view in &config.views {
        for dep in &view.depends_on {
            if !seen_views.contains(dep.as_str()) {
                return Err(invalid(format!(
                    "view '{}' depends on '{}', which is not defined before it",
                    view.name, dep
                )));
            }
        }
        if !seen_views.insert(view.name.as_str()) {
            return Err(invalid(format!("duplicate view name '{}'", view.name)));
        }
    }

    if config.pipeline.log_buffer_lines == 0 {
        return Err(invalid("pipeline.log_buffer_lines cannot be 0"));
    }
    if config.pipeline.progress_channel_capacity == 0 {
        return Err(invalid("pipeline.progress_channel_capacity cannot be 0"));
    }

    Ok(())
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}
