// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{effective_default_destination, ConfigFile, RawConfigFile, RunnerKind};
use crate::errors::{Result, RunnerError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::RunnerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.manager, raw.destination, raw.job))
    }
}

pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_raw_config(cfg)
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_destinations(cfg)?;
    validate_destinations(cfg)?;
    validate_destination_references(cfg)?;
    validate_fallback_chains(cfg)?;
    validate_jobs(cfg)?;
    Ok(())
}

fn ensure_has_destinations(cfg: &RawConfigFile) -> Result<()> {
    if cfg.destination.is_empty() {
        return Err(RunnerError::Config(
            "config must contain at least one [destination.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_destinations(cfg: &RawConfigFile) -> Result<()> {
    for (name, dest) in cfg.destination.iter() {
        match dest.runner {
            RunnerKind::Local => {
                if dest.workers == 0 {
                    return Err(RunnerError::Config(format!(
                        "[destination.{name}].workers must be >= 1 (got 0)"
                    )));
                }
            }
            RunnerKind::Remote => {
                let has_url = dest.url.as_deref().is_some_and(|u| !u.trim().is_empty());
                if !has_url {
                    return Err(RunnerError::Config(format!(
                        "[destination.{name}] uses the remote runner but has no url"
                    )));
                }
                if dest.poll_interval_ms == 0 {
                    return Err(RunnerError::Config(format!(
                        "[destination.{name}].poll_interval_ms must be >= 1 (got 0)"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_destination_references(cfg: &RawConfigFile) -> Result<()> {
    if let Some(default) = &cfg.manager.default_destination {
        if !cfg.destination.contains_key(default) {
            return Err(RunnerError::Config(format!(
                "[manager].default_destination names unknown destination '{default}'"
            )));
        }
    }

    for (name, dest) in cfg.destination.iter() {
        if let Some(fallback) = &dest.fallback {
            if !cfg.destination.contains_key(fallback) {
                return Err(RunnerError::Config(format!(
                    "destination '{name}' has unknown fallback '{fallback}'"
                )));
            }
            if fallback == name {
                return Err(RunnerError::Config(format!(
                    "destination '{name}' cannot fall back to itself"
                )));
            }
        }
    }
    Ok(())
}

fn validate_fallback_chains(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: destination -> its fallback.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.destination.keys() {
        graph.add_node(name.as_str());
    }
    for (name, dest) in cfg.destination.iter() {
        if let Some(fallback) = &dest.fallback {
            graph.add_edge(name.as_str(), fallback.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(RunnerError::Config(format!(
            "fallback cycle detected involving destination '{}'",
            cycle.node_id()
        ))),
    }
}

fn validate_jobs(cfg: &RawConfigFile) -> Result<()> {
    let default = effective_default_destination(&cfg.manager, &cfg.destination);

    for (id, job) in cfg.job.iter() {
        if job.cmd.trim().is_empty() {
            return Err(RunnerError::Config(format!("job '{id}' has an empty cmd")));
        }

        match &job.destination {
            Some(dest) if !cfg.destination.contains_key(dest) => {
                return Err(RunnerError::Config(format!(
                    "job '{id}' names unknown destination '{dest}'"
                )));
            }
            Some(_) => {}
            None if default.is_none() => {
                return Err(RunnerError::Config(format!(
                    "job '{id}' has no destination and [manager].default_destination is not set"
                )));
            }
            None => {}
        }

        for pattern in &job.error_patterns {
            pattern.to_detector().map_err(|e| match e {
                RunnerError::Config(msg) => RunnerError::Config(format!("job '{id}': {msg}")),
                other => other,
            })?;
        }
    }
    Ok(())
}
