//! Topology file handling for the rift binary.
//!
//! The topology file is YAML: an optional log level, the list of nodes
//! this process runs and, for simulated runs, the links between them.
//! Environment variables override parts of it.

use anyhow::{bail, Context, Result};
use rift_engine::NodeConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Environment variable overriding the log filter
pub const ENV_LOG_LEVEL: &str = "RIFT_LOG_LEVEL";
/// Environment variable restricting the nodes to run, comma separated
pub const ENV_NODES: &str = "RIFT_NODES";

fn default_log_level() -> String {
    "info".to_string()
}

/// Contents of a topology file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Log filter, in `tracing_subscriber::EnvFilter` syntax
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Nodes run by this process
    pub nodes: Vec<NodeConfig>,
    /// Links between node interfaces, used by simulated runs
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

/// A point-to-point link between two `node:interface` endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// First endpoint
    pub a: String,
    /// Second endpoint
    pub b: String,
}

impl LinkConfig {
    /// Split an endpoint into node and interface names
    pub fn endpoint(value: &str) -> Result<(&str, &str)> {
        match value.split_once(':') {
            Some((node, interface)) if !node.is_empty() && !interface.is_empty() => {
                Ok((node, interface))
            }
            _ => bail!("Link endpoint {:?} is not of the form node:interface", value),
        }
    }
}

impl TopologyConfig {
    /// Read, override from the environment and validate a topology file
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read topology file {:?}", path))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse topology file {:?}", path))?;
        config.apply_environment_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse topology YAML without validating it
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply overrides read through `lookup`
    pub fn apply_environment_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(nodes) = lookup(ENV_NODES) {
            let names: Vec<String> = nodes
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
            self.select(&names)?;
        }
        Ok(())
    }

    /// Keep only the named nodes and the links between them; an empty
    /// list keeps everything
    pub fn select(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        for name in names {
            if !self.nodes.iter().any(|node| &node.name == name) {
                bail!("Node {} is not in the topology", name);
            }
        }
        self.nodes.retain(|node| names.contains(&node.name));
        self.links.retain(|link| {
            [&link.a, &link.b].iter().all(|end| {
                LinkConfig::endpoint(end)
                    .map(|(node, _)| names.iter().any(|name| name == node))
                    .unwrap_or(false)
            })
        });
        Ok(())
    }

    /// Check every node and the uniqueness of names and system ids
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("Topology defines no nodes");
        }
        let mut names = HashSet::new();
        let mut system_ids = HashSet::new();
        for node in &self.nodes {
            node.validate()
                .with_context(|| format!("Invalid configuration for node {}", node.name))?;
            if !names.insert(node.name.as_str()) {
                bail!("Duplicate node name {}", node.name);
            }
            if !system_ids.insert(node.system_id) {
                bail!("Duplicate system id {} on node {}", node.system_id, node.name);
            }
        }
        for link in &self.links {
            for end in [&link.a, &link.b] {
                let (node, interface) = LinkConfig::endpoint(end)?;
                let known = self
                    .nodes
                    .iter()
                    .find(|config| config.name == node)
                    .map_or(false, |config| {
                        config.interfaces.iter().any(|i| i.name == interface)
                    });
                if !known {
                    bail!("Link endpoint {} does not name a configured interface", end);
                }
            }
        }
        Ok(())
    }
}
