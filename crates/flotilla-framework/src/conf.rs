//! Scheduler configuration document.
//!
//! A TOML document selects the action pipeline and the plugin tiers:
//!
//! ```toml
//! actions = "allocate, backfill"
//!
//! [[tiers]]
//! plugins = [{ name = "priority" }, { name = "gang" }]
//!
//! [[tiers]]
//! plugins = [{ name = "drf" }, { name = "predicates" }, { name = "nodeorder" }]
//! ```
//!
//! Enable flags missing from a plugin option default to true.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{FrameworkError, FrameworkResult};

/// One plugin within a tier, with per-function-kind enable flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginOption {
    pub name: String,
    /// Free-form arguments handed to the plugin builder.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub args: HashMap<String, String>,

    pub job_order: Option<bool>,
    pub task_order: Option<bool>,
    pub queue_order: Option<bool>,
    pub job_valid: Option<bool>,
    pub job_ready: Option<bool>,
    pub job_pipelined: Option<bool>,
    pub predicate: Option<bool>,
    pub node_order: Option<bool>,
    pub preemptable: Option<bool>,
    pub reclaimable: Option<bool>,
}

impl PluginOption {
    pub fn new(name: &str) -> PluginOption {
        PluginOption {
            name: name.to_string(),
            args: HashMap::new(),
            job_order: None,
            task_order: None,
            queue_order: None,
            job_valid: None,
            job_ready: None,
            job_pipelined: None,
            predicate: None,
            node_order: None,
            preemptable: None,
            reclaimable: None,
        }
    }

    /// Fill every unspecified enable flag with true.
    fn apply_defaults(&mut self) {
        for flag in [
            &mut self.job_order,
            &mut self.task_order,
            &mut self.queue_order,
            &mut self.job_valid,
            &mut self.job_ready,
            &mut self.job_pipelined,
            &mut self.predicate,
            &mut self.node_order,
            &mut self.preemptable,
            &mut self.reclaimable,
        ] {
            flag.get_or_insert(true);
        }
    }

    pub fn job_order_enabled(&self) -> bool {
        self.job_order.unwrap_or(true)
    }
    pub fn task_order_enabled(&self) -> bool {
        self.task_order.unwrap_or(true)
    }
    pub fn queue_order_enabled(&self) -> bool {
        self.queue_order.unwrap_or(true)
    }
    pub fn job_valid_enabled(&self) -> bool {
        self.job_valid.unwrap_or(true)
    }
    pub fn job_ready_enabled(&self) -> bool {
        self.job_ready.unwrap_or(true)
    }
    pub fn job_pipelined_enabled(&self) -> bool {
        self.job_pipelined.unwrap_or(true)
    }
    pub fn predicate_enabled(&self) -> bool {
        self.predicate.unwrap_or(true)
    }
    pub fn node_order_enabled(&self) -> bool {
        self.node_order.unwrap_or(true)
    }
    pub fn preemptable_enabled(&self) -> bool {
        self.preemptable.unwrap_or(true)
    }
    pub fn reclaimable_enabled(&self) -> bool {
        self.reclaimable.unwrap_or(true)
    }
}

/// An ordered group of plugins evaluated with short-circuit semantics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub plugins: Vec<PluginOption>,
}

/// The full scheduler configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConf {
    /// Comma-separated, ordered action names.
    pub actions: String,
    #[serde(default)]
    pub tiers: Vec<Tier>,
}

impl SchedulerConf {
    /// Parse a configuration document, filling flag defaults.
    pub fn load(document: &str) -> FrameworkResult<SchedulerConf> {
        let mut conf: SchedulerConf =
            toml::from_str(document).map_err(|e| FrameworkError::Config(e.to_string()))?;
        if conf.action_names().is_empty() {
            return Err(FrameworkError::Config("no actions configured".to_string()));
        }
        for tier in &mut conf.tiers {
            for plugin in &mut tier.plugins {
                plugin.apply_defaults();
            }
        }
        Ok(conf)
    }

    /// The ordered action names.
    pub fn action_names(&self) -> Vec<String> {
        self.actions
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl Default for SchedulerConf {
    /// The configuration used when no document is supplied: allocate and
    /// backfill, one tier with every well-known plugin.
    fn default() -> SchedulerConf {
        let mut tier = Tier::default();
        for name in [
            "priority",
            "gang",
            "conformance",
            "drf",
            "predicates",
            "proportion",
            "nodeorder",
        ] {
            let mut opt = PluginOption::new(name);
            opt.apply_defaults();
            tier.plugins.push(opt);
        }
        SchedulerConf {
            actions: "allocate, backfill".to_string(),
            tiers: vec![tier],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fills_defaults() {
        let document = r#"
actions = "allocate, backfill"

[[tiers]]
plugins = [{ name = "priority" }, { name = "gang" }, { name = "conformance" }]

[[tiers]]
plugins = [{ name = "drf" }, { name = "predicates" }, { name = "proportion" }, { name = "nodeorder" }]
"#;

        let conf = SchedulerConf::load(document).unwrap();
        assert_eq!(conf.action_names(), vec!["allocate", "backfill"]);
        assert_eq!(conf.tiers.len(), 2);
        assert_eq!(conf.tiers[0].plugins.len(), 3);
        assert_eq!(conf.tiers[1].plugins.len(), 4);

        for tier in &conf.tiers {
            for plugin in &tier.plugins {
                assert_eq!(plugin.job_order, Some(true));
                assert_eq!(plugin.predicate, Some(true));
                assert_eq!(plugin.preemptable, Some(true));
                assert_eq!(plugin.reclaimable, Some(true));
            }
        }
    }

    #[test]
    fn explicit_flags_survive_defaulting() {
        let document = r#"
actions = "allocate"

[[tiers]]
plugins = [{ name = "gang", preemptable = false }]
"#;

        let conf = SchedulerConf::load(document).unwrap();
        let opt = &conf.tiers[0].plugins[0];
        assert!(!opt.preemptable_enabled());
        assert!(opt.job_order_enabled());
    }

    #[test]
    fn empty_actions_rejected() {
        assert!(SchedulerConf::load("actions = \"\"").is_err());
    }

    #[test]
    fn malformed_document_rejected() {
        assert!(matches!(
            SchedulerConf::load("actions = [1, 2]"),
            Err(FrameworkError::Config(_))
        ));
    }

    #[test]
    fn default_conf_has_all_plugins() {
        let conf = SchedulerConf::default();
        assert_eq!(conf.action_names(), vec!["allocate", "backfill"]);
        let names: Vec<_> = conf.tiers[0].plugins.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"gang"));
        assert!(names.contains(&"proportion"));
    }
}
