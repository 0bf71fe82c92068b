//! Validated pipeline graph.
//!
//! Derived once from a [`TopologyConfig`] and immutable afterwards. Holds the
//! queue declarations, the stage definitions and, for every queue, how many
//! replicas drain it.

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::{ExecutionMode, QueueName, StageConfig, StageName, TopologyConfig};
use crate::error::ConfigError;
use crate::worker::Registry;

/// One stage of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDef {
    pub name: StageName,
    pub location: Option<String>,
    pub class: String,
    pub input_queue: Option<QueueName>,
    pub output_queues: Vec<QueueName>,
    pub instances: usize,
    pub input_values: Option<Vec<Value>>,
    pub params: Map<String, Value>,
}

impl StageDef {
    pub fn is_source(&self) -> bool {
        self.input_queue.is_none()
    }

    pub fn is_sink(&self) -> bool {
        self.output_queues.is_empty()
    }

    /// Static values for `replica`, dealt round-robin across the replicas.
    ///
    /// `None` when the stage declares no values; an empty share when there
    /// are more replicas than values.
    pub fn values_for(&self, replica: usize) -> Option<Vec<Value>> {
        let values = self.input_values.as_ref()?;
        Some(
            values
                .iter()
                .skip(replica)
                .step_by(self.instances.max(1))
                .cloned()
                .collect(),
        )
    }
}

impl From<&StageConfig> for StageDef {
    fn from(config: &StageConfig) -> Self {
        Self {
            name: config.name.clone(),
            location: config.location.clone(),
            class: config.class.clone(),
            input_queue: config.input_queue.clone(),
            output_queues: config.output_queues.clone(),
            instances: config.instances,
            input_values: config.input_values.clone(),
            params: config.params.clone(),
        }
    }
}

/// The full pipeline graph plus derived consumer counts.
#[derive(Debug, Clone)]
pub struct Topology {
    queues: IndexSet<QueueName>,
    stages: IndexMap<StageName, StageDef>,
    consumer_counts: HashMap<QueueName, usize>,
}

impl Topology {
    /// Validate `config` and build the graph.
    ///
    /// Every problem found is reported together.
    pub fn from_config(config: &TopologyConfig) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();

        let mut queues = IndexSet::new();
        for queue in &config.queues {
            if queue.name.is_empty() {
                errors.push(ConfigError::EmptyName { kind: "Queue" });
            } else if !queues.insert(queue.name.clone()) {
                errors.push(ConfigError::DuplicateQueue {
                    queue: queue.name.to_string(),
                });
            }
        }

        let mut stages = IndexMap::new();
        for stage in &config.workers {
            if stage.name.is_empty() {
                errors.push(ConfigError::EmptyName { kind: "Stage" });
                continue;
            }
            if stages.contains_key(&stage.name) {
                errors.push(ConfigError::DuplicateStage {
                    stage: stage.name.to_string(),
                });
                continue;
            }
            if stage.instances == 0 {
                errors.push(ConfigError::ZeroInstances {
                    stage: stage.name.to_string(),
                });
            }
            for queue in stage.input_queue.iter().chain(&stage.output_queues) {
                if !queues.contains(queue) {
                    errors.push(ConfigError::UnknownQueue {
                        stage: stage.name.to_string(),
                        queue: queue.to_string(),
                    });
                }
            }
            stages.insert(stage.name.clone(), StageDef::from(stage));
        }

        let topology = Self {
            consumer_counts: consumer_counts(&stages),
            queues,
            stages,
        };

        errors.extend(topology.unproduced_queues());
        if let Some(cycle) = topology.find_cycle() {
            errors.push(ConfigError::Cycle {
                stages: cycle.iter().map(ToString::to_string).collect(),
            });
        }
        if config.executor.mode == ExecutionMode::Batch {
            errors.extend(topology.stages().filter_map(|stage| {
                stage.input_queue.as_ref().map(|queue| ConfigError::BatchConsumer {
                    stage: stage.name.to_string(),
                    queue: queue.to_string(),
                })
            }));
        }

        ConfigError::from_many(errors)?;
        topology.warn_on_idle_replicas();
        Ok(topology)
    }

    /// Check that every stage's class is registered.
    pub fn check_registry(&self, registry: &Registry) -> Result<(), ConfigError> {
        ConfigError::from_many(
            self.stages()
                .filter(|stage| !registry.contains(&stage.class))
                .map(|stage| ConfigError::UnknownImplementation {
                    stage: stage.name.to_string(),
                    class: stage.class.clone(),
                })
                .collect(),
        )
    }

    pub fn queues(&self) -> impl Iterator<Item = &QueueName> {
        self.queues.iter()
    }

    /// Stages in declaration order.
    pub fn stages(&self) -> impl Iterator<Item = &StageDef> {
        self.stages.values()
    }

    pub fn stage(&self, name: &str) -> Option<&StageDef> {
        self.stages.get(name)
    }

    /// Number of replicas draining `queue` (zero if nobody consumes it).
    pub fn consumer_count(&self, queue: &QueueName) -> usize {
        self.consumer_counts.get(queue).copied().unwrap_or(0)
    }

    /// Names of the stages that push onto `queue`, in declaration order.
    pub fn producers(&self, queue: &QueueName) -> IndexSet<StageName> {
        self.producers_of(queue)
            .map(|stage| stage.name.clone())
            .collect()
    }

    /// Stages with no input queue.
    pub fn sources(&self) -> impl Iterator<Item = &StageDef> {
        self.stages().filter(|stage| stage.is_source())
    }

    /// Stages with no output queues.
    pub fn sinks(&self) -> impl Iterator<Item = &StageDef> {
        self.stages().filter(|stage| stage.is_sink())
    }

    fn producers_of<'a>(&'a self, queue: &'a QueueName) -> impl Iterator<Item = &'a StageDef> {
        self.stages()
            .filter(move |stage| stage.output_queues.contains(queue))
    }

    fn consumers_of<'a>(&'a self, queue: &'a QueueName) -> impl Iterator<Item = &'a StageDef> {
        self.stages()
            .filter(move |stage| stage.input_queue.as_ref() == Some(queue))
    }

    /// Queues somebody drains but nobody fills: their consumers would never see `DONE`.
    fn unproduced_queues(&self) -> Vec<ConfigError> {
        self.queues
            .iter()
            .filter(|queue| self.consumer_count(queue) > 0)
            .filter(|queue| self.producers_of(queue).next().is_none())
            .map(|queue| ConfigError::UnproducedQueue {
                queue: queue.to_string(),
                consumers: self
                    .consumers_of(queue)
                    .map(|stage| stage.name.to_string())
                    .collect(),
            })
            .collect()
    }

    /// Depth-first search over stage -> downstream stage edges.
    fn find_cycle(&self) -> Option<Vec<StageName>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            topology: &'a Topology,
            stage: &'a StageDef,
            marks: &mut HashMap<&'a StageName, Mark>,
            path: &mut Vec<&'a StageName>,
        ) -> Option<Vec<StageName>> {
            match marks.get(&stage.name) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|name| *name == &stage.name)?;
                    let mut cycle: Vec<StageName> =
                        path[start..].iter().map(|name| (*name).clone()).collect();
                    cycle.push(stage.name.clone());
                    return Some(cycle);
                }
                None => {}
            }

            marks.insert(&stage.name, Mark::Visiting);
            path.push(&stage.name);
            for queue in &stage.output_queues {
                for next in topology.consumers_of(queue) {
                    if let Some(cycle) = visit(topology, next, marks, path) {
                        return Some(cycle);
                    }
                }
            }
            path.pop();
            marks.insert(&stage.name, Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        let mut path = Vec::new();
        self.stages()
            .find_map(|stage| visit(self, stage, &mut marks, &mut path))
    }

    fn warn_on_idle_replicas(&self) {
        for stage in self.stages() {
            let Some(values) = &stage.input_values else {
                continue;
            };
            if stage.instances > values.len() {
                warn!(
                    stage = %stage.name,
                    instances = stage.instances,
                    values = values.len(),
                    "More replicas than input values; extra replicas will exit immediately"
                );
            }
        }

        let consumed: HashSet<_> = self.consumer_counts.keys().collect();
        for queue in self.queues.iter().filter(|q| !consumed.contains(q)) {
            if self.producers_of(queue).next().is_some() {
                warn!(%queue, "Queue is produced but never consumed");
            }
        }
    }
}

fn consumer_counts(stages: &IndexMap<StageName, StageDef>) -> HashMap<QueueName, usize> {
    let mut counts = HashMap::new();
    for stage in stages.values() {
        if let Some(queue) = &stage.input_queue {
            *counts.entry(queue.clone()).or_insert(0) += stage.instances;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_yaml;

    fn topology(yaml: &str) -> Result<Topology, ConfigError> {
        Topology::from_config(&parse_yaml(yaml).unwrap())
    }

    const SCENARIO: &str = r#"
queues:
  - name: SymbolQueue
  - name: PriceQueue
workers:
  - name: Fetch
    class: StaticSource
    instances: 3
    output_queues: [SymbolQueue]
    input_values: [A, B, C]
  - name: Price
    class: Stamp
    input_queue: SymbolQueue
    instances: 2
    output_queues: [PriceQueue]
  - name: Store
    class: LogSink
    input_queue: PriceQueue
"#;

    #[test]
    fn test_consumer_counts() {
        let topology = topology(SCENARIO).unwrap();
        assert_eq!(topology.consumer_count(&"SymbolQueue".into()), 2);
        assert_eq!(topology.consumer_count(&"PriceQueue".into()), 1);
        assert_eq!(topology.consumer_count(&"Nowhere".into()), 0);
    }

    #[test]
    fn test_consumer_counts_sum_across_stages() {
        let topology = topology(
            r#"
queues: [{name: Q}]
workers:
  - {name: P, class: X, output_queues: [Q]}
  - {name: A, class: X, input_queue: Q, instances: 2}
  - {name: B, class: X, input_queue: Q, instances: 3}
"#,
        )
        .unwrap();
        assert_eq!(topology.consumer_count(&"Q".into()), 5);
    }

    #[test]
    fn test_sources_and_sinks() {
        let topology = topology(SCENARIO).unwrap();
        let sources: Vec<_> = topology.sources().map(|s| s.name.id()).collect();
        let sinks: Vec<_> = topology.sinks().map(|s| s.name.id()).collect();
        assert_eq!(sources, vec!["Fetch"]);
        assert_eq!(sinks, vec!["Store"]);
        assert_eq!(topology.queues().count(), 2);
        assert_eq!(topology.stage("Price").unwrap().instances, 2);
    }

    #[test]
    fn test_zero_instances_rejected() {
        let err = topology(
            r#"
workers:
  - {name: Fetch, class: StaticSource, instances: 0}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroInstances { ref stage } if stage == "Fetch"));
    }

    #[test]
    fn test_unknown_queue_rejected() {
        let err = topology(
            r#"
queues: [{name: Q}]
workers:
  - {name: Fetch, class: X, output_queues: [Q, Missing]}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownQueue { ref queue, .. } if queue == "Missing"));
    }

    #[test]
    fn test_duplicates_reported_together() {
        let err = topology(
            r#"
queues: [{name: Q}, {name: Q}]
workers:
  - {name: S, class: X}
  - {name: S, class: X}
"#,
        )
        .unwrap_err();
        let ConfigError::MultipleErrors { errors } = err else {
            panic!("expected multiple errors");
        };
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_unproduced_queue_rejected() {
        let err = topology(
            r#"
queues: [{name: Orphan}]
workers:
  - {name: Reader, class: X, input_queue: Orphan}
"#,
        )
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::UnproducedQueue { ref queue, ref consumers } if queue == "Orphan" && consumers == &["Reader"])
        );
    }

    #[test]
    fn test_self_loop_rejected() {
        let err = topology(
            r#"
queues: [{name: Seed}, {name: Loop}]
workers:
  - {name: Source, class: X, output_queues: [Loop]}
  - {name: Spin, class: X, input_queue: Loop, output_queues: [Loop]}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Cycle { ref stages } if stages == &["Spin", "Spin"]));
    }

    #[test]
    fn test_longer_cycle_rejected() {
        let err = topology(
            r#"
queues: [{name: Q1}, {name: Q2}, {name: Q3}]
workers:
  - {name: Seed, class: X, output_queues: [Q1]}
  - {name: A, class: X, input_queue: Q1, output_queues: [Q2]}
  - {name: B, class: X, input_queue: Q2, output_queues: [Q3]}
  - {name: C, class: X, input_queue: Q3, output_queues: [Q1]}
"#,
        )
        .unwrap_err();
        let ConfigError::Cycle { stages } = err else {
            panic!("expected cycle");
        };
        assert_eq!(stages.first(), stages.last());
        assert!(stages.contains(&"B".to_string()));
    }

    #[test]
    fn test_batch_mode_rejects_consumers() {
        let err = topology(
            r#"
queues: [{name: Q}]
workers:
  - {name: P, class: X, output_queues: [Q]}
  - {name: C, class: X, input_queue: Q}
executor:
  mode: batch
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::BatchConsumer { ref stage, .. } if stage == "C"));
    }

    #[test]
    fn test_unconsumed_queue_is_allowed() {
        let topology = topology(
            r#"
queues: [{name: Dangling}]
workers:
  - {name: P, class: X, output_queues: [Dangling]}
"#,
        )
        .unwrap();
        assert_eq!(topology.consumer_count(&"Dangling".into()), 0);
    }

    #[test]
    fn test_values_dealt_round_robin() {
        let topology = topology(
            r#"
workers:
  - {name: Fetch, class: X, instances: 2, input_values: [A, B, C]}
  - {name: Wide, class: X, instances: 4, input_values: [A, B]}
  - {name: Bare, class: X}
"#,
        )
        .unwrap();

        let fetch = topology.stage("Fetch").unwrap();
        assert_eq!(fetch.values_for(0), Some(vec![Value::from("A"), Value::from("C")]));
        assert_eq!(fetch.values_for(1), Some(vec![Value::from("B")]));

        let wide = topology.stage("Wide").unwrap();
        assert_eq!(wide.values_for(1), Some(vec![Value::from("B")]));
        assert_eq!(wide.values_for(3), Some(Vec::new()));

        assert_eq!(topology.stage("Bare").unwrap().values_for(0), None);
    }

    #[test]
    fn test_registry_check() {
        let topology = topology(SCENARIO).unwrap();
        let mut registry = Registry::new();
        registry.register("StaticSource", |_| Err("unused".into()));

        let err = topology.check_registry(&registry).unwrap_err();
        let ConfigError::MultipleErrors { errors } = err else {
            panic!("expected both missing classes");
        };
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("Stamp")));
        assert!(errors.iter().any(|e| e.contains("LogSink")));
    }

    #[test]
    fn test_producers_per_queue() {
        let topology = topology(
            r#"
queues:
  - name: Q
  - name: Side
workers:
  - name: Fast
    class: StaticSource
    output_queues: [Q]
  - name: Slow
    class: StaticSource
    output_queues: [Q, Side]
  - name: Sink
    class: LogSink
    input_queue: Q
"#,
        )
        .unwrap();
        let names = |queue: &str| {
            topology
                .producers(&queue.into())
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names("Q"), vec!["Fast", "Slow"]);
        assert_eq!(names("Side"), vec!["Slow"]);
        assert_eq!(topology.consumer_count(&"Q".into()), 1);
    }
}
