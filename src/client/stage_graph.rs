//! Stage Graph - the per-sample job graph across the five pipeline stages
//!
//! A graph holds one node per job request, stored in a submission order in
//! which every node's prerequisites come before it. The shape is fixed:
//!
//! - one converting job per raw-file group, with no prerequisites
//! - per variant, one basecalling job depending on all converting jobs
//! - per variant, aligning, mod_lookup and sv_lookup jobs chained on the
//!   matching basecalling and aligning jobs
//!
//! sv_lookup candidates use any-of semantics; only one of them is meant to
//! survive (see `redundancy`).

use std::collections::HashSet;

use crate::client::tool_commands::{ToolCommands, variant_tag};
use crate::config::{PipelineConfig, SlurmConfig};
use crate::models::{
    AcceleratorBinding, DependencyMode, JobRequest, ResourceShape, Sample, Stage,
};

/// A node in the stage graph
#[derive(Debug, Clone, PartialEq)]
pub struct StageNode {
    pub stage: Stage,
    /// Processing variant, `None` for converting jobs
    pub variant: Option<String>,
    /// Raw-file group index, only set for converting jobs
    pub group_index: Option<usize>,
    pub request: JobRequest,
    /// Indices of prerequisite nodes, always lower than this node's index
    pub depends_on: Vec<usize>,
    pub mode: DependencyMode,
}

/// Job graph of one sample
#[derive(Debug, Clone)]
pub struct StageGraph {
    sample: String,
    nodes: Vec<StageNode>,
}

impl StageGraph {
    pub fn sample(&self) -> &str {
        &self.sample
    }

    /// Nodes in submission order.
    pub fn nodes(&self) -> &[StageNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.nodes.iter().filter(|n| n.stage == stage).count()
    }

    pub fn dependencies_of(&self, index: usize) -> &[usize] {
        self.nodes
            .get(index)
            .map(|n| n.depends_on.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, index: usize) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.depends_on.contains(&index))
            .map(|(i, _)| i)
            .collect()
    }

    /// Nodes with no prerequisites
    pub fn roots(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].depends_on.is_empty())
            .collect()
    }

    /// Group node indices into levels where each level only depends on
    /// earlier levels.
    pub fn topological_levels(&self) -> Vec<Vec<usize>> {
        let mut levels = Vec::new();
        let mut processed: HashSet<usize> = HashSet::new();
        let mut remaining: Vec<usize> = (0..self.nodes.len()).collect();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<usize>, Vec<usize>) = remaining
                .into_iter()
                .partition(|&i| self.nodes[i].depends_on.iter().all(|d| processed.contains(d)));
            // Prerequisites always precede their dependents, so this cannot loop.
            if ready.is_empty() {
                break;
            }
            processed.extend(ready.iter().copied());
            levels.push(ready);
            remaining = blocked;
        }
        levels
    }
}

/// Builds stage graphs for the samples of one run
#[derive(Debug, Clone)]
pub struct StageGraphBuilder<'a> {
    pipeline: &'a PipelineConfig,
    slurm: &'a SlurmConfig,
    tools: &'a ToolCommands,
    threads_per_machine: u32,
}

impl<'a> StageGraphBuilder<'a> {
    pub fn new(
        pipeline: &'a PipelineConfig,
        slurm: &'a SlurmConfig,
        tools: &'a ToolCommands,
        threads_per_machine: u32,
    ) -> Self {
        Self {
            pipeline,
            slurm,
            tools,
            threads_per_machine,
        }
    }

    /// Build the graph for `sample`. Returns `None` when it has no raw-file groups.
    pub fn build(
        &self,
        sample: &Sample,
        accelerator: Option<&AcceleratorBinding>,
    ) -> Option<StageGraph> {
        if sample.raw_groups.is_empty() {
            return None;
        }
        let name = sample.name.as_str();
        let mut nodes = Vec::new();

        let converting_threads = self.threads(Stage::Converting);
        for (index, group) in sample.raw_groups.iter().enumerate() {
            nodes.push(StageNode {
                stage: Stage::Converting,
                variant: None,
                group_index: Some(index),
                request: self.request(
                    Stage::Converting,
                    format!("pod5_convert_{}_{}", name, index),
                    self.tools.convert(name, index, group, converting_threads),
                    None,
                ),
                depends_on: Vec::new(),
                mode: DependencyMode::All,
            });
        }
        let converting: Vec<usize> = (0..nodes.len()).collect();

        let device = accelerator
            .map(|a| a.token.clone())
            .unwrap_or_else(|| "cuda:all".to_string());

        for variant in &self.pipeline.variants {
            let tag = variant_tag(variant);

            let basecall = nodes.len();
            nodes.push(StageNode {
                stage: Stage::Basecalling,
                variant: Some(variant.clone()),
                group_index: None,
                request: self.request(
                    Stage::Basecalling,
                    format!("basecall_{}_{}", name, tag),
                    self.tools.basecall(name, variant, &device),
                    accelerator,
                ),
                depends_on: converting.clone(),
                mode: DependencyMode::All,
            });

            let align = nodes.len();
            nodes.push(StageNode {
                stage: Stage::Aligning,
                variant: Some(variant.clone()),
                group_index: None,
                request: self.request(
                    Stage::Aligning,
                    format!("align_{}_{}", name, tag),
                    self.tools
                        .align(name, variant, self.threads(Stage::Aligning)),
                    None,
                ),
                depends_on: vec![basecall],
                mode: DependencyMode::All,
            });

            nodes.push(StageNode {
                stage: Stage::ModLookup,
                variant: Some(variant.clone()),
                group_index: None,
                request: self.request(
                    Stage::ModLookup,
                    format!("mod_lookup_{}_{}", name, tag),
                    self.tools
                        .mod_lookup(name, variant, self.threads(Stage::ModLookup)),
                    None,
                ),
                depends_on: vec![align],
                mode: DependencyMode::All,
            });

            nodes.push(StageNode {
                stage: Stage::SvLookup,
                variant: Some(variant.clone()),
                group_index: None,
                request: self.request(
                    Stage::SvLookup,
                    format!("sv_lookup_{}_{}", name, tag),
                    self.tools
                        .sv_lookup(name, variant, self.threads(Stage::SvLookup)),
                    None,
                ),
                depends_on: vec![align],
                mode: DependencyMode::Any,
            });
        }

        Some(StageGraph {
            sample: sample.name.clone(),
            nodes,
        })
    }

    fn threads(&self, stage: Stage) -> u32 {
        self.pipeline
            .stage(stage)
            .threads_per_task(self.threads_per_machine)
    }

    fn request(
        &self,
        stage: Stage,
        name: String,
        command: String,
        accelerator: Option<&AcceleratorBinding>,
    ) -> JobRequest {
        let (partition, exclude_nodes) = if stage.uses_accelerator() {
            (&self.slurm.gpu_partition, &self.slurm.exclude_nodes_gpu)
        } else {
            (&self.slurm.cpu_partition, &self.slurm.exclude_nodes_cpu)
        };
        JobRequest {
            name,
            partition: partition.clone(),
            command,
            resources: ResourceShape {
                nodes: 1,
                ntasks: 1,
                cpus_per_task: self.threads(stage),
                memory: self.pipeline.stage(stage).memory.clone(),
                accelerator: if stage.uses_accelerator() {
                    accelerator.cloned()
                } else {
                    None
                },
                exclude_nodes: exclude_nodes.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use std::path::{Path, PathBuf};

    fn tools() -> ToolCommands {
        ToolCommands::new(
            LayoutConfig::default().resolve(Path::new("/out")),
            PathBuf::from("/models/sup"),
            PathBuf::from("/ref/genome.fna"),
            PathBuf::from("/ref/trf.bed"),
        )
    }

    fn sample(groups: usize) -> Sample {
        Sample::new(
            "s1",
            (0..groups)
                .map(|i| PathBuf::from(format!("/in/s1/run{}/fast5_pass", i)))
                .collect(),
        )
    }

    #[test]
    fn test_graph_counts() {
        let pipeline = PipelineConfig::default();
        let slurm = SlurmConfig::default();
        let tools = tools();
        let builder = StageGraphBuilder::new(&pipeline, &slurm, &tools, 64);

        let graph = builder.build(&sample(3), None).unwrap();
        assert_eq!(graph.count(Stage::Converting), 3);
        for stage in [
            Stage::Basecalling,
            Stage::Aligning,
            Stage::ModLookup,
            Stage::SvLookup,
        ] {
            assert_eq!(graph.count(stage), 2, "stage {}", stage);
        }
        assert_eq!(graph.len(), 11);
        assert_eq!(graph.roots(), vec![0, 1, 2]);
    }

    #[test]
    fn test_no_groups_yields_no_graph() {
        let pipeline = PipelineConfig::default();
        let slurm = SlurmConfig::default();
        let tools = tools();
        let builder = StageGraphBuilder::new(&pipeline, &slurm, &tools, 64);
        assert!(builder.build(&sample(0), None).is_none());
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        let pipeline = PipelineConfig::default();
        let slurm = SlurmConfig::default();
        let tools = tools();
        let builder = StageGraphBuilder::new(&pipeline, &slurm, &tools, 64);
        let graph = builder.build(&sample(2), None).unwrap();

        for (index, node) in graph.nodes().iter().enumerate() {
            assert!(node.depends_on.iter().all(|&d| d < index));
            match node.stage {
                Stage::Converting => assert!(node.depends_on.is_empty()),
                Stage::Basecalling => assert_eq!(node.depends_on, vec![0, 1]),
                Stage::Aligning => {
                    let dep = &graph.nodes()[node.depends_on[0]];
                    assert_eq!(dep.stage, Stage::Basecalling);
                    assert_eq!(dep.variant, node.variant);
                }
                Stage::ModLookup | Stage::SvLookup => {
                    assert_eq!(node.depends_on.len(), 1);
                    let dep = &graph.nodes()[node.depends_on[0]];
                    assert_eq!(dep.stage, Stage::Aligning);
                    assert_eq!(dep.variant, node.variant);
                }
            }
        }
        let sv_modes: Vec<DependencyMode> = graph
            .nodes()
            .iter()
            .filter(|n| n.stage == Stage::SvLookup)
            .map(|n| n.mode)
            .collect();
        assert_eq!(sv_modes, vec![DependencyMode::Any, DependencyMode::Any]);
    }

    #[test]
    fn test_topological_levels() {
        let pipeline = PipelineConfig::default();
        let slurm = SlurmConfig::default();
        let tools = tools();
        let builder = StageGraphBuilder::new(&pipeline, &slurm, &tools, 64);
        let graph = builder.build(&sample(1), None).unwrap();

        let levels = graph.topological_levels();
        assert_eq!(levels.len(), 4);
        assert_eq!(levels[0], vec![0]);
        assert_eq!(levels[3].len(), 4);
        assert_eq!(graph.dependents_of(0).len(), 2);
    }

    #[test]
    fn test_requests_are_partitioned() {
        let pipeline = PipelineConfig::default();
        let slurm = SlurmConfig::default();
        let tools = tools();
        let lane = AcceleratorBinding {
            token: "cuda:1".to_string(),
            count: 1,
        };
        let builder = StageGraphBuilder::new(&pipeline, &slurm, &tools, 64);
        let graph = builder.build(&sample(1), Some(&lane)).unwrap();

        let convert = &graph.nodes()[0].request;
        assert_eq!(convert.name, "pod5_convert_s1_0");
        assert_eq!(convert.partition, "cpu_nodes");
        assert_eq!(convert.resources.exclude_nodes, vec!["dgx10".to_string()]);
        assert_eq!(convert.resources.cpus_per_task, 4);

        let basecall = &graph.nodes()[1].request;
        assert_eq!(basecall.name, "basecall_s1_5mCG-5hmCG");
        assert_eq!(basecall.partition, "gpu_nodes");
        assert_eq!(basecall.resources.accelerator, Some(lane));
        assert!(basecall.command.contains("--device cuda:1"));
        assert!(graph.nodes()[2].request.resources.accelerator.is_none());
    }
}
