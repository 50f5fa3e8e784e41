//! Plan command: show the jobs a run would submit without submitting anything

use anyhow::{Context, Result};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{PipelineInputs, ensure_valid, prepare_run};
use crate::client::stage_graph::{StageGraph, StageGraphBuilder};
use crate::config::NanopipeConfig;

#[derive(Tabled, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PlanRow {
    #[tabled(rename = "Sample")]
    pub sample: String,
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "Stage")]
    pub stage: String,
    #[tabled(rename = "Job Name")]
    pub name: String,
    #[tabled(rename = "Depends On")]
    pub depends_on: String,
    #[tabled(rename = "Partition")]
    pub partition: String,
    #[tabled(rename = "CPUs")]
    pub cpus: u32,
    #[tabled(rename = "Device")]
    pub device: String,
}

/// Rows for one sample's graph; dependencies are shown as node numbers
/// joined the way the scheduler would join the real ids.
pub fn plan_rows(graph: &StageGraph) -> Vec<PlanRow> {
    graph
        .nodes()
        .iter()
        .enumerate()
        .map(|(index, node)| {
            let deps: Vec<String> = node.depends_on.iter().map(|d| format!("#{}", d)).collect();
            PlanRow {
                sample: graph.sample().to_string(),
                index,
                stage: node.stage.to_string(),
                name: node.request.name.clone(),
                depends_on: deps.join(&node.mode.separator().to_string()),
                partition: node.request.partition.clone(),
                cpus: node.request.resources.cpus_per_task,
                device: node
                    .request
                    .resources
                    .accelerator
                    .as_ref()
                    .map(|a| a.token.clone())
                    .unwrap_or_default(),
            }
        })
        .collect()
}

pub fn run_plan(inputs: &PipelineInputs, config: &NanopipeConfig, format: &str) -> Result<()> {
    ensure_valid(config)?;
    let prepared = prepare_run(inputs, config)?;
    let builder = StageGraphBuilder::new(
        &config.pipeline,
        &config.slurm,
        &prepared.tools,
        inputs.threads,
    );

    let mut rows = Vec::new();
    for sample in &prepared.samples {
        if let Some(graph) = builder.build(sample, prepared.lanes.get(&sample.name)) {
            rows.extend(plan_rows(&graph));
        }
    }

    if format == "json" {
        let json = serde_json::to_string_pretty(&rows).context("Failed to serialize plan")?;
        println!("{}", json);
        return Ok(());
    }

    let count = rows.len();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);
    println!(
        "{} jobs for {} samples across {} lanes",
        count,
        prepared.samples.len(),
        config.pipeline.lanes
    );
    Ok(())
}
