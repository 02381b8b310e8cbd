use std::path::Path;

use anyhow::Context;
use classgrid_core::{EngineConfig, Note, RosterRecord, group_label};
use classgrid_pipeline::{Pipeline, PipelineOutcome, RepairRecord};
use classgrid_scoring::{ScoreBreakdown, ScoredScenario};
use serde::Serialize;
use tracing::info;

use crate::report;

pub struct AssignArgs<'a> {
    pub roster: &'a str,
    pub config: Option<&'a str>,
    pub groups: Option<usize>,
    pub seed: Option<u64>,
    pub format: &'a str,
}

/// Selected scenario as written by `--format json`.
#[derive(Debug, Serialize)]
pub struct Assignment<'a> {
    pub scenario: &'a str,
    pub seed: u64,
    pub groups: Vec<GroupMembers>,
    pub notes: &'a [Note],
    /// Balance swaps and the performance tier behind the scenario.
    pub repair: Option<&'a RepairRecord>,
    pub breakdown: &'a ScoreBreakdown,
}

#[derive(Debug, Serialize)]
pub struct GroupMembers {
    pub label: String,
    pub members: Vec<String>,
}

pub fn assign(args: &AssignArgs<'_>) -> anyhow::Result<()> {
    let records = load_roster(Path::new(args.roster))?;
    let config = load_config(args.config.map(Path::new), args.groups, args.seed)?;
    let seed = config.seed;
    info!("Assigning {} individuals from {} (seed {seed})", records.len(), args.roster);

    let outcome = Pipeline::new(config).run(records)?;
    let best = outcome
        .selected()
        .context("no scenario survived to selection")?;
    info!(
        "Selected {} of {} candidates (penalty {})",
        best.scenario.id(),
        outcome.ranked.len(),
        best.breakdown.total
    );
    let repair = outcome.repair_of(best.scenario.id());

    match args.format {
        "json" => {
            let assignment = assignment(&outcome, best, seed);
            println!("{}", serde_json::to_string_pretty(&assignment)?);
        }
        _ => {
            println!("{}", report::format_report(&outcome.roster, best, repair));
        }
    }

    Ok(())
}

pub fn load_roster(path: &Path) -> anyhow::Result<Vec<RosterRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading roster {}", path.display()))?;
    let records: Vec<RosterRecord> = serde_json::from_str(&content)
        .with_context(|| format!("parsing roster {}", path.display()))?;
    Ok(records)
}

/// File configuration (or defaults) with command-line overrides applied.
pub fn load_config(
    path: Option<&Path>,
    groups: Option<usize>,
    seed: Option<u64>,
) -> anyhow::Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if groups.is_some() {
        config.group_count = groups;
    }
    if let Some(seed) = seed {
        config.seed = seed;
    }
    config.validate()?;
    Ok(config)
}

pub fn assignment<'a>(
    outcome: &'a PipelineOutcome,
    best: &'a ScoredScenario,
    seed: u64,
) -> Assignment<'a> {
    let scenario = &best.scenario;
    let groups = (0..scenario.group_count())
        .map(|group| GroupMembers {
            label: group_label(group),
            members: scenario
                .members(group)
                .into_iter()
                .map(|id| outcome.roster.name(id).to_string())
                .collect(),
        })
        .collect();

    Assignment {
        scenario: scenario.id(),
        seed,
        groups,
        notes: scenario.notes(),
        repair: outcome.repair_of(scenario.id()),
        breakdown: &best.breakdown,
    }
}
