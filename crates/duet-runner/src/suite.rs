//! Running catalogue scenarios, each on a fresh network and fixture.

use std::sync::Arc;

use duet_core::SystemEnv;
use duet_harness::{
    CoverageLog, CoverageReport, ScenarioError, SessionFixture, SimNetwork, scenario,
};

use crate::settings::Settings;

/// How one scenario ended.
#[derive(Debug)]
pub enum Verdict {
    /// Every check held
    Passed,
    /// The network, not the engine, got in the way
    Environmental(ScenarioError),
    /// The engine broke a contract
    Failed(ScenarioError),
}

impl Verdict {
    fn from_result(result: Result<(), ScenarioError>) -> Self {
        match result {
            Ok(()) => Self::Passed,
            Err(err) if err.is_environmental() => Self::Environmental(err),
            Err(err) => Self::Failed(err),
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Default)]
pub struct SuiteSummary {
    /// Verdict per scenario, in run order
    pub verdicts: Vec<(&'static str, Verdict)>,
    /// Names asked for that the catalogue does not know
    pub unknown: Vec<String>,
}

impl SuiteSummary {
    /// Scenarios that failed for reasons other than the network.
    pub fn failures(&self) -> usize {
        self.verdicts.iter().filter(|(_, v)| matches!(v, Verdict::Failed(_))).count()
    }

    /// Scenarios that passed.
    pub fn passed(&self) -> usize {
        self.verdicts.iter().filter(|(_, v)| matches!(v, Verdict::Passed)).count()
    }

    /// Whether the run should exit successfully.
    pub fn is_success(&self) -> bool {
        self.failures() == 0 && self.unknown.is_empty()
    }
}

/// Catalogue names to run: all of them, or the subset in `only`.
///
/// Keeps catalogue order. Names in `only` that are not in the catalogue are
/// returned separately.
pub fn select(only: &[String]) -> (Vec<&'static str>, Vec<String>) {
    if only.is_empty() {
        return (scenario::scenario_names().collect(), Vec::new());
    }
    let selected = scenario::scenario_names().filter(|name| only.iter().any(|o| o == name)).collect();
    let unknown = only
        .iter()
        .filter(|o| !scenario::scenario_names().any(|name| name == o.as_str()))
        .cloned()
        .collect();
    (selected, unknown)
}

fn network(settings: &Settings) -> SimNetwork {
    if settings.is_seeded() {
        SimNetwork::new(settings.sim.clone())
    } else {
        SimNetwork::with_env(settings.sim.clone(), Arc::new(SystemEnv::new()))
    }
}

/// Run `names` in order and log coverage over all of them.
pub fn run(settings: &Settings, names: &[&'static str], log: &CoverageLog) -> SuiteSummary {
    let mut summary = SuiteSummary::default();

    for &name in names {
        let network = network(settings);
        let mut config = settings.harness.clone();
        if config.nodes.is_empty() {
            config.nodes = network.node_list();
        }

        let mut fx = SessionFixture::new(Arc::new(network), config).with_coverage_log(log.clone());
        let Some(result) = scenario::run(name, &mut fx) else {
            summary.unknown.push(name.to_owned());
            continue;
        };
        let report = fx.teardown();
        if report.blocked > 0 {
            tracing::warn!(scenario = name, blocked = report.blocked, skipped = report.skipped, "drivers left running");
        }

        let verdict = Verdict::from_result(result);
        match &verdict {
            Verdict::Passed => tracing::info!(scenario = name, "passed"),
            Verdict::Environmental(err) => {
                tracing::warn!(scenario = name, error = %err, "inconclusive, network trouble");
            },
            Verdict::Failed(err) => tracing::error!(scenario = name, error = %err, "FAILED"),
        }
        summary.verdicts.push((name, verdict));
    }

    CoverageReport::compute(log).log();
    summary
}
