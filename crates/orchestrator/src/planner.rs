//! Execution planner: candidate set to staged execution plan.
//!
//! Planning is a pure function of the candidate set and the configuration.
//! Candidates are first put in a topological order (ties broken by
//! priority, then id), then packed greedily into stages so that no stage
//! holds two workflows sharing a conflict key and every dependency lives in
//! a strictly earlier stage.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use dispatch_core::{Candidate, CandidateSet, DispatchConfig, ExecutionPlan, Stage};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};

const PLAN_ID_PREFIX: &str = "plan-";
const PLAN_ID_HEX_LEN: usize = 16;

pub struct Planner {
    config: DispatchConfig,
}

impl Planner {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Build the execution plan for one trigger.
    ///
    /// Fails with [`OrchestratorError::CyclicDependency`] without producing
    /// any partial plan when the dependency graph has a cycle.
    pub fn plan(&self, trigger_id: &str, candidates: &CandidateSet) -> Result<ExecutionPlan> {
        self.config
            .validate()
            .map_err(|e| OrchestratorError::InvalidConfig(e.to_string()))?;

        let order = topological_order(candidates)?;
        let groups = self.group_into_stages(&order);
        let stages = self.split_oversized(groups);

        let plan_id = plan_id(trigger_id, &stages);
        let plan = ExecutionPlan::new(
            plan_id,
            stages,
            self.config.overall_timeout_seconds,
            self.config.allow_partial_success(),
            self.config.preview_only,
        );

        info!(
            plan_id = %plan.plan_id(),
            trigger_id = %trigger_id,
            stage_count = plan.stage_count(),
            workflow_count = plan.workflow_count(),
            "Execution plan built"
        );
        for stage in plan.stages() {
            debug!(
                plan_id = %plan.plan_id(),
                stage = stage.index(),
                run_mode = stage.run_mode().as_str(),
                workflows = ?stage.workflow_ids(),
                blocking_conflicts = ?stage.blocking_conflicts(),
                "Planned stage"
            );
        }

        Ok(plan)
    }

    /// Greedy walk over the topological order. A candidate joins the open
    /// stage only if all its dependencies sit in earlier stages and it shares
    /// no conflict key with anything already there.
    fn group_into_stages<'a>(&self, order: &[&'a Candidate]) -> Vec<Vec<&'a Candidate>> {
        let mut groups: Vec<Vec<&'a Candidate>> = Vec::new();
        let mut stage_of: HashMap<&str, usize> = HashMap::new();

        for &candidate in order {
            let joins_open = match groups.last() {
                Some(open) if self.config.allow_parallel_stages => {
                    let open_index = groups.len() - 1;
                    let deps_earlier = candidate.dependencies.iter().all(|dep| {
                        stage_of
                            .get(dep.as_str())
                            .is_some_and(|&stage| stage < open_index)
                    });
                    let conflict_free = open.iter().all(|member| !member.conflicts_with(candidate));
                    deps_earlier && conflict_free
                }
                _ => false,
            };

            if !joins_open {
                groups.push(Vec::new());
            }
            let index = groups.len() - 1;
            groups[index].push(candidate);
            stage_of.insert(candidate.id.as_str(), index);
        }

        groups
    }

    /// Split groups larger than `max_parallel_workflows` into consecutive
    /// sub-stages, keeping relative order, and number the result.
    fn split_oversized(&self, groups: Vec<Vec<&Candidate>>) -> Vec<Stage> {
        let max = self.config.max_parallel_workflows.max(1);
        let mut stages = Vec::with_capacity(groups.len());

        for group in groups {
            for chunk in group.chunks(max) {
                let workflow_ids = chunk.iter().map(|c| c.id.clone()).collect();
                let conflicts = chunk
                    .iter()
                    .flat_map(|c| c.conflict_keys.iter().cloned())
                    .collect();
                stages.push(Stage::new(stages.len(), workflow_ids, conflicts));
            }
        }

        stages
    }
}

/// Kahn's algorithm with a `(priority, id)`-ordered ready set.
fn topological_order(candidates: &CandidateSet) -> Result<Vec<&Candidate>> {
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: HashMap<&str, Vec<&Candidate>> = HashMap::new();

    for candidate in candidates.iter() {
        pending.insert(candidate.id.as_str(), candidate.dependencies.len());
        for dep in &candidate.dependencies {
            dependents.entry(dep.as_str()).or_default().push(candidate);
        }
    }

    let mut ready: BTreeSet<(i32, &str)> = candidates
        .iter()
        .filter(|c| c.dependencies.is_empty())
        .map(Candidate::sort_key)
        .collect();

    let mut order = Vec::with_capacity(candidates.len());
    while let Some(key) = ready.pop_first() {
        let (_, id) = key;
        pending.remove(id);
        if let Some(candidate) = candidates.get(id) {
            order.push(candidate);
        }

        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(remaining) = pending.get_mut(dependent.id.as_str()) {
                *remaining -= 1;
                if *remaining == 0 {
                    ready.insert(dependent.sort_key());
                }
            }
        }
    }

    if !pending.is_empty() {
        let cycle = find_cycle(candidates, &pending);
        return Err(OrchestratorError::CyclicDependency { cycle });
    }

    Ok(order)
}

/// Every unplaced candidate still waits on another unplaced one, so walking
/// dependency edges inside that set must revisit a node. The revisited
/// segment is the cycle.
fn find_cycle(candidates: &CandidateSet, unplaced: &BTreeMap<&str, usize>) -> Vec<String> {
    let Some((&start, _)) = unplaced.iter().next() else {
        return Vec::new();
    };

    let mut path: Vec<&str> = Vec::new();
    let mut current = start;
    loop {
        if let Some(pos) = path.iter().position(|&id| id == current) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|id| id.to_string()).collect();
            cycle.sort();
            return cycle;
        }
        path.push(current);

        let next = candidates.get(current).and_then(|c| {
            c.dependencies
                .iter()
                .map(String::as_str)
                .find(|dep| unplaced.contains_key(dep))
        });
        match next {
            Some(next) => current = next,
            None => {
                let mut rest: Vec<String> = unplaced.keys().map(|id| id.to_string()).collect();
                rest.sort();
                return rest;
            }
        }
    }
}

/// Deterministic plan id: identical trigger and stage layout give the same id.
fn plan_id(trigger_id: &str, stages: &[Stage]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(trigger_id.as_bytes());
    for stage in stages {
        hasher.update(
            format!(
                "\n{}:{}:{}:{}",
                stage.index(),
                stage.run_mode().as_str(),
                stage.workflow_ids().join(","),
                stage.blocking_conflicts().join(",")
            )
            .as_bytes(),
        );
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("{}{}", PLAN_ID_PREFIX, &digest[..PLAN_ID_HEX_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::RunMode;

    const WEEKLY: &str = "deliverable:weekly-report";

    fn planner() -> Planner {
        Planner::new(DispatchConfig::multi_workflow())
    }

    fn set(candidates: Vec<Candidate>) -> CandidateSet {
        CandidateSet::new(candidates).unwrap()
    }

    fn layout(plan: &ExecutionPlan) -> Vec<(RunMode, Vec<String>)> {
        plan.stages()
            .iter()
            .map(|s| (s.run_mode(), s.workflow_ids().to_vec()))
            .collect()
    }

    fn weekly_report_candidates() -> Vec<Candidate> {
        vec![
            Candidate::new("compliance-advisory", 1).with_conflict_key(WEEKLY),
            Candidate::new("policy-overview", 1),
            Candidate::new("enforcement-snapshot", 2)
                .with_dependency("compliance-advisory")
                .with_conflict_key(WEEKLY),
        ]
    }

    #[test]
    fn test_weekly_report_layout() {
        let plan = planner()
            .plan("issue-17", &set(weekly_report_candidates()))
            .unwrap();

        assert_eq!(
            layout(&plan),
            vec![
                (
                    RunMode::Parallel,
                    vec!["compliance-advisory".to_string(), "policy-overview".to_string()]
                ),
                (RunMode::Sequential, vec!["enforcement-snapshot".to_string()]),
            ]
        );
        assert_eq!(plan.stages()[0].blocking_conflicts(), &[WEEKLY.to_string()][..]);
    }

    #[test]
    fn test_plan_independent_of_input_order() {
        let mut reversed = weekly_report_candidates();
        reversed.reverse();

        let a = planner().plan("issue-17", &set(weekly_report_candidates())).unwrap();
        let b = planner().plan("issue-17", &set(reversed)).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.plan_id(), b.plan_id());
    }

    #[test]
    fn test_plan_id_depends_on_trigger() {
        let a = planner().plan("issue-1", &set(weekly_report_candidates())).unwrap();
        let b = planner().plan("issue-2", &set(weekly_report_candidates())).unwrap();

        assert_ne!(a.plan_id(), b.plan_id());
        assert!(a.plan_id().starts_with("plan-"));
        assert_eq!(a.plan_id().len(), PLAN_ID_PREFIX.len() + PLAN_ID_HEX_LEN);
    }

    #[test]
    fn test_two_node_cycle() {
        let result = planner().plan(
            "t",
            &set(vec![
                Candidate::new("A", 0).with_dependency("B"),
                Candidate::new("B", 0).with_dependency("A"),
            ]),
        );

        match result {
            Err(OrchestratorError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["A".to_string(), "B".to_string()]);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_excludes_downstream_nodes() {
        let result = planner().plan(
            "t",
            &set(vec![
                Candidate::new("a", 0),
                Candidate::new("b", 0).with_dependency("c").with_dependency("a"),
                Candidate::new("c", 0).with_dependency("b"),
                Candidate::new("d", 0).with_dependency("c"),
            ]),
        );

        match result {
            Err(OrchestratorError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["b".to_string(), "c".to_string()]);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let result = planner().plan("t", &set(vec![Candidate::new("loop", 0).with_dependency("loop")]));
        assert!(matches!(result, Err(OrchestratorError::CyclicDependency { .. })));
    }

    #[test]
    fn test_priority_orders_ready_candidates() {
        let plan = Planner::new(DispatchConfig::multi_workflow().with_parallel_stages(false))
            .plan(
                "t",
                &set(vec![
                    Candidate::new("b", 5),
                    Candidate::new("a", 5),
                    Candidate::new("z", 1),
                ]),
            )
            .unwrap();

        let order: Vec<_> = plan.workflow_ids().collect();
        assert_eq!(order, vec!["z", "a", "b"]);
        assert!(plan
            .stages()
            .iter()
            .all(|s| s.run_mode() == RunMode::Sequential && s.len() == 1));
    }

    #[test]
    fn test_oversized_stage_is_split() {
        let candidates = (0..7).map(|i| Candidate::new(format!("wf-{}", i), 0)).collect();
        let plan = Planner::new(DispatchConfig::multi_workflow().with_max_parallel(3))
            .plan("t", &set(candidates))
            .unwrap();

        let sizes: Vec<_> = plan.stages().iter().map(Stage::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(plan.stages()[2].run_mode(), RunMode::Sequential);
        assert_eq!(
            plan.workflow_ids().collect::<Vec<_>>(),
            vec!["wf-0", "wf-1", "wf-2", "wf-3", "wf-4", "wf-5", "wf-6"]
        );
        let indexes: Vec<_> = plan.stages().iter().map(Stage::index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn test_single_candidate_is_one_sequential_stage() {
        let plan = planner().plan("t", &set(vec![Candidate::new("solo", 0)])).unwrap();
        assert_eq!(plan.stage_count(), 1);
        assert_eq!(plan.workflow_count(), 1);
        assert_eq!(plan.stages()[0].run_mode(), RunMode::Sequential);
    }

    #[test]
    fn test_empty_set_gives_empty_plan() {
        let plan = planner().plan("t", &CandidateSet::default()).unwrap();
        assert_eq!(plan.stage_count(), 0);
        assert_eq!(plan.workflow_count(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Planner::new(DispatchConfig::multi_workflow().with_max_parallel(0))
            .plan("t", &set(vec![Candidate::new("a", 0)]));
        assert!(matches!(result, Err(OrchestratorError::InvalidConfig(_))));
    }

    #[test]
    fn test_plan_carries_config_flags() {
        let config = DispatchConfig::multi_workflow()
            .with_stop_on_first_failure(true)
            .with_preview_only(true)
            .with_overall_timeout(120);
        let plan = Planner::new(config).plan("t", &set(vec![Candidate::new("a", 0)])).unwrap();

        assert!(!plan.allow_partial_success());
        assert!(plan.preview_only());
        assert_eq!(plan.overall_timeout_seconds(), Some(120));
    }

    /// Small deterministic generator so the property checks below need no
    /// extra dependency.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u64) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 33) % bound
        }
    }

    fn random_dag(rng: &mut Lcg, size: usize) -> Vec<Candidate> {
        let keys = ["k:a", "k:b", "k:c", "k:d"];
        (0..size)
            .map(|i| {
                let mut candidate = Candidate::new(format!("wf-{:02}", i), rng.next(4) as i32);
                for _ in 0..rng.next(3) {
                    candidate = candidate.with_conflict_key(keys[rng.next(4) as usize]);
                }
                if i > 0 {
                    for _ in 0..rng.next(3) {
                        candidate = candidate.with_dependency(format!("wf-{:02}", rng.next(i as u64)));
                    }
                }
                candidate
            })
            .collect()
    }

    #[test]
    fn test_generated_plans_hold_invariants() {
        let mut rng = Lcg(42);
        for round in 0..60 {
            let max_parallel = 1 + rng.next(4) as usize;
            let candidates = random_dag(&mut rng, 2 + round % 12);
            let planner = Planner::new(DispatchConfig::multi_workflow().with_max_parallel(max_parallel));

            let plan = planner.plan("prop", &set(candidates.clone())).unwrap();

            let mut shuffled = candidates.clone();
            shuffled.rotate_left(round % candidates.len());
            shuffled.reverse();
            assert_eq!(plan, planner.plan("prop", &set(shuffled)).unwrap());

            let lookup = set(candidates);
            for stage in plan.stages() {
                assert!(stage.len() <= max_parallel);
                assert_eq!(stage.run_mode(), RunMode::for_len(stage.len()));

                for (i, a) in stage.workflow_ids().iter().enumerate() {
                    let a = lookup.get(a).unwrap();
                    for b in &stage.workflow_ids()[i + 1..] {
                        assert!(!a.conflicts_with(lookup.get(b).unwrap()));
                    }
                    for dep in &a.dependencies {
                        assert!(plan.stage_of(dep).unwrap() < stage.index());
                    }
                }
            }
            assert_eq!(plan.workflow_count(), lookup.len());
        }
    }
}
