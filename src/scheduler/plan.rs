use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use crate::flow_config::{MAX_WORKERS, MIN_WORKERS, PipelineConfig};
use crate::stage::StageId;

/// Scheduling knobs taken from the pipeline configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pool size for the parallel group
    pub workers: usize,
    /// Run the parallel group concurrently
    pub parallel: bool,
    pub parallel_group: RangeInclusive<StageId>,
    pub quality_gate_stage: StageId,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_pipeline(&PipelineConfig::default())
    }
}

impl SchedulerConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            workers: config.workers,
            parallel: config.parallel,
            parallel_group: config.parallel_group.clone(),
            quality_gate_stage: config.quality_gate_stage,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(MIN_WORKERS, MAX_WORKERS);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// One unit of scheduling work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Serial(StageId),
    /// Pending parallel-group members, ascending
    Group(Vec<StageId>),
}

/// Split the lane's pending stages into serial steps and at most one group step.
pub fn plan_steps(
    lane_stages: &[StageId],
    completed: &BTreeSet<StageId>,
    config: &SchedulerConfig,
) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut group = Vec::new();
    for &stage in lane_stages.iter().filter(|s| !completed.contains(s)) {
        if config.parallel && config.parallel_group.contains(&stage) {
            group.push(stage);
            continue;
        }
        flush_group(&mut group, &mut steps);
        steps.push(Step::Serial(stage));
    }
    flush_group(&mut group, &mut steps);
    steps
}

fn flush_group(group: &mut Vec<StageId>, steps: &mut Vec<Step>) {
    match group.len() {
        0 => {}
        1 => steps.push(Step::Serial(group[0])),
        _ => steps.push(Step::Group(std::mem::take(group))),
    }
    group.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> Vec<StageId> {
        StageId::all().collect()
    }

    #[test]
    fn test_default_plan_groups_spec_through_test_plan() {
        let steps = plan_steps(&all(), &BTreeSet::new(), &SchedulerConfig::default());
        assert_eq!(
            steps,
            vec![
                Step::Serial(StageId::PROPOSAL),
                Step::Group(vec![StageId::SPEC, StageId::TASKS, StageId::TEST_PLAN]),
                Step::Serial(StageId::IMPLEMENT),
                Step::Serial(StageId::TEST),
                Step::Serial(StageId::DOC_SYNC),
                Step::Serial(StageId::VERSION_CONTROL),
                Step::Serial(StageId::ARCHIVE),
            ]
        );
    }

    #[test]
    fn test_no_parallel_runs_everything_serially() {
        let config = SchedulerConfig::default().with_parallel(false);
        let steps = plan_steps(&all(), &BTreeSet::new(), &config);
        assert_eq!(steps.len(), 9);
        assert!(steps.iter().all(|s| matches!(s, Step::Serial(_))));
    }

    #[test]
    fn test_lone_group_member_is_serial() {
        // the light lane only contains `tasks` from the group
        let light = vec![
            StageId::PROPOSAL,
            StageId::TASKS,
            StageId::IMPLEMENT,
            StageId::TEST,
        ];
        let steps = plan_steps(&light, &BTreeSet::new(), &SchedulerConfig::default());
        assert_eq!(steps[1], Step::Serial(StageId::TASKS));
    }

    #[test]
    fn test_completed_stages_are_skipped() {
        let completed: BTreeSet<StageId> =
            [StageId::PROPOSAL, StageId::SPEC].into_iter().collect();
        let steps = plan_steps(&all(), &completed, &SchedulerConfig::default());
        assert_eq!(
            steps[0],
            Step::Group(vec![StageId::TASKS, StageId::TEST_PLAN])
        );
    }

    #[test]
    fn test_with_workers_clamps() {
        assert_eq!(SchedulerConfig::default().with_workers(0).workers, 1);
        assert_eq!(SchedulerConfig::default().with_workers(64).workers, 8);
    }
}
