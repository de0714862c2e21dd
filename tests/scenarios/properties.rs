//! Property tests: random stage graphs always terminate with consistent states

use crate::helpers::*;
use proptest::prelude::*;
use stagerun::execution::SchedulingStrategy;
use stagerun::{ExecutionStatus, StageState};

const MAX_STAGES: usize = 8;

/// Stage `s{i}` needs `s{j}` (j < i) when the edge bit is set
fn workflow_yaml(n: usize, edges: &[bool]) -> String {
    let mut yaml = String::from("name: \"random\"\nstages:\n");
    for i in 0..n {
        let needs: Vec<String> = (0..i)
            .filter(|&j| edges[i * (i - 1) / 2 + j])
            .map(|j| format!("s{}", j))
            .collect();
        yaml.push_str(&format!("  - {{ id: s{}, uses: command, needs: [{}] }}\n", i, needs.join(", ")));
    }
    yaml
}

fn needs_of(i: usize, edges: &[bool]) -> Vec<usize> {
    (0..i).filter(|&j| edges[i * (i - 1) / 2 + j]).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_random_graph_reaches_consistent_terminal_state(
        n in 1usize..=MAX_STAGES,
        edges in proptest::collection::vec(any::<bool>(), MAX_STAGES * (MAX_STAGES - 1) / 2),
        failing in proptest::collection::vec(any::<bool>(), MAX_STAGES),
        limit in 0usize..4,
    ) {
        let yaml = workflow_yaml(n, &edges);
        let mut mock = MockInvoker::new();
        for (i, fails) in failing.iter().enumerate().take(n) {
            if *fails {
                mock = mock.on(&format!("s{}", i), Behavior::fail("boom"));
            }
        }
        let strategy = match limit {
            0 => SchedulingStrategy::Parallel,
            k => SchedulingStrategy::LimitedParallel(k),
        };

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let result = runtime.block_on(run_workflow_with(
            &yaml,
            mock.clone(),
            RunOptions { strategy, ..RunOptions::default() },
        ));

        // Index order is a topological order, so expectations can be folded forward
        let mut succeeded = vec![false; n];
        let mut any_failed = false;
        for i in 0..n {
            let id = format!("s{}", i);
            let ready = needs_of(i, &edges).iter().all(|&j| succeeded[j]);
            let state = result.state(&id);
            prop_assert!(state.is_terminal(), "{} not terminal: {:?}", id, state);

            if !ready {
                prop_assert!(matches!(state, StageState::Skipped { .. }), "{} should be skipped: {:?}", id, state);
                prop_assert!(mock.calls_for(&id).is_empty());
            } else if failing[i] {
                prop_assert!(matches!(state, StageState::Failed { .. }), "{} should fail: {:?}", id, state);
                any_failed = true;
            } else {
                prop_assert!(state.is_succeeded(), "{} should succeed: {:?}", id, state);
                succeeded[i] = true;
            }
        }

        let expected = if any_failed { ExecutionStatus::Failed } else { ExecutionStatus::Succeeded };
        prop_assert_eq!(result.status, expected);
        if limit > 0 {
            prop_assert!(mock.peak_concurrency() <= limit);
        }
    }
}
