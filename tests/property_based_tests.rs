//! Property-based checks of the completion cascade over random DAGs.

mod common;

use common::strategies::dag_with_finish_order_strategy;
use common::*;
use proptest::prelude::*;
use rfm_jobs::constants::TaskStatus;
use rfm_jobs::models::{JobTask, JobTaskDependency};
use rfm_jobs::orchestration::PlanningContext;
use std::collections::BTreeSet;

/// Finish every task of `dag`, always picking among eligible tasks by `picks`.
///
/// Returns the order in which tasks were finished.
async fn finish_all(dag: &[Vec<usize>], picks: &[usize]) -> Vec<usize> {
    let pool = test_pool().await;
    register_test_task_types(&pool).await;
    let job = create_job(&pool, "test.property").await;

    let mut ctx = PlanningContext::begin(&pool, job.clone(), 0).await.unwrap();
    let mut ids = Vec::with_capacity(dag.len());
    for (node, deps) in dag.iter().enumerate() {
        let dep_ids: Vec<i64> = deps.iter().map(|d| ids[*d]).collect();
        ids.push(ctx.add_task(node as i64, OK_TASK, &dep_ids, Vec::new()).await.unwrap());
    }
    ctx.commit().await.unwrap();

    let mut finished = BTreeSet::new();
    let mut order = Vec::new();
    for round in 0..dag.len() {
        let eligible = JobTask::find_eligible(&pool, job.job_id).await.unwrap();

        // Counters always equal the number of unfinished dependencies
        for t in JobTask::find_by_job(&pool, job.job_id).await.unwrap() {
            let node = ids.iter().position(|id| *id == t.task_id).unwrap();
            let open = dag[node].iter().filter(|d| !finished.contains(*d)).count();
            assert_eq!(t.dependency_counter, open as i64);
            let unsatisfied = JobTaskDependency::find_for_task(&pool, t.task_id)
                .await
                .unwrap()
                .iter()
                .filter(|edge| !edge.satisfied)
                .count();
            assert_eq!(t.dependency_counter, unsatisfied as i64);
        }

        assert!(!eligible.is_empty(), "a DAG always has an eligible task");
        let pick = &eligible[picks[round] % eligible.len()];
        let node = ids.iter().position(|id| *id == pick.task_id).unwrap();

        let released = JobTask::finish(&pool, pick.task_id, "").await.unwrap();
        finished.insert(node);
        order.push(node);

        for released_id in released {
            let released_node = ids.iter().position(|id| *id == released_id).unwrap();
            assert!(dag[released_node].contains(&node));
            assert!(dag[released_node].iter().all(|d| finished.contains(d)));
        }
    }

    let summary = JobTask::status_summary(&pool, job.job_id).await.unwrap();
    assert!(summary.all_completed());
    assert!(JobTask::find_by_status(&pool, job.job_id, TaskStatus::Waiting)
        .await
        .unwrap()
        .is_empty());
    order
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_any_eligible_finish_order_completes_the_graph(
        (dag, picks) in dag_with_finish_order_strategy()
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let order = runtime.block_on(finish_all(&dag, &picks));

        prop_assert_eq!(order.len(), dag.len());
        // Every node finishes after all of its dependencies
        for (position, node) in order.iter().enumerate() {
            for dep in &dag[*node] {
                prop_assert!(order[..position].contains(dep));
            }
        }
    }
}
