use proptest::prelude::*;

/// Random DAG over `n` nodes: node `i` may depend on any node `j < i`
pub fn layered_dag_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2usize..=8).prop_flat_map(|n| {
        (0..n)
            .map(|i| {
                if i == 0 {
                    Just(Vec::new()).boxed()
                } else {
                    prop::sample::subsequence((0..i).collect::<Vec<_>>(), 0..=i).boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

/// A DAG plus a seed used to pick among eligible nodes when finishing
pub fn dag_with_finish_order_strategy() -> impl Strategy<Value = (Vec<Vec<usize>>, Vec<usize>)> {
    layered_dag_strategy().prop_flat_map(|dag| {
        let n = dag.len();
        (Just(dag), prop::collection::vec(0usize..n, n))
    })
}
