use flowkit::{empty, flow, fold, from_iter, from_values, reduce, FlowError};

#[test]
fn test_reduce_sums_values() {
    tokio_test::block_on(async {
        let total = reduce(from_iter(1..=4), |a, b| async move { a + b }).await;
        assert_eq!(total, Ok(10));
    });
}

#[test]
fn test_reduce_on_empty_flow_fails() {
    tokio_test::block_on(async {
        let result = reduce(empty::<i32>(), |a, b| async move { a + b }).await;
        assert_eq!(result, Err(FlowError::EmptySource));
    });
}

#[test]
fn test_fold_uses_the_seed() {
    tokio_test::block_on(async {
        let total = fold(from_values(vec![1, 2, 3]), 100, |acc, v| async move {
            acc + v
        })
        .await;
        assert_eq!(total, Ok(106));
    });
}

#[test]
fn test_fold_on_empty_flow_returns_seed() {
    tokio_test::block_on(async {
        let result = empty::<i32>().fold(42, |acc, v| async move { acc + v }).await;
        assert_eq!(result, Ok(42));
    });
}

#[test]
fn test_scan_emits_running_accumulation() {
    tokio_test::block_on(async {
        // The seed itself is not emitted; the first output folds it with the
        // first value.
        let running = from_values(vec![1, 2, 3])
            .scan(0, |acc, v| acc + v)
            .try_collect()
            .await;
        assert_eq!(running, Ok(vec![1, 3, 6]));
    });
}

#[test]
fn test_scan_on_empty_flow_emits_nothing() {
    tokio_test::block_on(async {
        let result = empty::<i32>().scan(0, |acc, v| acc + v).try_collect().await;
        assert_eq!(result, Ok(vec![]));
    });
}

#[test]
fn test_scan_mirrors_source_failure() {
    tokio_test::block_on(async {
        let failing = flow(|emitter| async move {
            emitter.emit(1).await?;
            emitter.emit(2).await?;
            Err(FlowError::producer("boom"))
        });
        let result = failing.scan(0, |acc, v| acc + v).try_collect().await;
        assert_eq!(result, Err(FlowError::Producer("boom".to_string())));
    });
}

#[test]
fn test_reduce_propagates_source_failure() {
    tokio_test::block_on(async {
        let failing = flow(|emitter| async move {
            emitter.emit(1).await?;
            Err(FlowError::producer("boom"))
        });
        let result = failing.reduce(|a, b| async move { a + b }).await;
        assert_eq!(result, Err(FlowError::Producer("boom".to_string())));
    });
}
