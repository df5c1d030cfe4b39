use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::time::sleep;

use flowkit::{combine, combine3, flow, from_values, just, merge, zip, FlowError};

#[test]
fn test_zip_pairs_in_lock_step() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let sums = zip(
            from_values(vec![1, 2, 3]),
            from_values(vec![10, 20, 30]),
            |a, b| a + b,
        )
        .try_collect()
        .await
        .unwrap();
        assert_eq!(sums, vec![11, 22, 33]);
    });
}

#[test]
fn test_zip_stops_at_shorter_without_overconsuming() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let pulled = Arc::new(AtomicUsize::new(0));
        let pulled_in = Arc::clone(&pulled);
        let longer = from_values(vec![10, 20, 30, 40])
            .on_each(move |_| {
                pulled_in.fetch_add(1, Ordering::SeqCst);
            });

        let pairs = from_values(vec![1, 2, 3])
            .zip_with(longer, |a, b| (a, b))
            .try_collect()
            .await
            .unwrap();

        assert_eq!(pairs, vec![(1, 10), (2, 20), (3, 30)]);
        // The fourth value of the longer source was never pulled.
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
    });
}

#[test]
fn test_zip_propagates_failure() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let failing = flow(|emitter| async move {
            emitter.emit(1).await?;
            Err(FlowError::producer("left broke"))
        });
        let result = zip(failing, from_values(vec![10, 20]), |a, b| a + b)
            .try_collect()
            .await;
        assert_eq!(result, Err(FlowError::Producer("left broke".to_string())));
    });
}

#[test]
fn test_merge_emits_everything_and_completes_after_both() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let slow = flow(|emitter| async move {
            for v in [1, 2, 3] {
                sleep(Duration::from_millis(10)).await;
                emitter.emit(v).await?;
            }
            Ok(())
        });
        let fast = from_values(vec![100, 200]);

        let mut merged = merge(vec![slow, fast]).try_collect().await.unwrap();
        merged.sort();
        assert_eq!(merged, vec![1, 2, 3, 100, 200]);
    });
}

#[test]
fn test_merge_failure_cancels_other_sources() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_in = Arc::clone(&stopped);
        let endless = flow(move |emitter| {
            let stopped = Arc::clone(&stopped_in);
            async move {
                let mut n = 0u64;
                loop {
                    if emitter.emit(n).await.is_err() {
                        stopped.store(true, Ordering::SeqCst);
                        break;
                    }
                    n += 1;
                    sleep(Duration::from_millis(5)).await;
                }
                Ok(())
            }
        });
        let failing = flow(|emitter| async move {
            emitter.emit(1u64).await?;
            sleep(Duration::from_millis(20)).await;
            Err(FlowError::producer("merge input broke"))
        });

        let result = endless.merge_with(failing).try_collect().await;
        assert_eq!(
            result,
            Err(FlowError::Producer("merge input broke".to_string()))
        );

        // The surviving producer is cancelled at its next emit.
        sleep(Duration::from_millis(100)).await;
        assert!(stopped.load(Ordering::SeqCst));
    });
}

#[test]
fn test_combine_waits_for_both_then_tracks_latest() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let single = just(1);
        let pair = flow(|emitter| async move {
            sleep(Duration::from_millis(20)).await;
            emitter.emit(10).await?;
            sleep(Duration::from_millis(20)).await;
            emitter.emit(20).await?;
            Ok(())
        });

        let result = combine(single, pair, |a, b| a + b).try_collect().await.unwrap();
        assert_eq!(result, vec![11, 21]);
    });
}

#[test]
fn test_combine_conflates_a_fast_source() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let burst = from_values((1..=100).collect::<Vec<i32>>());
        let late = flow(|emitter| async move {
            sleep(Duration::from_millis(50)).await;
            emitter.emit(1000).await?;
            Ok(())
        });

        let result = combine(burst, late, |a, b| a + b).try_collect().await.unwrap();
        // By the time the late source emits, the burst has completed and its
        // slot holds the final value.
        assert_eq!(result, vec![1100]);
    });
}

#[test]
fn test_combine3() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let result = combine3(just(1), just(20), just(300), |a, b, c| a + b + c)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(result.last(), Some(&321));
    });
}

#[test]
fn test_flat_map_concat_preserves_order() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let result = from_values(vec![1, 2])
            .flat_map_concat(|v| from_values(vec![v * 10, v * 10 + 1]))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(result, vec![10, 11, 20, 21]);
    });
}

#[test]
fn test_flat_map_merge_respects_concurrency_limit() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let active_in = Arc::clone(&active);
        let max_in = Arc::clone(&max_active);
        let mut result = from_values(vec![1, 2, 3, 4])
            .flat_map_merge(Some(2), move |v| {
                let active = Arc::clone(&active_in);
                let max_active = Arc::clone(&max_in);
                flow(move |emitter| {
                    let active = Arc::clone(&active);
                    let max_active = Arc::clone(&max_active);
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(30)).await;
                        emitter.emit(v * 10).await?;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
            })
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        result.sort();
        assert_eq!(result, vec![10, 20, 30, 40]);
        assert!(max_active.load(Ordering::SeqCst) <= 2);
    });
}

#[test]
fn test_flat_map_merge_unbounded_runs_all_inners_at_once() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let active_in = Arc::clone(&active);
        let max_in = Arc::clone(&max_active);
        let result = from_values(vec![1, 2, 3, 4])
            .flat_map_merge(None, move |v| {
                let active = Arc::clone(&active_in);
                let max_active = Arc::clone(&max_in);
                flow(move |emitter| {
                    let active = Arc::clone(&active);
                    let max_active = Arc::clone(&max_active);
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(100)).await;
                        emitter.emit(v).await?;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
            })
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(result.len(), 4);
        assert_eq!(max_active.load(Ordering::SeqCst), 4);
    });
}

#[test]
fn test_flat_map_merge_zero_limit_is_config_error() {
    // A zero-slot merge could never start an inner flow; it must be rejected
    // at construction instead of hanging at the first admission.
    let result = from_values(vec![1, 2]).flat_map_merge(Some(0), just);
    assert!(matches!(result, Err(FlowError::Config(_))));
}

#[test]
fn test_flat_map_latest_keeps_only_the_last_inner() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let completed_inners = Arc::new(AtomicUsize::new(0));

        let completed_in = Arc::clone(&completed_inners);
        let result = from_values(vec![1, 2, 3])
            .flat_map_latest(move |v| {
                let completed = Arc::clone(&completed_in);
                flow(move |emitter| {
                    let completed = Arc::clone(&completed);
                    async move {
                        sleep(Duration::from_millis(30)).await;
                        emitter.emit(v * 10).await?;
                        emitter.emit(v * 10 + 1).await?;
                        completed.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
            })
            .try_collect()
            .await
            .unwrap();

        // Inner flows for 1 and 2 were cancelled during their initial sleep.
        assert_eq!(result, vec![30, 31]);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(completed_inners.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn test_flat_map_concat_outer_failure_stops_everything() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let outer = flow(|emitter| async move {
            emitter.emit(1).await?;
            Err(FlowError::producer("outer broke"))
        });
        let result = outer
            .flat_map_concat(|v| from_values(vec![v]))
            .try_collect()
            .await;
        assert_eq!(result, Err(FlowError::Producer("outer broke".to_string())));
    });
}
