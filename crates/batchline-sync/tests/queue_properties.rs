// Purpose: Concurrency properties of the bounded queue and cycle barrier
// under real multi-threaded producer and consumer pools.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use batchline_sync::{
    shared_barrier, shared_queue, CancellationToken, SharedBoundedQueue, SyncError, SyncResult,
};
use futures::future::join_all;
use rand::Rng;
use tokio::time::{sleep, timeout};

const PRODUCERS: usize = 4;
const CONSUMERS: usize = 3;
const ITEMS_PER_PRODUCER: usize = 250;

async fn jitter() {
    let micros = rand::thread_rng().gen_range(0..200);
    sleep(Duration::from_micros(micros)).await;
}

// Spawn a task that keeps sampling the queue until told to stop and
// reports the highest resident count it ever saw.
fn spawn_watcher<T: Send + Sync + 'static>(
    queue: SharedBoundedQueue<T>,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<SyncResult<usize>> {
    tokio::spawn(async move {
        let mut highest = 0;
        while !stop.load(Ordering::Relaxed) {
            queue.check_invariants()?;
            highest = highest.max(queue.len());
            tokio::task::yield_now().await;
        }
        Ok(highest)
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_producers_many_consumers_lose_and_duplicate_nothing() -> SyncResult<()> {
    let queue = shared_queue::<usize>(5)?;
    let stop = Arc::new(AtomicBool::new(false));
    let watcher = spawn_watcher(queue.clone(), stop.clone());
    let total = PRODUCERS * ITEMS_PER_PRODUCER;
    let taken = Arc::new(AtomicUsize::new(0));

    let producers = (0..PRODUCERS).map(|p| {
        let queue = queue.clone();
        tokio::spawn(async move {
            for i in 0..ITEMS_PER_PRODUCER {
                queue.enqueue(p * ITEMS_PER_PRODUCER + i).await?;
                jitter().await;
            }
            Ok::<_, SyncError>(())
        })
    });

    let consumers = (0..CONSUMERS).map(|_| {
        let queue = queue.clone();
        let taken = taken.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while taken.fetch_add(1, Ordering::SeqCst) < total {
                seen.push(queue.dequeue().await?);
                jitter().await;
            }
            Ok::<_, SyncError>(seen)
        })
    });

    let (produced, consumed) = timeout(
        Duration::from_secs(20),
        futures::future::join(join_all(producers), join_all(consumers)),
    )
    .await
    .expect("pools did not finish");

    for result in produced {
        result.unwrap()?;
    }
    let mut all = Vec::new();
    for result in consumed {
        all.extend(result.unwrap()?);
    }

    stop.store(true, Ordering::Relaxed);
    let highest = watcher.await.unwrap()?;

    assert!(highest <= 5, "saw {} resident items", highest);
    assert_eq!(all.len(), total);
    let unique: BTreeSet<_> = all.iter().copied().collect();
    assert_eq!(unique.len(), total);
    assert_eq!(unique, (0..total).collect());
    assert!(queue.is_empty());
    assert_eq!(queue.available_capacity(), 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_producer_single_consumer_preserves_order() -> SyncResult<()> {
    let queue = shared_queue::<u32>(3)?;

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            for i in 0..500u32 {
                queue.enqueue(i).await?;
            }
            Ok::<_, SyncError>(())
        })
    };

    let mut received = Vec::with_capacity(500);
    for _ in 0..500 {
        received.push(queue.dequeue().await?);
    }
    producer.await.unwrap()?;

    assert_eq!(received, (0..500).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timed_operations_under_contention_keep_counts_consistent() -> SyncResult<()> {
    let queue = shared_queue::<usize>(2)?;
    let cancel = CancellationToken::new();
    let inserted = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicUsize::new(0));
    let short = Duration::from_millis(2);

    let mut tasks = Vec::new();
    for p in 0..3 {
        let queue = queue.clone();
        let cancel = cancel.clone();
        let inserted = inserted.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..200 {
                match queue.try_enqueue(p * 1000 + i, short, &cancel).await {
                    Ok(()) => {
                        inserted.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) if err.kind().is_timeout() => {}
                    Err(err) => return Err(err.into()),
                }
            }
            Ok::<_, SyncError>(())
        }));
    }
    for _ in 0..2 {
        let queue = queue.clone();
        let cancel = cancel.clone();
        let removed = removed.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..250 {
                match queue.try_dequeue(short, &cancel).await {
                    Ok(_) => {
                        removed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) if err.is_timeout() => {}
                    Err(err) => return Err(err),
                }
            }
            Ok(())
        }));
    }

    for task in join_all(tasks).await {
        task.unwrap()?;
    }

    let inserted = inserted.load(Ordering::SeqCst);
    let removed = removed.load(Ordering::SeqCst);
    assert_eq!(inserted, removed + queue.len());
    assert_eq!(queue.available_items(), queue.len());
    assert_eq!(queue.available_items() + queue.available_capacity(), 2);
    Ok(())
}

#[tokio::test]
async fn test_paused_dequeue_blocks_until_resumed() -> SyncResult<()> {
    let queue = shared_queue::<&'static str>(2)?;
    queue.enqueue("ready").await?;
    queue.pause_dequeue();

    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.dequeue().await })
    };
    sleep(Duration::from_millis(40)).await;
    assert!(!consumer.is_finished());
    assert_eq!(queue.len(), 1);

    // Producers keep going while consumers are paused
    queue.enqueue("second").await?;
    assert_eq!(queue.len(), 2);

    queue.resume_dequeue();
    assert_eq!(consumer.await.unwrap()?, "ready");
    Ok(())
}

#[tokio::test]
async fn test_paused_enqueue_blocks_until_resumed() -> SyncResult<()> {
    let queue = shared_queue::<u8>(4)?;
    queue.pause_enqueue();

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.enqueue(7).await.map_err(SyncError::from) })
    };
    sleep(Duration::from_millis(40)).await;
    assert!(!producer.is_finished());
    assert!(queue.is_empty());

    queue.resume_enqueue();
    producer.await.unwrap()?;
    assert_eq!(queue.dequeue().await?, 7);
    Ok(())
}

#[tokio::test]
async fn test_buffered_items_drain_while_enqueue_paused() -> SyncResult<()> {
    let queue = shared_queue::<u8>(4)?;
    queue.enqueue(1).await?;
    queue.enqueue(2).await?;
    queue.pause_enqueue();

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.enqueue(3).await.map_err(SyncError::from) })
    };

    // Consumers keep going while producers are paused
    assert_eq!(queue.dequeue().await?, 1);
    assert_eq!(queue.dequeue().await?, 2);
    sleep(Duration::from_millis(40)).await;
    assert!(!producer.is_finished());
    assert_eq!(queue.len(), 0);
    assert!(queue
        .try_dequeue(Duration::from_millis(20), &CancellationToken::new())
        .await
        .is_err());
    assert_eq!(queue.len(), 0);

    queue.resume_enqueue();
    producer.await.unwrap()?;
    assert_eq!(queue.dequeue().await?, 3);
    Ok(())
}

// Capacity two, three items: the third producer waits until a consumer
// takes the head, then lands behind the second.
#[tokio::test]
async fn test_third_item_waits_for_space() -> SyncResult<()> {
    let queue = shared_queue::<char>(2)?;
    queue.enqueue('A').await?;
    queue.enqueue('B').await?;

    let third = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.enqueue('C').await.map_err(SyncError::from) })
    };
    sleep(Duration::from_millis(40)).await;
    assert!(!third.is_finished());
    assert_eq!(queue.len(), 2);

    assert_eq!(queue.dequeue().await?, 'A');
    third.await.unwrap()?;
    assert_eq!(queue.dequeue().await?, 'B');
    assert_eq!(queue.dequeue().await?, 'C');
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_barrier_cycles_with_worker_pool() -> SyncResult<()> {
    const WORKERS: usize = 5;
    const CYCLES: usize = 20;

    let barrier = shared_barrier(WORKERS)?;
    let cancel = CancellationToken::new();
    let releases = Arc::new(AtomicUsize::new(0));

    let workers = (0..WORKERS).map(|_| {
        let barrier = barrier.clone();
        let cancel = cancel.clone();
        let releases = releases.clone();
        tokio::spawn(async move {
            for _ in 0..CYCLES {
                jitter().await;
                if barrier.arrive(&cancel).await? {
                    releases.fetch_add(1, Ordering::SeqCst);
                }
            }
            Ok::<_, SyncError>(())
        })
    });

    for worker in timeout(Duration::from_secs(10), join_all(workers))
        .await
        .expect("barrier cycles stalled")
    {
        worker.unwrap()?;
    }

    assert_eq!(releases.load(Ordering::SeqCst), CYCLES);
    assert_eq!(barrier.generation(), CYCLES as u64);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_releases_queue_and_barrier_waiters() -> SyncResult<()> {
    let queue = shared_queue::<u8>(1)?;
    let barrier = shared_barrier(3)?;
    let cancel = CancellationToken::new();

    let consumer = {
        let queue = queue.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.try_dequeue(Duration::from_secs(30), &cancel).await })
    };
    let waiter = {
        let barrier = barrier.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { barrier.arrive(&cancel).await })
    };
    sleep(Duration::from_millis(20)).await;

    cancel.cancel();
    queue.close();
    barrier.cancel();

    assert_eq!(consumer.await.unwrap(), Err(SyncError::Cancelled));
    assert_eq!(waiter.await.unwrap(), Err(SyncError::Cancelled));
    Ok(())
}
