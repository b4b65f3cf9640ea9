//! Queue semantics against the in-process store with a hand-driven clock.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use workq::clock::{Clock, ManualClock};
use workq::engine::{LeaseMonitor, MonitorConfig};
use workq::error::Error;
use workq::model::{NewWorkItem, Outcome, Status};
use workq::policy::{LEASE_EXPIRED, RetryPolicy};
use workq::store::{MemoryStore, WorkStore};
use workq::{Job, WorkQueue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FetchTask {
    url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DeriveJob {
    page_id: u64,
    prompt: String,
}

fn fetch(url: &str) -> FetchTask {
    FetchTask {
        url: url.to_string(),
    }
}

const LEASE: Duration = Duration::from_secs(60);
const BACKOFF: Duration = Duration::from_secs(10);

struct Harness {
    store: Arc<dyn WorkStore>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(ManualClock::default()),
        }
    }

    fn queue<P>(&self, name: &str) -> WorkQueue<P>
    where
        P: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
    {
        WorkQueue::new(name, Arc::clone(&self.store), self.clock.clone()).with_policy(RetryPolicy {
            lease_duration: LEASE,
            base_backoff: BACKOFF,
        })
    }

    fn monitor(&self) -> LeaseMonitor {
        LeaseMonitor::new(
            Arc::clone(&self.store),
            self.clock.clone(),
            MonitorConfig {
                interval: Duration::from_secs(1),
                batch_size: 2,
            },
        )
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

// ---------------------------------------------------------------------------
// Claiming
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_never_share_an_item() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    for i in 0..50 {
        queue
            .enqueue(fetch(&format!("https://example.com/{i}")))
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for w in 0..8 {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            let worker = format!("w-{w}");
            let mut got = Vec::new();
            while let Some(claimed) = queue.claim(&worker).await.unwrap() {
                assert_eq!(claimed.item.attempt_count, 1);
                assert_eq!(claimed.item.claimed_by.as_deref(), Some(worker.as_str()));
                got.push(claimed.id());
            }
            got
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(seen.insert(id), "item {id} claimed twice");
        }
    }
    assert_eq!(seen.len(), 50);
    assert_eq!(queue.stats().await.unwrap().running, 50);
}

#[tokio::test]
async fn zero_length_lease_is_refused() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue::<FetchTask>("fetch").with_policy(RetryPolicy {
        lease_duration: Duration::ZERO,
        base_backoff: BACKOFF,
    });
    let id = queue.enqueue(fetch("a")).await.unwrap().id();

    let err = queue.claim("w").await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let item = queue.get(id).await.unwrap();
    assert_eq!(item.status, Status::New);
    assert_eq!(item.attempt_count, 0);
    assert!(item.lease_expires_at.is_none());
}

#[tokio::test]
async fn claims_by_priority_then_fifo() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");

    let a = queue
        .enqueue_job(Job::new(fetch("a")).priority(0))
        .await
        .unwrap()
        .id();
    h.clock.advance(Duration::from_secs(1));
    let b = queue
        .enqueue_job(Job::new(fetch("b")).priority(5))
        .await
        .unwrap()
        .id();
    h.clock.advance(Duration::from_secs(1));
    let c = queue
        .enqueue_job(Job::new(fetch("c")).priority(5))
        .await
        .unwrap()
        .id();

    let order: Vec<_> = [
        queue.claim("w").await.unwrap().unwrap().id(),
        queue.claim("w").await.unwrap().unwrap().id(),
        queue.claim("w").await.unwrap().unwrap().id(),
    ]
    .into();
    assert_eq!(order, vec![b, c, a]);
    assert!(queue.claim("w").await.unwrap().is_none());
}

#[tokio::test]
async fn delayed_items_wait_for_available_at() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    queue
        .enqueue_job(Job::new(fetch("later")).delay(Duration::from_secs(30)))
        .await
        .unwrap();

    assert!(queue.claim("w").await.unwrap().is_none());
    h.clock.advance(Duration::from_secs(30));
    let claimed = queue.claim("w").await.unwrap().unwrap();
    assert_eq!(claimed.payload, fetch("later"));
}

#[tokio::test]
async fn claim_sets_lease_and_counts_attempt() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    queue.enqueue(fetch("x")).await.unwrap();

    let item = queue.claim("w-1").await.unwrap().unwrap().item;
    assert_eq!(item.status, Status::Running);
    assert_eq!(item.claimed_at, Some(h.now()));
    assert_eq!(
        item.lease_expires_at,
        Some(h.now() + chrono::Duration::seconds(60))
    );
    assert!(item.lease_expires_at > item.claimed_at);
}

// ---------------------------------------------------------------------------
// Enqueue dedup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_with_same_key_is_idempotent() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");

    let first = queue
        .enqueue_job(Job::new(fetch("one")).dedupe_key("page:1"))
        .await
        .unwrap();
    let second = queue
        .enqueue_job(Job::new(fetch("another payload")).dedupe_key("page:1"))
        .await
        .unwrap();

    assert!(!first.is_duplicate());
    assert!(second.is_duplicate());
    assert_eq!(first.id(), second.id());
    assert_eq!(queue.stats().await.unwrap().total(), 1);
    assert_eq!(queue.get(first.id()).await.unwrap().payload["url"], "one");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_producers_share_one_item_per_key() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");

    let mut tasks = Vec::new();
    for p in 0..16 {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            queue
                .enqueue_job(Job::new(fetch(&format!("producer {p}"))).dedupe_key("page:1"))
                .await
                .unwrap()
        }));
    }

    let mut ids = HashSet::new();
    let mut created = 0;
    for task in tasks {
        let result = task.await.unwrap();
        if !result.is_duplicate() {
            created += 1;
        }
        ids.insert(result.id());
    }
    assert_eq!(created, 1);
    assert_eq!(ids.len(), 1);
    assert_eq!(queue.stats().await.unwrap().total(), 1);
}

#[tokio::test]
async fn store_rejects_items_that_could_never_run() {
    let h = Harness::new();

    let err = h
        .store
        .enqueue(
            NewWorkItem::new("fetch", serde_json::json!({})).max_attempts(0),
            h.now(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = h
        .store
        .enqueue(NewWorkItem::new("", serde_json::json!({})), h.now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    // Left unset, the attempt limit falls back to the crate default.
    let id = h
        .store
        .enqueue(NewWorkItem::new("fetch", serde_json::json!({})), h.now())
        .await
        .unwrap()
        .id();
    assert_eq!(
        h.store.get(id).await.unwrap().max_attempts,
        workq::model::DEFAULT_MAX_ATTEMPTS
    );
}

#[tokio::test]
async fn dedupe_key_is_scoped_per_queue() {
    let h = Harness::new();
    let fetches: WorkQueue<FetchTask> = h.queue("fetch");
    let jobs: WorkQueue<DeriveJob> = h.queue("llm_jobs");

    let a = fetches
        .enqueue_job(Job::new(fetch("x")).dedupe_key("k"))
        .await
        .unwrap();
    let b = jobs
        .enqueue_job(
            Job::new(DeriveJob {
                page_id: 1,
                prompt: "summarize".into(),
            })
            .dedupe_key("k"),
        )
        .await
        .unwrap();
    assert!(!b.is_duplicate());
    assert_ne!(a.id(), b.id());
}

#[tokio::test]
async fn key_is_free_again_once_the_item_finishes() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");

    let first = queue
        .enqueue_job(Job::new(fetch("x")).dedupe_key("k"))
        .await
        .unwrap()
        .id();
    // Still live while running.
    queue.claim("w").await.unwrap().unwrap();
    assert!(
        queue
            .enqueue_job(Job::new(fetch("x")).dedupe_key("k"))
            .await
            .unwrap()
            .is_duplicate()
    );

    queue.complete(first, "w", &Outcome::Success).await.unwrap();
    let again = queue
        .enqueue_job(Job::new(fetch("x")).dedupe_key("k"))
        .await
        .unwrap();
    assert!(!again.is_duplicate());
    assert_ne!(again.id(), first);
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_attempt_scenario() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let id = queue
        .enqueue_job(Job::new(fetch("x")).max_attempts(2))
        .await
        .unwrap()
        .id();

    let first = queue.claim("w").await.unwrap().unwrap();
    assert_eq!(first.item.attempt_count, 1);

    let after_first = queue
        .complete(id, "w", &Outcome::failure("timeout"))
        .await
        .unwrap();
    assert_eq!(after_first.status, Status::New);
    assert_eq!(after_first.available_at, h.now() + chrono::Duration::seconds(10));
    assert_eq!(after_first.last_error.as_deref(), Some("timeout"));
    assert!(after_first.claimed_by.is_none());

    // Not before the backoff elapses.
    assert!(queue.claim("w").await.unwrap().is_none());
    h.clock.advance(BACKOFF);

    let second = queue.claim("w").await.unwrap().unwrap();
    assert_eq!(second.item.attempt_count, 2);

    let done = queue
        .complete(id, "w", &Outcome::failure("timeout again"))
        .await
        .unwrap();
    assert_eq!(done.status, Status::Deadletter);
    assert_eq!(done.last_error.as_deref(), Some("timeout again"));
    assert!(queue.claim("w").await.unwrap().is_none());
}

#[tokio::test]
async fn backoff_gaps_grow_between_failures() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let id = queue
        .enqueue_job(Job::new(fetch("x")).max_attempts(5))
        .await
        .unwrap()
        .id();

    let mut gaps = Vec::new();
    for _ in 0..3 {
        queue.claim("w").await.unwrap().unwrap();
        let item = queue
            .complete(id, "w", &Outcome::failure("nope"))
            .await
            .unwrap();
        let gap = item.available_at - h.now();
        gaps.push(gap);
        h.clock.set(item.available_at);
    }

    assert!(gaps[0] < gaps[1] && gaps[1] < gaps[2], "gaps: {gaps:?}");
    assert_eq!(gaps[2], chrono::Duration::seconds(30));
}

#[tokio::test]
async fn deadletters_after_max_attempts_failures() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let id = queue
        .enqueue_job(Job::new(fetch("x")).max_attempts(3))
        .await
        .unwrap()
        .id();

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let claimed = queue.claim("w").await.unwrap().expect("claimable");
        let item = queue
            .complete(claimed.id(), "w", &Outcome::failure("boom"))
            .await
            .unwrap();
        statuses.push(item.status);
        h.clock.set(item.available_at.max(h.now()));
    }

    assert_eq!(statuses, vec![Status::New, Status::New, Status::Deadletter]);
    let item = queue.get(id).await.unwrap();
    assert_eq!(item.attempt_count, 3);
    assert!(item.completed_at.is_some());
    assert!(queue.claim("w").await.unwrap().is_none());
}

#[tokio::test]
async fn fatal_outcome_deadletters_immediately() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let id = queue
        .enqueue_job(Job::new(fetch("x")).max_attempts(10))
        .await
        .unwrap()
        .id();
    queue.claim("w").await.unwrap().unwrap();
    let item = queue
        .complete(id, "w", &Outcome::fatal("404"))
        .await
        .unwrap();
    assert_eq!(item.status, Status::Deadletter);
    assert_eq!(item.attempt_count, 1);
}

#[tokio::test]
async fn completion_by_another_worker_is_stale() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let id = queue.enqueue(fetch("x")).await.unwrap().id();
    queue.claim("w-1").await.unwrap().unwrap();

    let err = queue
        .complete(id, "w-2", &Outcome::Success)
        .await
        .unwrap_err();
    assert!(err.is_stale_claim());
    assert_eq!(queue.get(id).await.unwrap().status, Status::Running);
}

#[tokio::test]
async fn completing_unknown_item_is_not_found() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let err = h
        .store
        .complete(
            workq::model::WorkId::new(),
            "w",
            &Outcome::Success,
            queue.policy(),
            h.now(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

// ---------------------------------------------------------------------------
// Leases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn late_completion_after_reclaim_is_rejected() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let id = queue.enqueue(fetch("x")).await.unwrap().id();
    queue.claim("slow").await.unwrap().unwrap();

    h.clock.advance(LEASE + Duration::from_secs(1));
    let report = h.monitor().sweep_once().await.unwrap();
    assert_eq!(report.requeued, 1);

    let before = queue.get(id).await.unwrap();
    let err = queue
        .complete(id, "slow", &Outcome::Success)
        .await
        .unwrap_err();
    assert!(err.is_stale_claim());

    let after = queue.get(id).await.unwrap();
    assert_eq!(after.status, Status::New);
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(after.last_error.as_deref(), Some(LEASE_EXPIRED));
}

#[tokio::test]
async fn reclaimed_item_is_claimable_at_once_and_keeps_attempts() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let id = queue.enqueue(fetch("x")).await.unwrap().id();
    queue.claim("gone").await.unwrap().unwrap();

    h.clock.advance(LEASE + Duration::from_secs(1));
    h.monitor().sweep_once().await.unwrap();

    let item = queue.get(id).await.unwrap();
    assert_eq!(item.attempt_count, 1);
    assert_eq!(item.available_at, h.now());
    assert!(item.claimed_by.is_none() && item.lease_expires_at.is_none());

    let again = queue.claim("fresh").await.unwrap().unwrap();
    assert_eq!(again.item.attempt_count, 2);
}

#[tokio::test]
async fn renewal_keeps_the_monitor_away() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let id = queue.enqueue(fetch("x")).await.unwrap().id();
    queue.claim("w").await.unwrap().unwrap();

    h.clock.advance(Duration::from_secs(50));
    let until = queue.renew_lease(id, "w").await.unwrap();
    assert_eq!(until, h.now() + chrono::Duration::seconds(60));

    h.clock.advance(Duration::from_secs(50));
    assert_eq!(h.monitor().sweep_once().await.unwrap().total(), 0);

    let item = queue.complete(id, "w", &Outcome::Success).await.unwrap();
    assert_eq!(item.status, Status::Succeeded);
    assert_eq!(item.attempt_count, 1);
}

#[tokio::test]
async fn renewal_by_a_stranger_is_stale() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let id = queue.enqueue(fetch("x")).await.unwrap().id();
    queue.claim("w").await.unwrap().unwrap();
    assert!(queue.renew_lease(id, "other").await.unwrap_err().is_stale_claim());
}

#[tokio::test]
async fn expired_lease_on_last_attempt_deadletters() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let id = queue
        .enqueue_job(Job::new(fetch("x")).max_attempts(1))
        .await
        .unwrap()
        .id();
    queue.claim("w").await.unwrap().unwrap();

    h.clock.advance(LEASE + Duration::from_secs(1));
    let report = h.monitor().sweep_once().await.unwrap();
    assert_eq!(report.deadlettered, 1);
    assert_eq!(report.requeued, 0);
    assert_eq!(report.items[0].claimed_by.as_deref(), Some("w"));
    assert_eq!(queue.get(id).await.unwrap().status, Status::Deadletter);
}

#[tokio::test]
async fn sweep_drains_more_than_one_batch() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    for i in 0..5 {
        queue.enqueue(fetch(&i.to_string())).await.unwrap();
        queue.claim("w").await.unwrap().unwrap();
    }

    h.clock.advance(LEASE + Duration::from_secs(1));
    let report = h.monitor().sweep_once().await.unwrap();
    assert_eq!(report.requeued, 5);
    assert_eq!(queue.stats().await.unwrap().new, 5);
    assert_eq!(h.monitor().sweep_once().await.unwrap().total(), 0);
}

// ---------------------------------------------------------------------------
// Attempts are monotonic
// ---------------------------------------------------------------------------

#[tokio::test]
async fn attempts_only_move_on_claim() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let id = queue
        .enqueue_job(Job::new(fetch("x")).max_attempts(4))
        .await
        .unwrap()
        .id();

    let mut seen = vec![queue.get(id).await.unwrap().attempt_count];

    queue.claim("w").await.unwrap().unwrap();
    seen.push(queue.get(id).await.unwrap().attempt_count);

    let item = queue.complete(id, "w", &Outcome::failure("x")).await.unwrap();
    seen.push(item.attempt_count);
    h.clock.set(item.available_at);

    queue.claim("w").await.unwrap().unwrap();
    seen.push(queue.get(id).await.unwrap().attempt_count);

    h.clock.advance(LEASE + Duration::from_secs(1));
    h.monitor().sweep_once().await.unwrap();
    seen.push(queue.get(id).await.unwrap().attempt_count);

    queue.claim("w").await.unwrap().unwrap();
    seen.push(queue.get(id).await.unwrap().attempt_count);

    assert_eq!(seen, vec![0, 1, 1, 2, 2, 3]);
}

// ---------------------------------------------------------------------------
// Operator actions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn requeue_grants_more_attempts() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let id = queue
        .enqueue_job(Job::new(fetch("x")).max_attempts(1))
        .await
        .unwrap()
        .id();
    queue.claim("w").await.unwrap().unwrap();
    queue.complete(id, "w", &Outcome::failure("down")).await.unwrap();

    let item = queue.requeue(id, 2).await.unwrap();
    assert_eq!(item.status, Status::New);
    assert_eq!(item.attempt_count, 1);
    assert_eq!(item.max_attempts, 3);
    assert_eq!(item.last_error.as_deref(), Some("down"));
    assert!(item.completed_at.is_none());

    let again = queue.claim("w").await.unwrap().unwrap();
    assert_eq!(again.item.attempt_count, 2);
}

#[tokio::test]
async fn requeue_rejects_live_items_and_zero_attempts() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let id = queue.enqueue(fetch("x")).await.unwrap().id();

    assert!(matches!(
        queue.requeue(id, 1).await,
        Err(Error::InvalidTransition {
            from: Status::New,
            ..
        })
    ));
    assert!(matches!(
        queue.requeue(id, 0).await,
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn requeue_refuses_to_shadow_a_live_key() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let dead = queue
        .enqueue_job(Job::new(fetch("x")).dedupe_key("k").max_attempts(1))
        .await
        .unwrap()
        .id();
    queue.claim("w").await.unwrap().unwrap();
    queue.complete(dead, "w", &Outcome::fatal("bad")).await.unwrap();

    let live = queue
        .enqueue_job(Job::new(fetch("x")).dedupe_key("k"))
        .await
        .unwrap()
        .id();
    match queue.requeue(dead, 1).await {
        Err(Error::DuplicateKey { existing, .. }) => assert_eq!(existing, live),
        other => panic!("expected DuplicateKey, got {other:?}"),
    }
}

#[tokio::test]
async fn stats_and_list_reflect_state() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    for i in 0..3 {
        queue.enqueue(fetch(&i.to_string())).await.unwrap();
        h.clock.advance(Duration::from_secs(1));
    }
    let claimed = queue.claim("w").await.unwrap().unwrap();
    queue
        .complete(claimed.id(), "w", &Outcome::Success)
        .await
        .unwrap();
    queue.claim("w").await.unwrap().unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!((stats.new, stats.running, stats.succeeded), (1, 1, 1));
    assert_eq!(stats.total(), 3);

    let running = queue.list(Some(Status::Running), 10).await.unwrap();
    assert_eq!(running.len(), 1);
    let all = queue.list(None, 2).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].created_at >= all[1].created_at);
}

#[tokio::test]
async fn purge_removes_only_old_terminal_items() {
    let h = Harness::new();
    let queue: WorkQueue<FetchTask> = h.queue("fetch");
    let old = queue.enqueue(fetch("old")).await.unwrap().id();
    queue.claim("w").await.unwrap().unwrap();
    queue.complete(old, "w", &Outcome::Success).await.unwrap();

    h.clock.advance(Duration::from_secs(7200));
    let pending = queue.enqueue(fetch("pending")).await.unwrap().id();
    let recent = queue.enqueue(fetch("recent")).await.unwrap().id();
    queue.claim("w").await.unwrap().unwrap();
    queue.complete(pending, "w", &Outcome::Success).await.ok();
    queue.complete(recent, "w", &Outcome::Success).await.ok();

    let removed = queue.purge(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(removed, 1);
    assert!(matches!(queue.get(old).await, Err(Error::NotFound(_))));
    assert_eq!(queue.stats().await.unwrap().total(), 2);
}

// ---------------------------------------------------------------------------
// Two payload types over one store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_and_llm_queues_share_a_store_independently() {
    let h = Harness::new();
    let fetches: WorkQueue<FetchTask> = h.queue("fetch");
    let jobs: WorkQueue<DeriveJob> = h.queue("llm_jobs");

    fetches.enqueue(fetch("https://example.com")).await.unwrap();
    jobs.enqueue_job(
        Job::new(DeriveJob {
            page_id: 7,
            prompt: "extract entities".into(),
        })
        .priority(3),
    )
    .await
    .unwrap();

    let job = jobs.claim("llm-1").await.unwrap().unwrap();
    assert_eq!(job.payload.page_id, 7);
    assert!(jobs.claim("llm-1").await.unwrap().is_none());

    let page = fetches.claim("fetch-1").await.unwrap().unwrap();
    assert_eq!(page.payload.url, "https://example.com");

    assert_eq!(fetches.stats().await.unwrap().running, 1);
    assert_eq!(jobs.stats().await.unwrap().running, 1);
}
