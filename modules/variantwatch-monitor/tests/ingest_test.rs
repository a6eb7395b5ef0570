//! Comment ingestion against in-memory store, queue and source.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use variantwatch_common::{Comment, IngestReport, RawComment};
use variantwatch_monitor::queue::ANALYZE_COMMENT_TASK;
use variantwatch_monitor::{
    CommentSource, IngestionPipeline, MemoryTaskQueue, QueuedTask, RateLimiter, SourceError,
    TaskPriority, TaskQueue,
};
use variantwatch_store::MemoryStore;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FixedComments {
    response: Result<Vec<RawComment>, SourceError>,
    calls: AtomicUsize,
}

impl FixedComments {
    fn ok(comments: Vec<RawComment>) -> Self {
        Self {
            response: Ok(comments),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(err: SourceError) -> Self {
        Self {
            response: Err(err),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CommentSource for FixedComments {
    async fn get_comments(&self, _post_id: &str) -> Result<Vec<RawComment>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

fn raw(id: &str) -> RawComment {
    RawComment {
        id: Some(id.to_string()),
        post_id: Some("post-1".to_string()),
        text: Some(format!("comment {id}")),
        author: Some("viewer".to_string()),
        timestamp: Some(Utc::now()),
    }
}

fn comment(id: &str) -> Comment {
    Comment::from_raw(raw(id), "post-1", Utc::now()).unwrap()
}

struct Fixture {
    pipeline: IngestionPipeline,
    store: Arc<MemoryStore>,
    queue: Arc<MemoryTaskQueue>,
}

fn fixture(source: FixedComments) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryTaskQueue::new());
    let pipeline = IngestionPipeline::new(
        Arc::new(source),
        store.clone(),
        queue.clone(),
        RateLimiter::new(100.0, 100.0),
    );
    Fixture {
        pipeline,
        store,
        queue,
    }
}

fn ids(comments: &[Comment]) -> Vec<&str> {
    comments.iter().map(|c| c.comment_id.as_str()).collect()
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deduplicate_uses_one_existence_query_for_any_batch_size() {
    let f = fixture(FixedComments::ok(vec![]));
    let batch: Vec<Comment> = (0..2_000).map(|i| comment(&format!("c{i}"))).collect();

    let unique = f.pipeline.deduplicate(batch).await.unwrap();

    assert_eq!(unique.len(), 2_000);
    assert_eq!(f.store.existence_queries(), 1);
}

#[tokio::test]
async fn deduplicate_drops_stored_and_repeated_keeping_order() {
    let f = fixture(FixedComments::ok(vec![]));
    f.pipeline.store(&[comment("b")], "post-1").await;

    let unique = f
        .pipeline
        .deduplicate(vec![
            comment("d"),
            comment("b"),
            comment("a"),
            comment("d"),
            comment("c"),
        ])
        .await
        .unwrap();

    assert_eq!(ids(&unique), ["d", "a", "c"]);
}

#[tokio::test]
async fn empty_batch_skips_existence_query() {
    let f = fixture(FixedComments::ok(vec![]));
    assert!(f.pipeline.deduplicate(vec![]).await.unwrap().is_empty());
    assert_eq!(f.store.existence_queries(), 0);
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bulk_failure_falls_back_to_single_inserts() {
    let f = fixture(FixedComments::ok(vec![]));
    f.store.set_fail_bulk_insert(true);
    f.store.reject_comment("bad");

    let stored = f
        .pipeline
        .store(&[comment("a"), comment("bad"), comment("c")], "post-1")
        .await;

    assert_eq!(stored, 2);
    assert!(f.store.has_comment("a"));
    assert!(!f.store.has_comment("bad"));
    assert!(f.store.has_comment("c"));
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_run_finds_nothing_new() {
    let f = fixture(FixedComments::ok(vec![raw("a"), raw("b"), raw("a"), raw("c")]));

    let first = f.pipeline.process("post-1").await;
    assert_eq!(
        first,
        IngestReport::Success {
            processed_count: 4,
            queued_count: 3,
            stored_count: 3,
        }
    );

    let second = f.pipeline.process("post-1").await;
    assert_eq!(
        second,
        IngestReport::Success {
            processed_count: 4,
            queued_count: 0,
            stored_count: 0,
        }
    );
    assert_eq!(f.store.comment_count(), 3);
    assert_eq!(f.queue.tasks().len(), 3);
}

#[tokio::test]
async fn queued_tasks_are_low_priority_analysis() {
    let f = fixture(FixedComments::ok(vec![raw("a"), raw("b")]));
    f.pipeline.process("post-1").await;

    let tasks = f.queue.tasks();
    assert_eq!(tasks.len(), 2);
    for task in &tasks {
        assert_eq!(task.task_name, ANALYZE_COMMENT_TASK);
        assert_eq!(task.priority, TaskPriority::Analysis);
        assert!(task.priority < TaskPriority::Generation);
        assert_eq!(task.args[1], "post-1");
    }
    assert_eq!(tasks[0].args[0]["comment_id"], "a");
    assert_eq!(tasks[1].args[0]["comment_id"], "b");
}

#[tokio::test]
async fn malformed_records_are_skipped() {
    let no_id = RawComment {
        id: None,
        ..raw("x")
    };
    let no_text = RawComment {
        text: None,
        ..raw("y")
    };
    let f = fixture(FixedComments::ok(vec![raw("a"), no_id, no_text, raw("b")]));

    let report = f.pipeline.process("post-1").await;

    assert_eq!(
        report,
        IngestReport::Success {
            processed_count: 4,
            queued_count: 2,
            stored_count: 2,
        }
    );
}

#[tokio::test]
async fn fetch_failure_becomes_error_report() {
    let f = fixture(FixedComments::failing(SourceError::Failed(
        "500 Internal Server Error".to_string(),
    )));

    let report = f.pipeline.process("post-1").await;

    assert!(!report.is_success());
    let IngestReport::Error { error } = report else {
        panic!("expected error report");
    };
    assert!(error.contains("post-1"));
    assert_eq!(f.store.comment_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn storage_outage_becomes_error_report() {
    let f = fixture(FixedComments::ok(vec![raw("a")]));
    f.store.set_fail_existence_check(true);

    let report = f.pipeline.process("post-1").await;

    assert!(matches!(report, IngestReport::Error { .. }));
    assert_eq!(f.store.existence_queries(), 3);
    assert!(f.queue.tasks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unqueued_comments_are_not_stored_and_come_back_next_run() {
    let f = fixture(FixedComments::ok(vec![raw("a"), raw("b")]));
    f.queue.set_fail(true);

    let report = f.pipeline.process("post-1").await;

    assert_eq!(
        report,
        IngestReport::Success {
            processed_count: 2,
            queued_count: 0,
            stored_count: 0,
        }
    );
    assert_eq!(f.store.comment_count(), 0);

    f.queue.set_fail(false);
    let report = f.pipeline.process("post-1").await;

    assert_eq!(
        report,
        IngestReport::Success {
            processed_count: 2,
            queued_count: 2,
            stored_count: 2,
        }
    );
    assert_eq!(f.queue.tasks().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn queue_blip_is_retried_before_giving_up() {
    struct FailsOnce {
        inner: MemoryTaskQueue,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskQueue for FailsOnce {
        async fn enqueue(&self, task: QueuedTask) -> anyhow::Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("connection reset");
            }
            self.inner.enqueue(task).await
        }
    }

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(FailsOnce {
        inner: MemoryTaskQueue::new(),
        calls: AtomicUsize::new(0),
    });
    let pipeline = IngestionPipeline::new(
        Arc::new(FixedComments::ok(vec![raw("a")])),
        store.clone(),
        queue.clone(),
        RateLimiter::new(100.0, 100.0),
    );

    let report = pipeline.process("post-1").await;

    assert_eq!(
        report,
        IngestReport::Success {
            processed_count: 1,
            queued_count: 1,
            stored_count: 1,
        }
    );
    assert_eq!(queue.calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.inner.tasks().len(), 1);
    assert!(store.has_comment("a"));
}

#[tokio::test(start_paused = true)]
async fn existence_check_blip_is_retried() {
    let f = fixture(FixedComments::ok(vec![raw("a")]));
    f.store.set_fail_existence_check(true);

    let store = f.store.clone();
    let recover = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        store.set_fail_existence_check(false);
    });

    let report = f.pipeline.process("post-1").await;
    recover.await.unwrap();

    assert!(report.is_success());
    assert_eq!(f.store.existence_queries(), 2);
    assert!(f.store.has_comment("a"));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_fetch_is_retried() {
    struct LimitedOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommentSource for LimitedOnce {
        async fn get_comments(&self, _post_id: &str) -> Result<Vec<RawComment>, SourceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SourceError::RateLimited)
            } else {
                Ok(vec![raw("a")])
            }
        }
    }

    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(LimitedOnce {
        calls: AtomicUsize::new(0),
    });
    let pipeline = IngestionPipeline::new(
        source.clone(),
        store.clone(),
        Arc::new(MemoryTaskQueue::new()),
        RateLimiter::new(10.0, 10.0),
    );

    let report = pipeline.process("post-1").await;

    assert!(report.is_success());
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    assert!(store.has_comment("a"));
}
