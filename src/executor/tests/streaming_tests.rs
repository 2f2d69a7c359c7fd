use crate::executor::{ExecutionOptions, Executor, ExecutorConfig, OperationStatus};
use crate::executor::tests::common::{adapters, classification, planner, question, rate_limiter, registry};
use crate::orchestrator::new_event_channel;
use crate::stream::EventType;
use crate::test_support::MockAdapter;

#[tokio::test]
async fn streaming_adapter_emits_partial_results_before_completing() {
    let planner = planner(&["pg"]);
    let question = question();
    let plan = planner.build_validated(&classification(question.id, &["pg"]), &question);

    let adapters = adapters(vec![("pg", MockAdapter::streaming_rows(120))]);
    let executor = Executor::new(ExecutorConfig::default(), adapters, registry(&["pg"]), rate_limiter());

    let (sink, mut events) = new_event_channel(question.id);
    let mut options = ExecutionOptions::default();
    options.stream_sink = Some(sink);

    let run = tokio::spawn(async move { executor.run(plan, options).await });

    let mut partial_events = 0;
    let mut total_rows_seen = 0;
    while let Some(event) = events.recv().await {
        if event.event_type == EventType::PartialResults {
            partial_events += 1;
            total_rows_seen += event.payload["rows_count"].as_u64().unwrap();
        }
    }

    let outcome = run.await.unwrap();
    let pg = outcome.results.get("translate:pg").unwrap();
    assert_eq!(pg.status, OperationStatus::Completed);
    assert_eq!(pg.rows.len(), 120);

    assert!(partial_events >= 2, "120 rows at a batch size of 50 should emit more than one partial_results event");
    assert_eq!(total_rows_seen, 120, "partial batches must account for every row");
}

#[tokio::test]
async fn non_streaming_adapter_never_emits_partial_results() {
    let planner = planner(&["pg"]);
    let question = question();
    let plan = planner.build_validated(&classification(question.id, &["pg"]), &question);

    let adapters = adapters(vec![("pg", MockAdapter::rows(120))]);
    let executor = Executor::new(ExecutorConfig::default(), adapters, registry(&["pg"]), rate_limiter());

    let (sink, mut events) = new_event_channel(question.id);
    let mut options = ExecutionOptions::default();
    options.stream_sink = Some(sink);

    let run = tokio::spawn(async move { executor.run(plan, options).await });

    let mut saw_partial = false;
    while let Some(event) = events.recv().await {
        if event.event_type == EventType::PartialResults {
            saw_partial = true;
        }
    }

    let outcome = run.await.unwrap();
    let pg = outcome.results.get("translate:pg").unwrap();
    assert_eq!(pg.status, OperationStatus::Completed);
    assert_eq!(pg.rows.len(), 120);
    assert!(!saw_partial, "an adapter that does not support streaming must not emit partial_results");
}
