//! Supervisor invariants: event ordering, retry budget, policy gating,
//! review queueing, session turn bookkeeping and empty-retrieval routing.

use super::common::*;
use crate::config::PipelineConfig;
use crate::models::{Locale, StreamEvent};
use crate::services::agents::{ExecutionErrorClass, PipelineError};

const KPI_QUESTION: &str = "Show me total revenue for January 2026";

#[tokio::test]
async fn retry_budget_is_three_attempts_total() {
    // every attempt times out; two corrections are allowed after the initial try
    let executor = FakeExecutor::with_responses(vec![
        Err(PipelineError::ExecutionTimeout(30_000)),
        Err(PipelineError::ExecutionTimeout(30_000)),
        Err(PipelineError::ExecutionTimeout(30_000)),
        Ok(kpi_result(1.0)),
    ]);
    let harness = harness(executor.clone(), None, true, None).await;

    let (events, _) = run_pipeline(&harness, KPI_QUESTION, Locale::En).await;
    assert_valid_event_order(&events);

    assert_eq!(executor.executed().len(), 3, "initial attempt plus two corrections");
    assert_eq!(sql_previews(&events).len(), 3, "one preview per validated attempt");

    match terminal_event(&events) {
        StreamEvent::Error { code, retry_after, .. } => {
            assert_eq!(code, "INTERNAL_ERROR");
            assert!(retry_after.is_some(), "exhausted transient keeps a retry hint");
        },
        other => panic!("expected an error event, got {:?}", other),
    }
}

#[tokio::test]
async fn terminal_execution_error_stops_the_loop_immediately() {
    let executor = FakeExecutor::with_responses(vec![execution_error(
        ExecutionErrorClass::PermissionDenied,
        "Access denied for user 'medisync_ro'",
    )]);
    let harness = harness(executor.clone(), None, true, None).await;

    let (events, _) = run_pipeline(&harness, KPI_QUESTION, Locale::En).await;
    assert_valid_event_order(&events);
    assert_eq!(executor.executed().len(), 1, "permission errors are never corrected");
    assert!(matches!(terminal_event(&events), StreamEvent::Error { .. }));
}

#[tokio::test]
async fn policy_denial_blocks_without_executing_and_stays_opaque() {
    let executor = FakeExecutor::single_kpi_row();
    let harness = harness(executor.clone(), None, false, None).await;

    let (events, _) = run_pipeline(&harness, KPI_QUESTION, Locale::En).await;
    assert_valid_event_order(&events);
    assert!(executor.executed().is_empty(), "denied queries never reach the warehouse");

    match terminal_event(&events) {
        StreamEvent::Error { code, message, .. } => {
            assert_eq!(code, "FORBIDDEN");
            assert!(
                !message.to_lowercase().contains("policy"),
                "policy rationale must not leak: {}",
                message
            );
        },
        other => panic!("expected an error event, got {:?}", other),
    }
}

#[tokio::test]
async fn warning_routing_queues_the_answer_for_review() {
    // raise the normal bar so a clean answer lands in the warning band
    let cfg = PipelineConfig {
        confidence_normal_threshold: 99.0,
        confidence_clarify_threshold: 10.0,
        ..Default::default()
    };
    let executor = FakeExecutor::single_kpi_row();
    let harness = harness(executor.clone(), None, true, Some(cfg)).await;

    let (events, _) = run_pipeline(&harness, KPI_QUESTION, Locale::En).await;
    assert_valid_event_order(&events);

    match terminal_event(&events) {
        StreamEvent::Result { warnings, .. } => {
            assert!(
                warnings.iter().any(|w| w.contains("review")),
                "warning routing carries a caveat: {:?}",
                warnings
            );
        },
        other => panic!("expected a result event, got {:?}", other),
    }

    assert_eq!(harness.review_queue.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn session_turns_append_in_completion_order_and_stay_bounded() {
    let cfg = PipelineConfig { turn_ring_capacity: 2, ..Default::default() };
    let executor = FakeExecutor::with_responses(vec![
        Ok(kpi_result(1.0)),
        Ok(kpi_result(2.0)),
        Ok(kpi_result(3.0)),
    ]);
    let harness = harness(executor, None, true, Some(cfg)).await;

    let (_, session_id) = run_pipeline(&harness, KPI_QUESTION, Locale::En).await;
    run_pipeline_in_session(&harness, "total revenue for February 2026", Locale::En, Some(session_id))
        .await;
    run_pipeline_in_session(&harness, "total revenue for March 2026", Locale::En, Some(session_id))
        .await;

    let session = harness.sessions.get(session_id).unwrap();
    let session = session.lock().await;
    assert_eq!(session.conversation_turns.len(), 2, "ring bound enforced");
    let queries: Vec<_> = session
        .conversation_turns
        .iter()
        .map(|t| t.query.as_str())
        .collect();
    assert_eq!(
        queries,
        vec!["total revenue for February 2026", "total revenue for March 2026"],
        "completion order preserved, oldest evicted"
    );
    assert!(session.current_context.last_sql.is_some());
    assert_eq!(session.current_context.data_source_hint.as_deref(), Some("billing"));
}

#[tokio::test]
async fn empty_retrieval_clarifies_when_configured() {
    let cfg = PipelineConfig {
        schema_top_k: 0,
        on_empty_schema: "clarify".to_string(),
        ..Default::default()
    };
    let executor = FakeExecutor::single_kpi_row();
    let harness = harness(executor.clone(), None, true, Some(cfg)).await;

    let (events, _) = run_pipeline(&harness, KPI_QUESTION, Locale::En).await;
    assert_valid_event_order(&events);
    assert!(matches!(terminal_event(&events), StreamEvent::Clarification { .. }));
    assert!(executor.executed().is_empty());
}

#[tokio::test]
async fn empty_retrieval_clarifies_by_default_through_the_generator() {
    let cfg = PipelineConfig { schema_top_k: 0, ..Default::default() };
    let executor = FakeExecutor::single_kpi_row();
    let harness = harness(executor.clone(), None, true, Some(cfg)).await;

    let (events, _) = run_pipeline(&harness, KPI_QUESTION, Locale::En).await;
    assert_valid_event_order(&events);
    match terminal_event(&events) {
        StreamEvent::Clarification { options, .. } => {
            assert!(!options.is_empty(), "clarification must offer options");
        },
        other => panic!("expected a clarification event, got {:?}", other),
    }
    assert!(executor.executed().is_empty());
}

#[tokio::test]
async fn multi_statement_sql_is_narrowed_with_a_warning() {
    let generator = FixedSqlGenerator::new(
        "SELECT name_en FROM patients; SELECT name_ar FROM patients",
        &["patients"],
    );
    let executor = FakeExecutor::with_responses(vec![Ok(kpi_result(1.0))]);
    let harness = harness(executor.clone(), Some(generator), true, None).await;

    let (events, _) = run_pipeline(&harness, "Show the patients register names", Locale::En).await;
    assert_valid_event_order(&events);

    let previews = sql_previews(&events);
    assert_eq!(previews, vec!["SELECT name_en FROM patients"], "narrowed to the first statement");
    assert_eq!(executor.executed(), vec!["SELECT name_en FROM patients".to_string()]);

    match terminal_event(&events) {
        StreamEvent::Result { warnings, .. } => {
            assert!(
                warnings.iter().any(|w| w.contains("first")),
                "narrowing warning surfaced: {:?}",
                warnings
            );
        },
        other => panic!("expected a result event, got {:?}", other),
    }
}
