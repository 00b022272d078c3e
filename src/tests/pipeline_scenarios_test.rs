//! End-to-end pipeline scenarios with literal inputs and outputs.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::common::*;
use crate::models::{Locale, NumeralSystem, StreamEvent};
use crate::services::agents::ExecutionErrorClass;

#[tokio::test]
async fn english_kpi_question_streams_a_kpi_card() {
    let executor = FakeExecutor::single_kpi_row();
    let harness = harness(executor.clone(), None, true, None).await;

    let (events, _) =
        run_pipeline(&harness, "Show me total revenue for January 2026", Locale::En).await;
    assert_valid_event_order(&events);

    let previews = sql_previews(&events);
    assert_eq!(previews.len(), 1);
    assert!(previews[0].starts_with("SELECT"));
    assert!(previews[0].contains("billing_date >= '2026-01-01'"));

    match terminal_event(&events) {
        StreamEvent::Result { chart_kind, data, confidence, warnings, .. } => {
            assert_eq!(chart_kind, "kpi_card");
            assert_eq!(data.row_count, 1);
            assert_eq!(data.columns.len(), 1);
            assert!(data.rows[0][0].is_number());
            assert!(*confidence >= 70.0, "confidence {}", confidence);
            assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
        },
        other => panic!("expected a result event, got {:?}", other),
    }

    assert_eq!(executor.executed().len(), 1);
}

#[tokio::test]
async fn arabic_trend_question_streams_a_line_chart_with_arabic_hints() {
    let executor = FakeExecutor::with_responses(vec![Ok(trend_result())]);
    let harness = harness(executor.clone(), None, true, None).await;

    let (events, _) = run_pipeline(
        &harness,
        "أظهر اتجاه زيارات المرضى خلال الأشهر الستة الماضية",
        Locale::Ar,
    )
    .await;
    assert_valid_event_order(&events);

    let previews = sql_previews(&events);
    assert_eq!(previews.len(), 1);
    assert!(previews[0].contains("patient_visits"));
    assert!(previews[0].contains("INTERVAL 6 MONTH"));

    match terminal_event(&events) {
        StreamEvent::Result { chart_kind, visualization, .. } => {
            assert_eq!(chart_kind, "line");
            assert_eq!(
                visualization.format_hints.numeral_system,
                NumeralSystem::EasternArabic
            );
        },
        other => panic!("expected a result event, got {:?}", other),
    }
}

#[tokio::test]
async fn forbidden_keyword_is_blocked_before_execution() {
    let executor = FakeExecutor::single_kpi_row();
    let generator = FixedSqlGenerator::new("DELETE FROM patients;", &["patients"]);
    let harness = harness(executor.clone(), Some(generator), true, None).await;

    let (events, _) = run_pipeline(&harness, "remove all patients", Locale::En).await;
    assert_valid_event_order(&events);
    assert!(sql_previews(&events).is_empty(), "no preview for a blocked statement");

    match terminal_event(&events) {
        StreamEvent::Error { code, message, .. } => {
            assert_eq!(code, "FORBIDDEN");
            assert!(message.contains("DELETE") || message.contains("SELECT"), "message: {}", message);
        },
        other => panic!("expected an error event, got {:?}", other),
    }

    assert!(executor.executed().is_empty(), "blocked SQL must never execute");
}

#[tokio::test]
async fn failed_execution_is_corrected_and_retried_once() {
    let executor = FakeExecutor::with_responses(vec![
        execution_error(
            ExecutionErrorClass::ColumnNotFound,
            r#"column "patient_name" does not exist"#,
        ),
        Ok(kpi_result(42.0)),
    ]);
    let generator = FixedSqlGenerator::new("SELECT patient_name FROM patients", &["patients"]);
    let harness = harness(executor.clone(), Some(generator), true, None).await;

    let (events, _) = run_pipeline(&harness, "Show me the patients register list", Locale::En).await;
    assert_valid_event_order(&events);

    let previews = sql_previews(&events);
    assert_eq!(previews.len(), 2, "one preview per validated attempt");
    assert!(previews[0].contains("patient_name"));
    assert!(!previews[1].contains("patient_name"), "corrected: {}", previews[1]);

    match terminal_event(&events) {
        StreamEvent::Result { confidence, .. } => {
            assert!(*confidence >= 70.0, "confidence {}", confidence);
        },
        other => panic!("expected a result event, got {:?}", other),
    }

    assert_eq!(executor.executed().len(), 2);
}

#[tokio::test]
async fn vague_question_asks_for_clarification_without_executing() {
    let executor = FakeExecutor::single_kpi_row();
    let cfg = crate::config::PipelineConfig {
        on_empty_schema: "clarify".to_string(),
        ..Default::default()
    };
    let harness = harness(executor.clone(), None, true, Some(cfg)).await;

    let (events, _) = run_pipeline(&harness, "Show me the data", Locale::En).await;
    assert_valid_event_order(&events);
    assert!(sql_previews(&events).is_empty());

    match terminal_event(&events) {
        StreamEvent::Clarification { message, options } => {
            assert!(!message.is_empty());
            assert!(!options.is_empty(), "clarification must offer options");
        },
        other => panic!("expected a clarification event, got {:?}", other),
    }

    assert!(executor.executed().is_empty(), "no execution for a clarify routing");
}

#[tokio::test]
async fn cancellation_during_execution_emits_nothing_further() {
    let executor = BlockingExecutor::new();
    let harness = harness(executor.clone(), None, true, None).await;

    let base_ctx = test_ctx(Locale::En);
    let (session_id, session) = harness
        .sessions
        .resolve_or_create(None, &base_ctx.user_id, Locale::En)
        .await;
    let ctx = base_ctx.for_request(session_id, None);

    let (tx, mut rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let supervisor = harness.supervisor.clone();
    let run_cancel = cancel.clone();
    let run = tokio::spawn(async move {
        supervisor
            .run(ctx, "Show me total revenue for January 2026".to_string(), tx, run_cancel)
            .await;
    });

    // wait until the executor holds the in-flight query, then cancel
    tokio::time::timeout(Duration::from_secs(2), executor.started.notified())
        .await
        .expect("executor never started");
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("pipeline did not stop after cancellation")
        .unwrap();

    assert!(executor.observed_cancel.load(Ordering::SeqCst), "driver saw the cancellation");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    for event in &events {
        assert!(
            !event.is_terminal(),
            "no result or error may follow cancellation, got {:?}",
            event
        );
    }

    // the session is unchanged: no turn appended
    assert!(session.lock().await.conversation_turns.is_empty());
}
