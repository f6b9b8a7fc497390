//! End-to-end runs of the research loop against scripted capabilities.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{url_for, CallKind, Harness, ScriptedCompletion, ScriptedSearch};
use deep_search::{
    AnswerKind, CompletionError, JsonFileSink, Phase, ResearchError, StopReason, DEFAULT_MODE,
    NO_FINDINGS_ANSWER, SUMMARY_SEPARATOR,
};

const TOPIC: &str = "rust ownership";

#[tokio::test]
async fn test_negative_verdicts_run_every_epoch() {
    let harness = Harness::new(ScriptedCompletion::default());
    let orchestrator = harness.builder(5).build().unwrap();

    let report = orchestrator
        .run(TOPIC, DEFAULT_MODE, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.epochs, 5);
    assert_eq!(report.stop_reason, StopReason::EpochsExhausted);
    assert_eq!(report.answer, "FINAL ANSWER");
    assert_eq!(report.answer_kind, AnswerKind::Synthesized);
    assert_eq!(report.summaries.len(), 5);
    assert_eq!(report.crawl_log.len(), 5);
    assert_eq!(harness.search.batches.lock().unwrap().len(), 5);

    let completion = &harness.completion;
    assert_eq!(completion.calls_of(CallKind::Evaluate).len(), 5);
    assert_eq!(completion.calls_of(CallKind::Final).len(), 1);
    assert_eq!(orchestrator.phase(), Phase::Done);
}

#[tokio::test]
async fn test_affirmative_verdict_stops_early() {
    let harness = Harness::new(ScriptedCompletion {
        verdicts: vec![
            "no".to_string(),
            "Yes\nSummary: the ownership rules are covered".to_string(),
        ],
        ..ScriptedCompletion::default()
    });
    let orchestrator = harness.builder(5).build().unwrap();

    let report = orchestrator
        .run(TOPIC, DEFAULT_MODE, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.epochs, 2);
    assert_eq!(report.stop_reason, StopReason::Sufficient);
    assert_eq!(harness.completion.calls_of(CallKind::Formulate).len(), 2);
    assert_eq!(harness.completion.calls_of(CallKind::Final).len(), 1);
}

#[tokio::test]
async fn test_failed_evaluation_continues() {
    let harness = Harness::new(ScriptedCompletion {
        fail_evaluate: true,
        verdicts: vec!["yes".to_string()],
        ..ScriptedCompletion::default()
    });
    let orchestrator = harness.builder(3).build().unwrap();

    let report = orchestrator
        .run(TOPIC, DEFAULT_MODE, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.epochs, 3);
    assert_eq!(report.stop_reason, StopReason::EpochsExhausted);
    assert_eq!(report.answer, "FINAL ANSWER");
}

#[tokio::test]
async fn test_first_epoch_searches_topic_when_formulation_fails() {
    let harness = Harness::new(ScriptedCompletion {
        formulate: vec!["I can't think of any searches.".to_string()],
        ..ScriptedCompletion::default()
    });
    let orchestrator = harness.builder(5).build().unwrap();

    let report = orchestrator
        .run("  rust/ownership  ", DEFAULT_MODE, CancellationToken::new())
        .await
        .unwrap();

    // Later epochs have nothing to search and are skipped, but still count
    let batches = harness.search.batches.lock().unwrap().clone();
    assert_eq!(batches, vec![vec!["rust,ownership".to_string()]]);
    assert_eq!(report.epochs, 5);
    assert_eq!(report.queries, vec!["rust,ownership".to_string()]);
}

#[tokio::test]
async fn test_topic_is_appended_after_formulated_queries() {
    let harness = Harness::new(ScriptedCompletion::default());
    let orchestrator = harness.builder(2).build().unwrap();

    let report = orchestrator
        .run(TOPIC, DEFAULT_MODE, CancellationToken::new())
        .await
        .unwrap();

    let batches = harness.search.batches.lock().unwrap().clone();
    assert_eq!(
        batches[0],
        vec!["rust ownership rules".to_string(), TOPIC.to_string()]
    );
    assert_eq!(batches[1], vec!["rust ownership rules".to_string()]);
    assert_eq!(
        report.queries,
        vec!["rust ownership rules", TOPIC, "rust ownership rules"]
    );
}

#[tokio::test]
async fn test_final_failure_joins_summaries() {
    let harness = Harness::new(ScriptedCompletion {
        final_answer: Err(CompletionError::Request("model crashed".to_string())),
        ..ScriptedCompletion::default()
    });
    let orchestrator = harness.builder(2).build().unwrap();

    let report = orchestrator
        .run(TOPIC, DEFAULT_MODE, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.answer_kind, AnswerKind::Concatenated);
    assert_eq!(report.summaries.len(), 2);
    assert_eq!(report.answer, report.summaries.join(SUMMARY_SEPARATOR));
}

#[tokio::test]
async fn test_summaries_are_cleaned_page_text() {
    let harness = Harness::new(ScriptedCompletion::default());
    let orchestrator = harness.builder(1).build().unwrap();

    let report = orchestrator
        .run(TOPIC, DEFAULT_MODE, CancellationToken::new())
        .await
        .unwrap();

    let expected = format!("page textfor{}", url_for("rust ownership rules"));
    assert_eq!(report.summaries, vec![expected]);
}

#[tokio::test]
async fn test_no_hits_still_calls_final_synthesis() {
    let harness = Harness::new(ScriptedCompletion::default()).with_search(ScriptedSearch {
        empty: true,
        ..ScriptedSearch::default()
    });
    let orchestrator = harness.builder(3).build().unwrap();

    let report = orchestrator
        .run(TOPIC, DEFAULT_MODE, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.epochs, 3);
    assert!(report.summaries.is_empty());
    assert_eq!(report.answer, "FINAL ANSWER");
    assert_eq!(report.answer_kind, AnswerKind::Synthesized);
    assert!(harness.completion.calls_of(CallKind::Evaluate).is_empty());
    assert_eq!(harness.completion.calls_of(CallKind::Final).len(), 1);
}

#[tokio::test]
async fn test_failed_final_with_nothing_gathered_gives_notice() {
    let harness = Harness::new(ScriptedCompletion {
        final_answer: Err(CompletionError::EmptyResponse),
        ..ScriptedCompletion::default()
    })
    .with_search(ScriptedSearch {
        empty: true,
        ..ScriptedSearch::default()
    });
    let orchestrator = harness.builder(2).build().unwrap();

    let report = orchestrator
        .run(TOPIC, DEFAULT_MODE, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.answer, NO_FINDINGS_ANSWER);
    assert_eq!(report.answer_kind, AnswerKind::NoFindings);
    assert_eq!(harness.completion.calls_of(CallKind::Final).len(), 1);
}

#[tokio::test]
async fn test_failed_selection_skips_epoch() {
    let harness = Harness::new(ScriptedCompletion {
        fail_select: true,
        ..ScriptedCompletion::default()
    });
    let orchestrator = harness.builder(3).build().unwrap();

    let report = orchestrator
        .run(TOPIC, DEFAULT_MODE, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.epochs, 3);
    assert_eq!(harness.search.batches.lock().unwrap().len(), 3);
    assert_eq!(harness.completion.calls_of(CallKind::Select).len(), 3);
    assert!(harness.completion.calls_of(CallKind::Evaluate).is_empty());
    assert_eq!(harness.fetcher.fetches.load(Ordering::SeqCst), 0);
    assert!(report.summaries.is_empty());
}

#[tokio::test]
async fn test_unusable_selection_fetches_every_hit() {
    let harness = Harness::new(ScriptedCompletion {
        select: "Honestly, none of these.".to_string(),
        ..ScriptedCompletion::default()
    });
    let orchestrator = harness.builder(1).build().unwrap();

    let report = orchestrator
        .run(TOPIC, DEFAULT_MODE, CancellationToken::new())
        .await
        .unwrap();

    // Formulated query plus the topic itself
    assert_eq!(harness.fetcher.fetches.load(Ordering::SeqCst), 2);
    assert_eq!(report.crawl_log.len(), 2);
}

#[tokio::test]
async fn test_sampling_settings_per_call() {
    let harness = Harness::new(ScriptedCompletion::default());
    let orchestrator = harness.builder(1).build().unwrap();
    orchestrator
        .run(TOPIC, DEFAULT_MODE, CancellationToken::new())
        .await
        .unwrap();

    let calls = harness.completion.calls.lock().unwrap().clone();
    assert!(calls.iter().all(|c| !c.reasoning));
    for call in &calls {
        let expected = if call.kind == CallKind::Final { 0.2 } else { 0.7 };
        assert_eq!(call.temperature, expected, "{:?}", call.kind);
    }
}

#[tokio::test]
async fn test_cancellation_mid_run_is_distinct() {
    let token = CancellationToken::new();
    let harness = Harness::new(ScriptedCompletion {
        cancel_on_evaluate: Some((1, token.clone())),
        ..ScriptedCompletion::default()
    });
    let orchestrator = harness.builder(5).build().unwrap();

    let err = orchestrator
        .run(TOPIC, DEFAULT_MODE, token)
        .await
        .unwrap_err();

    assert_eq!(err, ResearchError::Cancelled);
    assert!(err.is_cancelled());
    assert!(harness.completion.calls_of(CallKind::Final).is_empty());
    assert_eq!(harness.completion.calls_of(CallKind::Formulate).len(), 2);
    assert_eq!(orchestrator.phase(), Phase::Cancelled);
}

#[tokio::test]
async fn test_pre_cancelled_run_does_nothing() {
    let harness = Harness::new(ScriptedCompletion::default());
    let orchestrator = harness.builder(5).build().unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let err = orchestrator.run(TOPIC, DEFAULT_MODE, token).await.unwrap_err();

    assert_eq!(err, ResearchError::Cancelled);
    assert_eq!(harness.completion.total_calls(), 0);
    assert_eq!(harness.fetcher.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_completion() {
    let harness = Harness::new(ScriptedCompletion {
        hang_on_evaluate: true,
        ..ScriptedCompletion::default()
    });
    let orchestrator = Arc::new(harness.builder(5).build().unwrap());
    assert!(!orchestrator.cancel());

    let running = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .run(TOPIC, DEFAULT_MODE, CancellationToken::new())
                .await
        })
    };

    harness.completion.entered_evaluate.notified().await;
    assert!(orchestrator.cancel());

    let err = running.await.unwrap().unwrap_err();
    assert_eq!(err, ResearchError::Cancelled);
    assert!(harness.completion.calls_of(CallKind::Final).is_empty());

    // The run is over, nothing left to cancel
    assert!(!orchestrator.cancel());
}

#[tokio::test]
async fn test_blank_topic_is_rejected() {
    let harness = Harness::new(ScriptedCompletion::default());
    let orchestrator = harness.builder(5).build().unwrap();

    for topic in ["", "   \n\t"] {
        let err = orchestrator
            .run(topic, DEFAULT_MODE, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, ResearchError::InvalidTopic);
    }
    assert_eq!(harness.completion.total_calls(), 0);
}

#[tokio::test]
async fn test_snapshot_written_once_per_run() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::new(ScriptedCompletion::default());
    let orchestrator = harness
        .builder(1)
        .sink(Arc::new(JsonFileSink::new(tmp.path())))
        .build()
        .unwrap();

    orchestrator
        .run(TOPIC, "eval", CancellationToken::new())
        .await
        .unwrap();

    let files: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0]
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("rust ownership_"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
    assert_eq!(json["topic"], TOPIC);
    assert_eq!(json["epoch"], 1);
    assert_eq!(json["mode"], "eval");
    assert_eq!(json["summary_text"], "FINAL ANSWER");
    assert_eq!(json["have_query"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancelled_run_writes_no_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    let harness = Harness::new(ScriptedCompletion {
        cancel_on_evaluate: Some((0, token.clone())),
        ..ScriptedCompletion::default()
    });
    let orchestrator = harness
        .builder(3)
        .sink(Arc::new(JsonFileSink::new(tmp.path().join("out"))))
        .build()
        .unwrap();

    let err = orchestrator.run(TOPIC, DEFAULT_MODE, token).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(!tmp.path().join("out").exists());
}
