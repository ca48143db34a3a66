// tests/pipeline_alerts.rs
// End-to-end alert path: dedup routing, hourly flush, drill-down content.

mod common;

use common::{empty_news, harness, raw_item, FixedSummarizer, ScriptedSource};
use teams_alert_relay::callback::{self, CallbackAction, CallbackOutcome};
use teams_alert_relay::ingest;

const SENDER: &str = "noreply@winline.kz";

#[tokio::test]
async fn repeat_alert_is_aggregated_and_drillable() {
    let source = ScriptedSource::new(vec![
        raw_item("001", SENDER, "Ошибка STOPAZART", "ID игрока: 111"),
        raw_item("002", SENDER, "Ошибка STOPAZART", "ID игрока: 222"),
    ]);
    let h = harness(source, empty_news(), FixedSummarizer(None));

    let report = ingest::run_once(&h.ctx).await.expect("ingest");
    assert_eq!(report.fetched, 2);
    assert_eq!(report.immediate, 1);
    assert_eq!(report.aggregated, 1);

    // the first occurrence notified immediately
    let sent = h.transport.sent_texts();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("New alert"));
    assert!(sent[0].contains("STOPAZART"));

    // cursor advanced to the last ingested id
    assert_eq!(h.ctx.store.load_cursor().unwrap().as_deref(), Some("002"));

    // hourly flush: one summary covering only the second occurrence
    let summary_id = h
        .ctx
        .aggregator
        .flush(&h.ctx.guard, &h.ctx.destination)
        .await
        .expect("flush")
        .expect("summary emitted");
    let sent = h.transport.sent_texts();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].contains("STOPAZART*: 1"));

    // keyboard repair: the stored row id is on the expand control
    let edits = h.transport.edits.lock().unwrap().clone();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].text, None);
    assert_eq!(edits[0].controls[0].action, format!("expand_{summary_id}"));
    drop(edits);

    // drill-down shows the aggregated occurrence only
    let outcome = callback::handle_action(
        &h.ctx.store,
        h.transport.as_ref(),
        CallbackAction::Expand(summary_id),
    )
    .await
    .expect("expand");
    assert_eq!(outcome, CallbackOutcome::Toggled);
    let edits = h.transport.edits.lock().unwrap();
    let expanded = edits.last().unwrap().text.clone().expect("text edit");
    assert!(expanded.contains("*STOPAZART* (1): `222`"));
    assert!(!expanded.contains("111"));
}

#[tokio::test]
async fn flush_without_occurrences_sends_nothing() {
    let h = harness(
        ScriptedSource::new(vec![]),
        empty_news(),
        FixedSummarizer(None),
    );
    let flushed = h
        .ctx
        .aggregator
        .flush(&h.ctx.guard, &h.ctx.destination)
        .await
        .expect("flush");
    assert_eq!(flushed, None);
    assert_eq!(h.transport.send_count(), 0);
}

#[tokio::test]
async fn alerts_reopen_after_epoch_reset() {
    let source = ScriptedSource::new(vec![raw_item(
        "001",
        SENDER,
        "Ошибка STOPAZART",
        "ID игрока: 111",
    )]);
    let h = harness(source, empty_news(), FixedSummarizer(None));

    ingest::run_once(&h.ctx).await.expect("ingest");
    assert_eq!(h.transport.send_count(), 1);

    // same category later the same day: routed to the aggregator
    *h.source.items.lock().unwrap() = vec![raw_item(
        "002",
        SENDER,
        "Ошибка STOPAZART",
        "ID игрока: 333",
    )];
    ingest::run_once(&h.ctx).await.expect("ingest");
    assert_eq!(h.transport.send_count(), 1);

    // after the reset the key alerts again as new
    h.ctx.store.reset_seen("next-day").unwrap();
    *h.source.items.lock().unwrap() = vec![raw_item(
        "003",
        SENDER,
        "Ошибка STOPAZART",
        "ID игрока: 444",
    )];
    ingest::run_once(&h.ctx).await.expect("ingest");
    assert_eq!(h.transport.send_count(), 2);
}

#[tokio::test]
async fn informational_items_become_a_digest() {
    let source = ScriptedSource::new(vec![
        raw_item("001", "colleague@corp.kz", "Отчёт за неделю", "Все метрики в норме."),
        raw_item("002", SENDER, "Ошибка STOPAZART", "ID игрока: 111"),
    ]);
    let h = harness(
        source,
        empty_news(),
        FixedSummarizer(Some("Short digest.".to_string())),
    );

    let report = ingest::run_once(&h.ctx).await.expect("ingest");
    assert!(report.digest_sent);
    assert_eq!(report.immediate, 1);

    let sent = h.transport.sent_texts();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().any(|t| t.contains("Channel digest") && t.contains("Short digest.")));
}

#[tokio::test]
async fn digest_degrades_to_excerpts_when_summarizer_fails() {
    let source = ScriptedSource::new(vec![raw_item(
        "001",
        "colleague@corp.kz",
        "Отчёт за неделю",
        "Все метрики в норме.",
    )]);
    let h = harness(source, empty_news(), FixedSummarizer(None));

    let report = ingest::run_once(&h.ctx).await.expect("ingest");
    assert!(report.digest_sent);
    let sent = h.transport.sent_texts();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Отчёт за неделю"));
    assert!(sent[0].contains("Все метрики в норме"));
}
