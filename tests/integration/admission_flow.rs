//! End-to-end admission behaviour through the runtime's queue and worker.

use crate::helpers::{FlakyDriver, build_runtime, fast_config, start_connected};
use electra::admission::replies;
use electra::admission::{Rule, SubmitOutcome};
use electra::channels::traits::{InboundMessage, MediaKind};
use electra::generator::GenerateError;
use std::time::Duration;

fn text(sender: &str, body: &str) -> InboundMessage {
    InboundMessage::text(sender, body)
}

async fn submit(runtime: &electra::Runtime, message: InboundMessage) -> SubmitOutcome {
    runtime.queue().submit(message).await
}

#[tokio::test]
async fn handoff_round_trip_then_generated_reply_with_footer() {
    let (mut runtime, fakes) = build_runtime(fast_config(), FlakyDriver::default());
    let handles = start_connected(&mut runtime, &fakes).await;
    let sender = "50760001111";

    assert_eq!(
        submit(&runtime, text(sender, "Hola")).await,
        SubmitOutcome::Processed(Rule::Shortcut)
    );
    assert_eq!(
        submit(&runtime, text(sender, "quiero hablar con un agente")).await,
        SubmitOutcome::Processed(Rule::HandoffRequested)
    );
    assert_eq!(
        submit(&runtime, text(sender, "¿siguen ahí?")).await,
        SubmitOutcome::Processed(Rule::Paused)
    );
    assert_eq!(
        submit(&runtime, text(sender, "volver al bot")).await,
        SubmitOutcome::Processed(Rule::ReturnedToBot)
    );

    fakes
        .generator
        .push(Ok("La laptop X cuesta $850.".to_owned()));
    assert_eq!(
        submit(&runtime, text(sender, "precio de la laptop X")).await,
        SubmitOutcome::Processed(Rule::Generated)
    );

    let sent = fakes.messenger.sent_to(sender);
    assert_eq!(sent.len(), 4, "paused message must stay silent");
    assert_eq!(sent[0], replies::WELCOME);
    assert_eq!(sent[1], replies::HUMAN_REQUEST);
    assert_eq!(sent[2], replies::WELCOME_BACK);
    assert!(sent[3].starts_with("La laptop X cuesta $850."));
    assert!(sent[3].ends_with(replies::PURCHASE_FOOTER));
    assert_eq!(fakes.generator.calls(), 1);

    runtime.stop(handles).await;
}

#[tokio::test]
async fn repeats_escalate_to_cooldown_and_silence() {
    let (mut runtime, fakes) = build_runtime(fast_config(), FlakyDriver::default());
    let handles = start_connected(&mut runtime, &fakes).await;

    let mut rules = Vec::new();
    for _ in 0..5 {
        match submit(&runtime, text("B", "tienen envíos")).await {
            SubmitOutcome::Processed(rule) => rules.push(rule),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(
        rules,
        vec![
            Rule::Generated,
            Rule::Repeated,
            Rule::Repeated,
            Rule::RepeatSpam,
            Rule::CoolingDown,
        ]
    );
    let sent = fakes.messenger.sent_to("B");
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[3], replies::SPAM_WARNING);

    runtime.stop(handles).await;
}

#[tokio::test]
async fn rate_limit_applies_per_sender() {
    let mut config = fast_config();
    config.admission.max_messages_per_window = 3;
    let (mut runtime, fakes) = build_runtime(config, FlakyDriver::default());
    let handles = start_connected(&mut runtime, &fakes).await;

    for i in 0..3 {
        assert_eq!(
            submit(&runtime, text("C", &format!("consulta {i}"))).await,
            SubmitOutcome::Processed(Rule::Generated)
        );
    }
    assert_eq!(
        submit(&runtime, text("C", "consulta 3")).await,
        SubmitOutcome::Processed(Rule::RateLimited)
    );
    assert_eq!(
        submit(&runtime, text("D", "consulta 0")).await,
        SubmitOutcome::Processed(Rule::Generated)
    );
    assert_eq!(
        fakes.messenger.sent_to("C").last().map(String::as_str),
        Some(replies::RATE_LIMIT)
    );

    runtime.stop(handles).await;
}

#[tokio::test]
async fn spam_content_sets_cooldown() {
    let (mut runtime, fakes) = build_runtime(fast_config(), FlakyDriver::default());
    let handles = start_connected(&mut runtime, &fakes).await;

    assert_eq!(
        submit(&runtime, text("E", "Gana dinero con bitcoin")).await,
        SubmitOutcome::Processed(Rule::Spam)
    );
    assert_eq!(
        submit(&runtime, text("E", "hola")).await,
        SubmitOutcome::Processed(Rule::CoolingDown)
    );
    assert_eq!(fakes.messenger.sent_to("E"), vec![replies::SPAM_WARNING.to_owned()]);
    assert_eq!(fakes.generator.calls(), 0);

    runtime.stop(handles).await;
}

#[tokio::test]
async fn media_pauses_sender_until_return_keyword() {
    let (mut runtime, fakes) = build_runtime(fast_config(), FlakyDriver::default());
    let handles = start_connected(&mut runtime, &fakes).await;

    assert_eq!(
        submit(&runtime, InboundMessage::media("F", MediaKind::Image, "")).await,
        SubmitOutcome::Processed(Rule::Media)
    );
    assert_eq!(
        submit(&runtime, text("F", "garantía")).await,
        SubmitOutcome::Processed(Rule::Paused)
    );
    assert_eq!(
        submit(&runtime, text("F", "bot")).await,
        SubmitOutcome::Processed(Rule::ReturnedToBot)
    );
    let sent = fakes.messenger.sent_to("F");
    assert_eq!(sent.len(), 2);
    assert!(sent[0].contains("una imagen"));

    runtime.stop(handles).await;
}

#[tokio::test]
async fn generator_timeouts_are_retried_then_answered() {
    let mut config = fast_config();
    config.generator.max_timeout_retries = 2;
    let (mut runtime, fakes) = build_runtime(config, FlakyDriver::default());
    let handles = start_connected(&mut runtime, &fakes).await;

    let timeout = Duration::from_secs(60);
    fakes.generator.push(Err(GenerateError::Timeout(timeout)));
    fakes.generator.push(Err(GenerateError::Timeout(timeout)));
    fakes.generator.push(Ok("Sí, hacemos envíos.".to_owned()));

    assert_eq!(
        submit(&runtime, text("G", "hacen envíos")).await,
        SubmitOutcome::Processed(Rule::Generated)
    );
    assert_eq!(fakes.generator.calls(), 3);
    assert_eq!(fakes.messenger.sent_to("G"), vec!["Sí, hacemos envíos.".to_owned()]);

    runtime.stop(handles).await;
}

#[tokio::test]
async fn eviction_drops_oldest_and_retry_is_processed_once() {
    let mut config = fast_config();
    config.admission.queue_capacity = 2;
    let (mut runtime, fakes) = build_runtime(config, FlakyDriver::default());

    // Fill the queue before the worker runs.
    let (_, first) = runtime
        .queue()
        .enqueue(text("H", "consulta a").with_id("wamid.a"));
    let (_, second) = runtime
        .queue()
        .enqueue(text("H", "consulta b").with_id("wamid.b"));
    let (_, third) = runtime
        .queue()
        .enqueue(text("H", "consulta c").with_id("wamid.c"));
    assert_eq!(first.await.unwrap(), SubmitOutcome::Dropped);

    let handles = start_connected(&mut runtime, &fakes).await;
    assert_eq!(second.await.unwrap(), SubmitOutcome::Processed(Rule::Generated));
    assert_eq!(third.await.unwrap(), SubmitOutcome::Processed(Rule::Generated));

    // The dropped message was never processed, so its redelivery counts once.
    let retry = text("H", "consulta a").with_id("wamid.a");
    assert_eq!(
        submit(&runtime, retry.clone()).await,
        SubmitOutcome::Processed(Rule::Generated)
    );
    assert_eq!(
        submit(&runtime, retry).await,
        SubmitOutcome::Processed(Rule::Duplicate)
    );
    assert_eq!(fakes.generator.calls(), 3);
    assert_eq!(fakes.messenger.total(), 3);
    assert_eq!(runtime.queue().stats().dropped_total, 1);

    runtime.stop(handles).await;
}
