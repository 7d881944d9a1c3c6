mod support;

use std::sync::Arc;
use std::time::Duration;

use stealthfetch_rs::{
    BatchCoordinator, BatchError, DestinationValidator, FailureKind, FetchProfile,
    RetryOrchestrator, RetryPolicy,
};
use tokio::time::Instant;

use support::{ARTICLE, ScriptedProvider, Step};

fn coordinator(provider: ScriptedProvider) -> BatchCoordinator<ScriptedProvider> {
    let orchestrator = RetryOrchestrator::new(Arc::new(provider))
        .with_validator(DestinationValidator::new().with_resolver(support::offline_resolver()));
    BatchCoordinator::new(Arc::new(orchestrator))
        .with_retry(RetryPolicy::new(1))
        .with_max_batch_size(5)
}

#[tokio::test(start_paused = true)]
async fn results_follow_input_order() {
    let provider = ScriptedProvider::serving(ARTICLE)
        .script("https://b.example/", [Step::transport("reset")]);
    let batch = coordinator(provider);
    let urls = [
        "https://a.example/",
        "https://b.example/",
        "http://127.0.0.1/admin",
        "https://c.example/",
    ];

    let result = batch
        .run_batch(&urls, &FetchProfile::minimal(), Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(result.total, 4);
    assert_eq!(result.successful, 2);
    assert_eq!(result.failed, 2);
    assert_eq!(result.successful + result.failed, result.total);
    assert_eq!(result.results.len(), urls.len());

    let first = result.results[0].as_ref().unwrap();
    assert_eq!(first.final_url.as_str(), "https://a.example/");
    assert_eq!(
        result.results[1].as_ref().unwrap_err().root().kind(),
        FailureKind::TransportError
    );
    assert_eq!(
        result.results[2].as_ref().unwrap_err().kind(),
        FailureKind::InvalidDestination
    );
    assert_eq!(
        result.results[3].as_ref().unwrap().final_url.as_str(),
        "https://c.example/"
    );
}

#[tokio::test]
async fn empty_batch_is_all_zero() {
    let batch = coordinator(ScriptedProvider::serving(ARTICLE));
    let urls: [&str; 0] = [];
    let result = batch
        .run_batch(&urls, &FetchProfile::minimal(), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!((result.total, result.successful, result.failed), (0, 0, 0));
    assert!(result.results.is_empty());
}

#[tokio::test]
async fn oversized_batches_are_refused_up_front() {
    let provider = ScriptedProvider::serving(ARTICLE);
    let batch = coordinator(provider);
    let urls: Vec<String> = (0..6).map(|i| format!("https://site{i}.example/")).collect();

    let err = batch
        .run_batch(&urls, &FetchProfile::minimal(), Duration::ZERO)
        .await
        .unwrap_err();
    assert_eq!(err, BatchError::TooLarge { size: 6, limit: 5 });
}

#[tokio::test(start_paused = true)]
async fn starts_are_spaced_by_the_delay() {
    let batch = coordinator(ScriptedProvider::serving(ARTICLE));
    let urls = ["https://a.example/", "https://b.example/", "https://c.example/"];

    let started = Instant::now();
    let result = batch
        .run_batch(&urls, &FetchProfile::minimal(), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(result.successful, 3);
    // no wait before the first URL or after the last one
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(4), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn enormous_delay_waits_instead_of_panicking() {
    let orchestrator = Arc::new(
        RetryOrchestrator::new(Arc::new(ScriptedProvider::serving(ARTICLE)))
            .with_validator(DestinationValidator::new().with_resolver(support::offline_resolver())),
    );
    let batch = BatchCoordinator::new(orchestrator.clone()).with_retry(RetryPolicy::new(1));
    let urls = ["https://a.example/", "https://b.example/"];

    let profile = FetchProfile::minimal();
    let run = batch.run_batch(&urls, &profile, Duration::MAX);
    let waited = tokio::time::timeout(Duration::from_secs(60), run).await;
    assert!(waited.is_err(), "second URL must still be waiting");
    assert_eq!(orchestrator.provider().fetches(), 1);
}
