// tests/crawl_pipeline.rs
//
// End-to-end runs of the crawler job over scripted sources.
//
// Covered:
// - idempotence across runs
// - failure isolation between sources
// - fail-closed classification
// - deterministic dedup across sources
// - run time budget truncation
// - per-candidate persistence failures
// - atomic transactions through the pipeline
// - catastrophic pre-flight failure

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use legal_news_crawler::classify::{KeywordClassifier, RelevanceGate};
use legal_news_crawler::config::JobConfig;
use legal_news_crawler::error::{CrawlError, JobError};
use legal_news_crawler::store::{DynStore, Lawyer, LawyerId, MemoryStore};

fn legal_feed() -> String {
    rss(&[
        (
            "Jury returns verdict in Smith v. Jones",
            "https://a.example/smith-v-jones",
            "Attorney Maria Lopez said the plaintiffs will appeal.",
        ),
        (
            "Acme sued over pension fund losses",
            "https://a.example/acme-pension?utm_source=rss",
            "The lawsuit was filed in federal court; David Okafor represents the retirees.",
        ),
        (
            "Local bakery wins best croissant award",
            "https://a.example/bakery",
            "Judges praised the flaky layers.",
        ),
    ])
}

#[tokio::test]
async fn second_run_on_identical_input_creates_nothing() {
    let store = Arc::new(MemoryStore::with_lawyers(lawyers()));
    let fetcher = Arc::new(ScriptedFetcher::new().reply("a", Reply::Body(legal_feed())));
    let gate = RelevanceGate::new(
        Arc::new(KeywordClassifier::embedded().unwrap()),
        0.5,
        Duration::from_secs(5),
    );
    let j = job(registry(&["a"]), fetcher, gate, store.clone());

    let first = j.run().await.unwrap();
    assert!(first.success);
    assert_eq!(first.sources_processed, 1);
    assert_eq!(first.articles_found, 3);
    assert_eq!(first.cases_created, 2, "bakery story is not legal news");
    assert_eq!(first.lawyer_associations_created, 2);
    assert!(first.errors.is_empty());

    let second = j.run().await.unwrap();
    assert!(second.success);
    assert_eq!(second.cases_created, 0);
    assert_eq!(second.cases_updated, 2);
    assert_eq!(second.lawyer_associations_created, 0);

    assert_eq!(store.cases().len(), 2);
    assert_eq!(store.associations().len(), 2);
}

#[tokio::test]
async fn one_broken_source_does_not_stop_the_others() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .reply(
                "a",
                Reply::Fail(CrawlError::Fetch {
                    attempts: 3,
                    message: "HTTP 503".into(),
                }),
            )
            .reply(
                "b",
                Reply::Body(rss(&[("Court blocks merger", "https://b.example/1", "")])),
            )
            .reply(
                "c",
                Reply::Body(rss(&[("Lawsuit targets insurer", "https://c.example/1", "")])),
            ),
    );
    let j = job(
        registry(&["a", "b", "c"]),
        fetcher.clone(),
        gate(LegalWordsClassifier),
        store.clone(),
    );

    let s = j.run().await.unwrap();
    assert_eq!(fetcher.calls(), vec!["a", "b", "c"]);
    assert!(s.success);
    assert_eq!(s.sources_processed, 3);
    assert_eq!(s.cases_created, 2);
    assert_eq!(s.errors.len(), 1);
    assert_eq!(s.errors[0].source_id, "a");
    assert!(s.errors[0].message.contains("HTTP 503"));
}

#[tokio::test]
async fn unreachable_classifier_creates_no_cases() {
    let store = Arc::new(MemoryStore::with_lawyers(lawyers()));
    let fetcher = Arc::new(ScriptedFetcher::new().reply("a", Reply::Body(legal_feed())));
    let down = Arc::new(DownClassifier {
        calls: AtomicUsize::new(0),
    });
    let g = RelevanceGate::new(down.clone(), 0.0, Duration::from_secs(5));
    let j = job(registry(&["a"]), fetcher, g, store.clone());

    let s = j.run().await.unwrap();
    assert_eq!(down.calls.load(Ordering::SeqCst), 3);
    assert!(s.success);
    assert_eq!(s.articles_found, 3);
    assert_eq!(s.cases_created, 0);
    assert!(s.errors.is_empty(), "classifier failures are not run errors");
    assert!(store.cases().is_empty());
}

#[tokio::test]
async fn restyled_headline_from_another_source_maps_to_one_case() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .reply(
                "a",
                Reply::Body(rss(&[(
                    "Court dismisses lawsuit against Globex",
                    "https://a.example/globex",
                    "",
                )])),
            )
            .reply(
                "b",
                Reply::Body(rss(&[(
                    "COURT DISMISSES THE LAWSUIT AGAINST GLOBEX!",
                    "https://b.example/news/77",
                    "",
                )])),
            ),
    );
    let j = job(
        registry(&["a", "b"]),
        fetcher,
        gate(LegalWordsClassifier),
        store.clone(),
    );

    let s = j.run().await.unwrap();
    assert_eq!(s.cases_created, 1);
    assert_eq!(s.cases_updated, 1);
    let cases = store.cases();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].source_article_url, "https://a.example/globex");
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_fails_inflight_and_skips_the_rest() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .reply(
                "a",
                Reply::Body(rss(&[("Court hears appeal", "https://a.example/1", "")])),
            )
            .reply(
                "b",
                Reply::Slow(
                    Duration::from_secs(600),
                    rss(&[("Court never seen", "https://b.example/1", "")]),
                ),
            )
            .reply(
                "c",
                Reply::Body(rss(&[("Lawsuit filed", "https://c.example/1", "")])),
            ),
    );
    let j = job(
        registry(&["a", "b", "c"]),
        fetcher.clone(),
        gate(LegalWordsClassifier),
        store.clone(),
    )
    .with_time_budget(Duration::from_secs(30));

    let s = j.run().await.unwrap();
    assert!(!s.success);
    assert_eq!(s.sources_processed, 2, "a completed, b was in flight");
    assert_eq!(s.cases_created, 1);
    assert_eq!(s.errors.len(), 2);
    assert_eq!(s.errors[0].source_id, "b");
    assert!(s.errors[0].message.contains("time budget"));
    assert_eq!(s.errors[1].source_id, "c");
    assert!(s.errors[1].message.starts_with("skipped:"));
    assert_eq!(fetcher.calls(), vec!["a", "b"]);
    assert_eq!(store.cases().len(), 1);
}

#[tokio::test]
async fn failed_write_skips_only_that_candidate() {
    let inner = Arc::new(MemoryStore::new());
    let mut faulty = FaultyStore::wrap(inner.clone());
    faulty.poison = Some("Initech".into());
    let store: DynStore = Arc::new(faulty);

    let fetcher = Arc::new(ScriptedFetcher::new().reply(
        "a",
        Reply::Body(rss(&[
            ("Court fines Hooli", "https://a.example/1", ""),
            ("Initech sued by former staff", "https://a.example/2", ""),
            ("Verdict due in Vandelay case", "https://a.example/3", ""),
        ])),
    ));
    let j = job(registry(&["a"]), fetcher, gate(LegalWordsClassifier), store);

    let s = j.run().await.unwrap();
    assert!(s.success, "candidate failures do not fail the source");
    assert_eq!(s.sources_processed, 1);
    assert_eq!(s.cases_created, 2);
    assert_eq!(s.errors.len(), 1);
    assert_eq!(s.errors[0].source_id, "a");
    assert!(s.errors[0].message.starts_with("persistence failed"));
    assert_eq!(inner.cases().len(), 2);
}

#[tokio::test]
async fn rejected_transaction_leaves_neither_case_nor_links() {
    // The directory advertises a lawyer the store does not know, so the
    // association write fails and the case write must roll back with it.
    let inner = Arc::new(MemoryStore::with_lawyers(lawyers()));
    let mut faulty = FaultyStore::wrap(inner.clone());
    faulty.extra_lawyers = vec![Lawyer {
        id: LawyerId(99),
        full_name: "Ghost Counsel".into(),
        firm: None,
    }];
    let store: DynStore = Arc::new(faulty);

    let fetcher = Arc::new(ScriptedFetcher::new().reply(
        "a",
        Reply::Body(rss(&[(
            "Court appoints Ghost Counsel and Maria Lopez",
            "https://a.example/1",
            "",
        )])),
    ));
    let j = job(registry(&["a"]), fetcher, gate(LegalWordsClassifier), store);

    let s = j.run().await.unwrap();
    assert_eq!(s.cases_created, 0);
    assert_eq!(s.lawyer_associations_created, 0);
    assert_eq!(s.errors.len(), 1);
    assert!(inner.cases().is_empty());
    assert!(inner.associations().is_empty());
}

#[tokio::test]
async fn unreachable_store_is_catastrophic_and_touches_no_source() {
    let mut faulty = FaultyStore::wrap(Arc::new(MemoryStore::new()));
    faulty.offline = true;
    let fetcher = Arc::new(ScriptedFetcher::new());
    let j = job(
        registry(&["a", "b"]),
        fetcher.clone(),
        gate(LegalWordsClassifier),
        Arc::new(faulty),
    );

    let err = j.run().await.unwrap_err();
    assert!(matches!(err, JobError::StoreUnavailable(_)));
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn empty_registry_is_a_successful_empty_run() {
    let j = job(
        registry(&[]),
        Arc::new(ScriptedFetcher::new()),
        gate(LegalWordsClassifier),
        Arc::new(MemoryStore::new()),
    );
    let s = j.run().await.unwrap();
    assert!(s.success);
    assert_eq!(s.sources_processed, 0);
    assert!(s.errors.is_empty());
}

#[tokio::test]
async fn malformed_source_url_is_a_parse_failure() {
    let mut bad = rss_source("bad");
    bad.url = "ftp://bad.example/feed".into();
    let reg = legal_news_crawler::ingest::registry::SourceRegistry::new(vec![
        bad,
        rss_source("ok"),
    ])
    .unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new().reply(
        "ok",
        Reply::Body(rss(&[("Court ruling", "https://ok.example/1", "")])),
    ));
    let j = job(reg, fetcher.clone(), gate(LegalWordsClassifier), Arc::new(MemoryStore::new()));

    let s = j.run().await.unwrap();
    assert_eq!(fetcher.calls(), vec!["ok"], "bad source is never fetched");
    assert_eq!(s.sources_processed, 2);
    assert_eq!(s.errors.len(), 1);
    assert!(s.errors[0].message.starts_with("unparseable source"));
    assert!(s.success);
}

#[tokio::test(start_paused = true)]
async fn concurrent_fetches_keep_registration_order() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .reply(
                "a",
                Reply::Slow(
                    Duration::from_secs(5),
                    rss(&[("Court rules on Acme merger", "https://a.example/1", "")]),
                ),
            )
            .reply(
                "b",
                Reply::Slow(
                    Duration::from_secs(1),
                    rss(&[("Court rules on Acme mergers", "https://b.example/1", "")]),
                ),
            )
            .reply(
                "c",
                Reply::Body(rss(&[("Lawsuit over Acme", "https://c.example/1", "")])),
            ),
    );
    let cfg = JobConfig {
        fetch_concurrency: 3,
        ..JobConfig::default()
    };
    let j = job(
        registry(&["a", "b", "c"]),
        fetcher,
        gate(LegalWordsClassifier),
        store.clone(),
    )
    .with_job_config(&cfg);

    let s = j.run().await.unwrap();
    assert!(s.success);
    assert_eq!(s.sources_processed, 3);
    let cases = store.cases();
    // a is written first even though its fetch finished last.
    assert_eq!(cases[0].source_article_url, "https://a.example/1");
    // b's headline is a fuzzy duplicate of a's.
    assert_eq!(s.cases_created, 2);
    assert_eq!(s.cases_updated, 1);
}

#[tokio::test(start_paused = true)]
async fn lookahead_fetch_progresses_while_earlier_source_is_processed() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .reply(
                "a",
                Reply::Body(rss(&[("Court issues slow ruling", "https://a.example/1", "")])),
            )
            .reply(
                "b",
                Reply::Steps(
                    4,
                    Duration::from_secs(1),
                    rss(&[("Lawsuit filed over dam", "https://b.example/1", "")]),
                ),
            ),
    );
    let cfg = JobConfig {
        fetch_concurrency: 2,
        ..JobConfig::default()
    };
    let j = job(
        registry(&["a", "b"]),
        fetcher,
        gate(SlowClassifier {
            delay: Duration::from_secs(4),
        }),
        store.clone(),
    )
    .with_job_config(&cfg)
    .with_time_budget(Duration::from_millis(6500));

    // b's four steps overlap a's four seconds of classification.
    let s = j.run().await.unwrap();
    assert!(s.success, "{:?}", s.errors);
    assert_eq!(s.cases_created, 2);
    assert!(s.errors.is_empty());
}
