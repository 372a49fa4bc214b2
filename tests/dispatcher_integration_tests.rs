//! Dispatcher integration over wiremock-backed source sites: full scrape
//! requests flowing search → fetch → Bronze → Silver → Gold → Operational,
//! plus deadline and malformed-payload behavior.

mod common;

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{dispatcher_with_adapters, fetch_config};
use trackgraph_backend::models::{
    ScrapeErrorKind, ScrapeRequest, ScrapeStatus, SourceSite,
};
use trackgraph_backend::services::adapters::{MixesDbAdapter, RedditAdapter};
use trackgraph_backend::services::FetchService;
use trackgraph_backend::storage::{BronzeStore, GoldStore, OperationalStore};

fn search_page(server_uri: &str, count: usize) -> String {
    let items: String = (1..=count)
        .map(|i| {
            format!(
                r#"<li><div class="mw-search-result-heading">
                     <a href="{}/db/mix{}">Mix {}</a></div></li>"#,
                server_uri, i, i
            )
        })
        .collect();
    format!(r#"<ul class="mw-search-results">{}</ul>"#, items)
}

const MIX_PAGE: &str = r#"
    <h1 id="firstHeading">Adam Beyer @ Awakenings</h1>
    <div class="list-track"><ol>
      <li>Adam Beyer - Your Mind</li>
      <li>Amelie Lens - Contradictions</li>
      <li>Charlotte de Witte - Selected</li>
    </ol></div>"#;

async fn mixesdb_dispatcher(
    server: &MockServer,
    workers: usize,
) -> (
    trackgraph_backend::services::ScrapeDispatcher,
    trackgraph_backend::storage::Stores,
) {
    let fetch = FetchService::new(fetch_config());
    let adapter = MixesDbAdapter::new(fetch).with_base_url(server.uri());
    dispatcher_with_adapters(vec![Arc::new(adapter)], workers)
}

#[tokio::test]
async fn scrape_request_flows_to_the_operational_graph() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/db/index.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page(&server.uri(), 1)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/db/mix1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MIX_PAGE))
        .mount(&server)
        .await;

    let (dispatcher, stores) = mixesdb_dispatcher(&server, 4).await;

    let request = ScrapeRequest::new(SourceSite::MixesDb, "Adam Beyer");
    let report = dispatcher.execute(request).await.unwrap();

    assert_eq!(report.status, ScrapeStatus::Completed);
    assert_eq!(report.playlists_scraped, 1);
    assert_eq!(report.tracks_extracted, 3);
    assert_eq!(report.transitions_created, 2);
    assert_eq!(report.bronze_playlist_ids.len(), 1);
    assert!(report.errors.is_empty());

    assert_eq!(stores.bronze.playlist_count().await.unwrap(), 1);
    assert_eq!(stores.gold.all_transitions().await.unwrap().len(), 2);
    let graph = stores.operational.graph().await.unwrap();
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 2);
}

#[tokio::test]
async fn mixed_outcomes_surface_per_url_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/db/index.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page(&server.uri(), 2)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/db/mix1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MIX_PAGE))
        .mount(&server)
        .await;
    // mix2 vanished.
    Mock::given(method("GET"))
        .and(path("/db/mix2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (dispatcher, _stores) = mixesdb_dispatcher(&server, 4).await;
    let report = dispatcher
        .execute(ScrapeRequest::new(SourceSite::MixesDb, "Adam Beyer"))
        .await
        .unwrap();

    assert_eq!(report.status, ScrapeStatus::Partial);
    assert_eq!(report.playlists_scraped, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, ScrapeErrorKind::NotFound);
    assert!(report.errors[0].url.contains("/db/mix2"));
}

#[tokio::test]
async fn unknown_source_is_rejected() {
    let server = MockServer::start().await;
    let (dispatcher, _stores) = mixesdb_dispatcher(&server, 4).await;

    // Registry only knows mixesdb; ask for beatport.
    let error = dispatcher
        .execute(ScrapeRequest::new(SourceSite::Beatport, "query"))
        .await
        .unwrap_err();
    assert_eq!(error.error_code(), "UNKNOWN_SOURCE");
}

#[tokio::test]
async fn deadline_elapsing_mid_request_yields_partial_and_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/db/index.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page(&server.uri(), 20)))
        .mount(&server)
        .await;
    // Every playlist page takes ~1s.
    Mock::given(method("GET"))
        .and(path_regex(r"^/db/mix\d+$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(MIX_PAGE)
                .set_delay(Duration::from_secs(1)),
        )
        .mount(&server)
        .await;

    // Serial workers: roughly one page per second against a 2s budget.
    let (dispatcher, stores) = mixesdb_dispatcher(&server, 1).await;

    let mut request = ScrapeRequest::new(SourceSite::MixesDb, "Adam Beyer");
    request.limit = 20;
    request.options.timeout_seconds = 2;
    request.options.max_retries = 0;

    let started = std::time::Instant::now();
    let report = dispatcher.execute(request).await.unwrap();
    let elapsed = started.elapsed();

    // Returns within a small epsilon of the deadline (plus reply grace,
    // which is idle here because the pipeline is local and fast).
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);

    assert_eq!(report.status, ScrapeStatus::Partial);
    assert!(
        (1..=2).contains(&report.playlists_scraped),
        "scraped {}",
        report.playlists_scraped
    );
    let cancelled = report
        .errors
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                ScrapeErrorKind::Cancelled | ScrapeErrorKind::DeadlineExceeded
            )
        })
        .count();
    assert_eq!(cancelled, report.errors.len(), "only deadline errors");
    assert_eq!(report.playlists_scraped + report.errors.len(), 20);

    // No torn Bronze writes: every stored playlist is complete.
    for playlist_id in &report.bronze_playlist_ids {
        let tracks = stores.bronze.playlist_tracks(*playlist_id).await.unwrap();
        assert_eq!(tracks.len(), 3);
    }
}

#[tokio::test]
async fn malformed_tracklist_positions_reject_without_side_effects() {
    let server = MockServer::start().await;

    // A reddit post whose numbered tracklist skips position 3.
    let post_body = "1. Adam Beyer - Your Mind\n2. Amelie Lens - Contradictions\n4. Charlotte de Witte - Selected";
    let search_json = serde_json::json!({
        "data": { "children": [
            { "data": { "id": "bad1", "title": "gapped set", "selftext": post_body,
                        "author": "dj", "permalink": "/r/DJSetLists/comments/bad1/set/",
                        "over_18": false, "is_self": true } }
        ] }
    });
    let post_json = serde_json::json!([
        { "data": { "children": [
            { "data": { "id": "bad1", "title": "gapped set", "selftext": post_body,
                        "author": "dj", "permalink": "/r/DJSetLists/comments/bad1/set/",
                        "over_18": false, "is_self": true } }
        ] } },
        { "data": { "children": [] } }
    ]);

    Mock::given(method("GET"))
        .and(path_regex(r"^/r/.+/search\.json$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&search_json))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/r/.+\.json$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&post_json))
        .mount(&server)
        .await;

    let fetch = FetchService::new(fetch_config());
    let adapter = RedditAdapter::new(fetch).with_base_url(server.uri());
    let (dispatcher, stores) = dispatcher_with_adapters(vec![Arc::new(adapter)], 2);

    let report = dispatcher
        .execute(ScrapeRequest::new(SourceSite::Reddit, "gapped set"))
        .await
        .unwrap();

    assert_eq!(report.status, ScrapeStatus::Failed);
    assert!(report.bronze_playlist_ids.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].kind, ScrapeErrorKind::InvalidPayload);

    // Nothing is visible in any layer.
    assert_eq!(stores.bronze.playlist_count().await.unwrap(), 0);
    assert!(stores.gold.all_transitions().await.unwrap().is_empty());
}

#[tokio::test]
async fn stats_accumulate_across_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/db/index.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page(&server.uri(), 1)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/db/mix1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MIX_PAGE))
        .mount(&server)
        .await;

    let (dispatcher, _stores) = mixesdb_dispatcher(&server, 2).await;
    dispatcher
        .execute(ScrapeRequest::new(SourceSite::MixesDb, "a"))
        .await
        .unwrap();
    dispatcher
        .execute(ScrapeRequest::new(SourceSite::MixesDb, "b"))
        .await
        .unwrap();

    let stats = dispatcher.stats().await;
    assert_eq!(stats.requests_total, 2);
    assert_eq!(stats.requests_by_source.get("mixesdb"), Some(&2));
    assert_eq!(stats.playlists_scraped, 2);
    assert!(dispatcher.jobs().is_empty(), "no jobs left in flight");
}
