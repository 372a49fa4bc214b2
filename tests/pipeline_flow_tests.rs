//! End-to-end medallion flow over the in-memory store: the Bronze write,
//! Silver canonicalization, Gold aggregation and Operational projection for
//! one payload at a time, asserting the layer invariants after each step.

mod common;

use common::{payload, Harness};
use std::collections::HashSet;
use trackgraph_backend::models::{SourceSite, TrackRecord};
use trackgraph_backend::services::BronzeWriteError;
use trackgraph_backend::storage::{BronzeStore, GoldStore, OperationalStore, SilverStore};

#[tokio::test]
async fn classic_build_produces_two_transitions() {
    let harness = Harness::new();
    let result = harness
        .ingest(&payload(
            SourceSite::MixesDb,
            "https://example/mix/1",
            &[
                ("Adam Beyer", "Your Mind"),
                ("Amelie Lens", "Contradictions"),
                ("Charlotte de Witte", "Selected"),
            ],
        ))
        .await;

    assert_eq!(result.bronze.track_count, 3);
    assert_eq!(result.silver.resolved_tracks, 3);
    assert_eq!(result.silver.observations_written, 2);

    let bronze_count = harness.stores.bronze.playlist_count().await.unwrap();
    assert_eq!(bronze_count, 1);

    let transitions = harness.stores.gold.all_transitions().await.unwrap();
    assert_eq!(transitions.len(), 2);
    assert!(transitions.iter().all(|t| t.occurrence_count == 1));

    let graph = harness.stores.operational.graph().await.unwrap();
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 2);
    assert!(graph.edges.iter().all(|e| e.weight == 1));
}

#[tokio::test]
async fn consensus_accumulates_across_playlists() {
    let harness = Harness::new();
    harness
        .ingest(&payload(
            SourceSite::MixesDb,
            "https://example/mix/1",
            &[
                ("Adam Beyer", "Your Mind"),
                ("Amelie Lens", "Contradictions"),
                ("Charlotte de Witte", "Selected"),
            ],
        ))
        .await;

    // Same 1→2 pair, fresh source URL, different casing and diacritics.
    let second = harness
        .ingest(&payload(
            SourceSite::MixesDb,
            "https://example/mix/2",
            &[
                ("ADAM BEYER", "Your Mind"),
                ("Amélie Lens", "Contradictions"),
            ],
        ))
        .await;
    assert_eq!(second.silver.observations_written, 1);

    let bronze_count = harness.stores.bronze.playlist_count().await.unwrap();
    assert_eq!(bronze_count, 2);

    let transitions = harness.stores.gold.all_transitions().await.unwrap();
    assert_eq!(transitions.len(), 2, "no new canonical pair appeared");

    let consensus = transitions
        .iter()
        .find(|t| t.occurrence_count == 2)
        .expect("the shared pair reaches occurrence 2");
    assert_eq!(consensus.observing_playlist_ids.len(), 2);

    let graph = harness.stores.operational.graph().await.unwrap();
    // Still three canonical tracks: canonicalization deduplicated both
    // artists despite casing and accents.
    assert_eq!(graph.nodes.len(), 3);
    let heavy: Vec<_> = graph.edges.iter().filter(|e| e.weight == 2).collect();
    assert_eq!(heavy.len(), 1);
}

#[tokio::test]
async fn unknown_artist_never_bridges_neighbours() {
    let harness = Harness::new();
    let result = harness
        .ingest(&payload(
            SourceSite::MixesDb,
            "https://example/mix/unknown",
            &[
                ("Adam Beyer", "Your Mind"),
                ("Unknown", "Mystery Track"),
                ("Charlotte de Witte", "Selected"),
            ],
        ))
        .await;

    // Bronze still stores all three raw tracks.
    let tracks = harness
        .stores
        .bronze
        .playlist_tracks(result.bronze.playlist_id)
        .await
        .unwrap();
    assert_eq!(tracks.len(), 3);

    // No observation may involve position 2, and 1→3 is never synthesized.
    assert_eq!(result.silver.observations_written, 0);
    assert_eq!(result.silver.dropped_pairs, 2);
    assert!(harness.stores.gold.all_transitions().await.unwrap().is_empty());

    // The valid endpoints stay available for other playlists.
    let graph_after = harness
        .ingest(&payload(
            SourceSite::MixesDb,
            "https://example/mix/other",
            &[
                ("Adam Beyer", "Your Mind"),
                ("Charlotte de Witte", "Selected"),
            ],
        ))
        .await;
    assert_eq!(graph_after.silver.observations_written, 1);
}

#[tokio::test]
async fn reingest_with_changed_tracklist_recomputes_downstream() {
    let harness = Harness::new();
    let url = "https://example/mix/rescrape";

    harness
        .ingest(&payload(
            SourceSite::MixesDb,
            url,
            &[
                ("Adam Beyer", "Your Mind"),
                ("Amelie Lens", "Contradictions"),
                ("Charlotte de Witte", "Selected"),
            ],
        ))
        .await;
    let before: HashSet<_> = harness
        .stores
        .gold
        .all_transitions()
        .await
        .unwrap()
        .into_iter()
        .map(|t| (t.source_track_id, t.target_track_id))
        .collect();
    assert_eq!(before.len(), 2);

    // Rescrape: position 3 changed, position 4 added.
    let second = harness
        .ingest(&payload(
            SourceSite::MixesDb,
            url,
            &[
                ("Adam Beyer", "Your Mind"),
                ("Amelie Lens", "Contradictions"),
                ("Ben Klock", "Subzero"),
                ("Charlotte de Witte", "Selected"),
            ],
        ))
        .await;
    assert!(second.bronze.rewritten);
    assert_eq!(second.bronze.track_count, 4);
    assert_eq!(second.silver.observations_written, 3);

    let after: Vec<_> = harness.stores.gold.all_transitions().await.unwrap();
    let after_pairs: HashSet<_> = after
        .iter()
        .map(|t| (t.source_track_id, t.target_track_id))
        .collect();

    // Old 2→3 transition (Contradictions → Selected) is gone, replaced by
    // 2→Subzero and Subzero→Selected.
    assert_eq!(after_pairs.len(), 3);
    assert_eq!(after_pairs.intersection(&before).count(), 1);
    assert!(after.iter().all(|t| t.occurrence_count == 1));
    assert!(after.iter().all(|t| t.observing_playlist_ids.len() == 1));
}

#[tokio::test]
async fn malformed_declared_positions_leave_no_rows() {
    let harness = Harness::new();

    let mut tracks = vec![
        TrackRecord::new("Adam Beyer", "Your Mind").with_source_position(1),
        TrackRecord::new("Amelie Lens", "Contradictions").with_source_position(2),
        TrackRecord::new("Charlotte de Witte", "Selected").with_source_position(4),
    ];
    let bad = trackgraph_backend::models::PlaylistPayload::new(
        SourceSite::MixesDb,
        "https://example/mix/malformed",
    )
    .with_tracks(tracks.drain(..).collect());

    let error = harness.writer.write(&bad).await.unwrap_err();
    assert!(matches!(error, BronzeWriteError::InvalidPayload { .. }));

    assert_eq!(harness.stores.bronze.playlist_count().await.unwrap(), 0);
    assert!(harness
        .stores
        .silver
        .all_observations()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn single_track_playlist_yields_no_observations() {
    let harness = Harness::new();
    let result = harness
        .ingest(&payload(
            SourceSite::Beatport,
            "https://example/chart/solo",
            &[("Adam Beyer", "Your Mind")],
        ))
        .await;
    assert_eq!(result.silver.observations_written, 0);
    assert!(harness.stores.gold.all_transitions().await.unwrap().is_empty());
}

#[tokio::test]
async fn two_valid_tracks_yield_exactly_one_edge() {
    let harness = Harness::new();
    harness
        .ingest(&payload(
            SourceSite::Beatport,
            "https://example/chart/pair",
            &[("Adam Beyer", "Your Mind"), ("Amelie Lens", "Contradictions")],
        ))
        .await;

    let graph = harness.stores.operational.graph().await.unwrap();
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.edges[0].weight, 1);
    assert!(graph.edges[0].attributes.confidence > 0.0);
}

#[tokio::test]
async fn reingesting_identical_payload_is_idempotent() {
    let harness = Harness::new();
    let p = payload(
        SourceSite::MixesDb,
        "https://example/mix/idempotent",
        &[
            ("Adam Beyer", "Your Mind"),
            ("Amelie Lens", "Contradictions"),
            ("Charlotte de Witte", "Selected"),
        ],
    );

    let first = harness.ingest(&p).await;
    let observations_before = harness
        .stores
        .silver
        .observations_for_playlist(first.silver.canonical_playlist_id)
        .await
        .unwrap();
    let transitions_before = harness.stores.gold.all_transitions().await.unwrap();

    let second = harness.ingest(&p).await;
    assert_eq!(second.bronze.playlist_id, first.bronze.playlist_id);
    assert_eq!(
        second.silver.canonical_playlist_id,
        first.silver.canonical_playlist_id
    );

    let observations_after = harness
        .stores
        .silver
        .observations_for_playlist(first.silver.canonical_playlist_id)
        .await
        .unwrap();
    assert_eq!(observations_before, observations_after);

    let transitions_after = harness.stores.gold.all_transitions().await.unwrap();
    assert_eq!(transitions_before.len(), transitions_after.len());
    for before in &transitions_before {
        let after = transitions_after
            .iter()
            .find(|t| {
                t.source_track_id == before.source_track_id
                    && t.target_track_id == before.target_track_id
            })
            .expect("same pair survives");
        assert_eq!(after.id, before.id);
        assert_eq!(after.occurrence_count, before.occurrence_count);
        assert_eq!(after.observing_playlist_ids, before.observing_playlist_ids);
    }
}

#[tokio::test]
async fn gold_rerun_without_new_silver_rows_is_a_noop() {
    let harness = Harness::new();
    harness
        .ingest(&payload(
            SourceSite::MixesDb,
            "https://example/mix/noop",
            &[("Adam Beyer", "Your Mind"), ("Amelie Lens", "Contradictions")],
        ))
        .await;

    let before = harness.stores.gold.all_transitions().await.unwrap();
    let summary = harness.aggregator.rebuild_all().await.unwrap();
    assert_eq!(summary.transitions_deleted, 0);
    let after = harness.stores.gold.all_transitions().await.unwrap();

    assert_eq!(before.len(), after.len());
    for b in &before {
        let a = after
            .iter()
            .find(|t| t.source_track_id == b.source_track_id)
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.occurrence_count, b.occurrence_count);
    }
}

#[tokio::test]
async fn operational_rebuild_is_deterministic() {
    let harness = Harness::new();
    harness
        .ingest(&payload(
            SourceSite::MixesDb,
            "https://example/mix/a",
            &[
                ("Adam Beyer", "Your Mind"),
                ("Amelie Lens", "Contradictions"),
                ("Charlotte de Witte", "Selected"),
            ],
        ))
        .await;
    harness
        .ingest(&payload(
            SourceSite::MixesDb,
            "https://example/mix/b",
            &[("Amelie Lens", "Contradictions"), ("Ben Klock", "Subzero")],
        ))
        .await;

    let first = harness.stores.operational.graph().await.unwrap();
    harness.materializer.materialize().await.unwrap();
    let second = harness.stores.operational.graph().await.unwrap();

    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}

#[tokio::test]
async fn every_graph_edge_is_backed_by_gold_and_silver() {
    let harness = Harness::new();
    harness
        .ingest(&payload(
            SourceSite::MixesDb,
            "https://example/mix/backed",
            &[
                ("Adam Beyer", "Your Mind"),
                ("Amelie Lens", "Contradictions"),
                ("Charlotte de Witte", "Selected"),
            ],
        ))
        .await;

    let graph = harness.stores.operational.graph().await.unwrap();
    for edge in &graph.edges {
        let transition = harness
            .stores
            .gold
            .get_transition(edge.source_id, edge.target_id)
            .await
            .unwrap()
            .expect("edge has a gold transition");
        assert_eq!(transition.occurrence_count, edge.weight);

        let observations = harness
            .stores
            .silver
            .observations_for_pair(edge.source_id, edge.target_id)
            .await
            .unwrap();
        assert!(!observations.is_empty(), "transition is proven by silver");
    }
}
