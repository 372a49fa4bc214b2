//! Property-based checks of the cross-layer invariants: position
//! integrity, observation coverage, occurrence counting and the
//! Gold→Operational correspondence, over randomly generated playlists.

mod common;

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

use common::{payload, Harness};
use trackgraph_backend::models::SourceSite;
use trackgraph_backend::storage::{BronzeStore, GoldStore, OperationalStore, SilverStore};

/// A small pool of artist names; "Unknown" and "VA" inject sentinel holes.
fn artist_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "Adam Beyer",
        "Amelie Lens",
        "Charlotte de Witte",
        "Ben Klock",
        "Unknown",
        "VA",
    ])
}

fn title_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "Your Mind",
        "Contradictions",
        "Selected",
        "Subzero",
        "Spektrum",
    ])
}

fn playlist_strategy() -> impl Strategy<Value = Vec<(&'static str, &'static str)>> {
    prop::collection::vec((artist_strategy(), title_strategy()), 1..8)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn positions_are_always_contiguous(tracklists in prop::collection::vec(playlist_strategy(), 1..4)) {
        runtime().block_on(async {
            let harness = Harness::new();
            for (index, tracks) in tracklists.iter().enumerate() {
                let url = format!("https://example/mix/{}", index);
                harness
                    .ingest(&payload(SourceSite::MixesDb, &url, tracks))
                    .await;
            }

            for (index, tracks) in tracklists.iter().enumerate() {
                let url = format!("https://example/mix/{}", index);
                let playlist = harness
                    .stores
                    .bronze
                    .get_playlist_by_url(SourceSite::MixesDb, &url)
                    .await
                    .unwrap()
                    .expect("playlist stored");
                let rows = harness
                    .stores
                    .bronze
                    .playlist_tracks(playlist.id)
                    .await
                    .unwrap();
                let positions: Vec<i32> = rows.iter().map(|t| t.position).collect();
                let expected: Vec<i32> = (1..=tracks.len() as i32).collect();
                prop_assert_eq!(positions, expected);
            }
            Ok(())
        })?;
    }

    #[test]
    fn observations_only_join_adjacent_resolved_tracks(tracks in playlist_strategy()) {
        runtime().block_on(async {
            let harness = Harness::new();
            let result = harness
                .ingest(&payload(SourceSite::MixesDb, "https://example/mix/p", &tracks))
                .await;

            let observations = harness
                .stores
                .silver
                .observations_for_playlist(result.silver.canonical_playlist_id)
                .await
                .unwrap();

            // Sentinel endpoints never appear; each observation sits at a
            // position whose raw pair had two non-sentinel artists.
            let sentinel = |name: &str| {
                let lowered = name.to_lowercase();
                lowered == "unknown" || lowered == "va"
            };
            let expected: usize = tracks
                .windows(2)
                .filter(|pair| !sentinel(pair[0].0) && !sentinel(pair[1].0))
                .count();
            prop_assert_eq!(observations.len(), expected);

            let positions: HashSet<i32> = observations.iter().map(|o| o.position).collect();
            prop_assert_eq!(positions.len(), observations.len(), "unique positions");
            for observation in &observations {
                prop_assert!(observation.position >= 1);
                prop_assert!(observation.position < tracks.len() as i32 + 1);
            }
            Ok(())
        })?;
    }

    #[test]
    fn occurrence_count_always_equals_distinct_playlists(
        tracklists in prop::collection::vec(playlist_strategy(), 1..4)
    ) {
        runtime().block_on(async {
            let harness = Harness::new();
            for (index, tracks) in tracklists.iter().enumerate() {
                let url = format!("https://example/mix/{}", index);
                harness
                    .ingest(&payload(SourceSite::MixesDb, &url, tracks))
                    .await;
            }

            let observations = harness.stores.silver.all_observations().await.unwrap();
            let mut proving: HashMap<(uuid::Uuid, uuid::Uuid), HashSet<uuid::Uuid>> =
                HashMap::new();
            for observation in &observations {
                proving
                    .entry((observation.source_track_id, observation.target_track_id))
                    .or_default()
                    .insert(observation.canonical_playlist_id);
            }

            let transitions = harness.stores.gold.all_transitions().await.unwrap();
            prop_assert_eq!(transitions.len(), proving.len());
            for transition in &transitions {
                let playlists = proving
                    .get(&(transition.source_track_id, transition.target_track_id))
                    .expect("transition backed by observations");
                prop_assert_eq!(transition.occurrence_count as usize, playlists.len());
                let observed: HashSet<uuid::Uuid> =
                    transition.observing_playlist_ids.iter().copied().collect();
                prop_assert_eq!(&observed, playlists);
            }
            Ok(())
        })?;
    }

    #[test]
    fn graph_edges_are_a_subset_of_gold(tracklists in prop::collection::vec(playlist_strategy(), 1..4)) {
        runtime().block_on(async {
            let harness = Harness::new();
            for (index, tracks) in tracklists.iter().enumerate() {
                let url = format!("https://example/mix/{}", index);
                harness
                    .ingest(&payload(SourceSite::MixesDb, &url, tracks))
                    .await;
            }

            let transitions: HashSet<(uuid::Uuid, uuid::Uuid)> = harness
                .stores
                .gold
                .all_transitions()
                .await
                .unwrap()
                .into_iter()
                .map(|t| (t.source_track_id, t.target_track_id))
                .collect();

            let graph = harness.stores.operational.graph().await.unwrap();
            for edge in &graph.edges {
                prop_assert!(edge.source_id != edge.target_id, "no self-loops");
                prop_assert!(
                    transitions.contains(&(edge.source_id, edge.target_id)),
                    "edge backed by a gold transition"
                );
                prop_assert!(edge.weight >= 1);
                prop_assert!((0.0..=1.0).contains(&edge.attributes.confidence));
                prop_assert!((0.0..=1.0).contains(&edge.attributes.quality));
            }

            for node in &graph.nodes {
                prop_assert!((0.0..=1.0).contains(&node.attributes.popularity));
                prop_assert!(node.attributes.appearance_count >= 1);
            }
            Ok(())
        })?;
    }
}
