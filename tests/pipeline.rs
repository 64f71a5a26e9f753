mod common;

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use common::{chunk, pipeline, stored_record, DownEmbedder, FaultyStore, SlowEmbedder, StubEmbedder};
use docgraph::{
    Chunk, ChunkMetadata, GraphStore, MemoryStore, PipelineError, ReferenceKind, RelatedSection,
    EXACT_STRENGTH, FUZZY_STRENGTH, UNKNOWN_PATH,
};
use pretty_assertions::assert_eq;
use tempfile::{Builder, NamedTempFile};

fn guide_chunks() -> Vec<Chunk> {
    vec![
        chunk("id1", &["Guide"], None, &[]),
        chunk("id2", &["Guide", "Step1"], Some("id1"), &["Guide"]),
    ]
}

fn source_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = Builder::new()
        .prefix("handbook")
        .suffix(suffix)
        .tempfile()
        .expect("create temp source");
    file.write_all(contents.as_bytes()).expect("write temp source");
    file
}

#[tokio::test(flavor = "current_thread")]
async fn guide_scenario_builds_nodes_parent_link_and_exact_edge() {
    let store = Arc::new(MemoryStore::new());
    let report = pipeline(store.clone(), Arc::new(StubEmbedder::default()))
        .process_chunks("A", guide_chunks())
        .await
        .expect("run succeeds");

    assert_eq!(report.document_id, "A");
    assert_eq!(report.inserted(), 2);
    assert_eq!(report.parent_links(), 1);
    assert_eq!(report.references_created(), 1);

    let nodes = store.nodes("A");
    let paths: Vec<&str> = nodes.iter().map(|node| node.record.path.as_str()).collect();
    assert_eq!(paths, vec!["Guide", "Guide > Step1"]);
    assert_eq!(nodes[1].parent_id, Some(nodes[0].id));

    let references = store.document_references("A");
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].source_node_id, nodes[1].id);
    assert_eq!(references[0].target_node_id, nodes[0].id);
    assert_eq!(references[0].reference_type, ReferenceKind::Exact);
    assert_eq!(references[0].strength, EXACT_STRENGTH);
}

#[tokio::test(flavor = "current_thread")]
async fn list_mentions_round_trip_through_the_path_key() {
    let store = Arc::new(MemoryStore::new());
    let mut usage = chunk("id2", &["Intro", "Usage"], None, &[]);
    usage.metadata.as_mut().unwrap().related_sections = vec![RelatedSection::path(["Intro", "Setup"])];

    pipeline(store.clone(), Arc::new(StubEmbedder::default()))
        .process_chunks("doc", vec![chunk("id1", &["Intro", "Setup"], None, &[]), usage])
        .await
        .expect("run succeeds");

    let nodes = store.nodes("doc");
    assert_eq!(nodes[0].record.path, "Intro > Setup");
    assert_eq!(nodes[0].record.metadata["original_id"], "id1");
    let references = store.document_references("doc");
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].target_node_id, nodes[0].id);
}

#[tokio::test(flavor = "current_thread")]
async fn reprocessing_does_not_accumulate_generations() {
    let store = Arc::new(MemoryStore::new());
    let runner = pipeline(store.clone(), Arc::new(StubEmbedder::default()));
    let chunks = vec![
        chunk("id1", &["Guide"], None, &["Guide > Step2"]),
        chunk("id2", &["Guide", "Step1"], Some("id1"), &["Guide"]),
        chunk("id3", &["Guide", "Step2"], Some("id1"), &["Guide > Step1", "Guide"]),
    ];

    let first = runner.process_chunks("doc", chunks.clone()).await.unwrap();
    let nodes_after_first = store.nodes("doc").len();
    let edges_after_first = store.document_references("doc").len();

    let second = runner.process_chunks("doc", chunks).await.unwrap();
    assert_eq!(second.inserted(), first.inserted());
    assert_eq!(second.references_created(), first.references_created());
    assert_eq!(store.nodes("doc").len(), nodes_after_first);
    assert_eq!(store.document_references("doc").len(), edges_after_first);
    assert_eq!(store.node_count(), 3);
    assert_eq!(second.persistence.cleared, Some(3));
}

#[tokio::test(flavor = "current_thread")]
async fn self_mentions_never_become_edges() {
    let store = Arc::new(MemoryStore::new());
    let report = pipeline(store.clone(), Arc::new(StubEmbedder::default()))
        .process_chunks(
            "doc",
            vec![
                chunk("id1", &["Guide"], None, &["Guide"]),
                chunk("id2", &["Guide", "Step1"], Some("id1"), &["Guide > Step1", "Guide"]),
            ],
        )
        .await
        .unwrap();

    assert_eq!(report.resolution.self_references, 2);
    assert!(store
        .references()
        .iter()
        .all(|reference| reference.source_node_id != reference.target_node_id));
    assert_eq!(report.references_created(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn pairs_found_exactly_and_fuzzily_are_written_once() {
    let store = Arc::new(MemoryStore::new());
    let runner = pipeline(store.clone(), Arc::new(StubEmbedder::default()));
    let chunks = vec![
        chunk("id1", &["Guide", "Installation"], None, &[]),
        chunk(
            "id2",
            &["Guide", "Usage"],
            None,
            &["Guide > Installation", "Installation"],
        ),
    ];

    runner.process_chunks("doc", chunks.clone()).await.unwrap();
    let second = runner.process_chunks("doc", chunks).await.unwrap();

    assert_eq!(second.fuzzy.matched, 1);
    assert_eq!(second.relations.exact_created, 1);
    assert_eq!(second.relations.fuzzy_created, 0);
    assert!(second.relations.duplicate_pairs >= 1);

    let pairs: Vec<(i64, i64)> = store
        .document_references("doc")
        .iter()
        .map(|reference| (reference.source_node_id, reference.target_node_id))
        .collect();
    let unique: HashSet<(i64, i64)> = pairs.iter().copied().collect();
    assert_eq!(pairs.len(), 1);
    assert_eq!(unique.len(), pairs.len());
}

#[tokio::test(flavor = "current_thread")]
async fn only_embedded_nodes_are_persisted() {
    let store = Arc::new(MemoryStore::new());
    let embedder = Arc::new(StubEmbedder::refusing(&["id1"]));
    let report = pipeline(store.clone(), embedder.clone())
        .process_chunks("A", guide_chunks())
        .await
        .expect("partial embedding failure is not fatal");

    assert_eq!(embedder.calls(), 1);
    assert_eq!(report.embedding.failed_chunks, vec!["id1".to_string()]);
    assert_eq!(report.inserted(), 1);
    assert_eq!(report.failed(), 1);
    assert!(store
        .nodes("A")
        .iter()
        .all(|node| node.record.embedding_generated && node.record.embedding.is_some()));

    // The parent never persisted: the child becomes a root and the edge to it is skipped.
    assert_eq!(report.parent_links(), 0);
    assert_eq!(store.nodes("A")[0].parent_id, None);
    assert_eq!(report.references_created(), 0);
    assert_eq!(report.relations.unpersisted_endpoints, 1);
}

#[tokio::test(flavor = "current_thread")]
async fn document_without_valid_chunks_succeeds_empty() {
    let store = Arc::new(MemoryStore::new());
    let embedder = Arc::new(StubEmbedder::default());
    let orphan = Chunk {
        chunk_id: Some("id1".to_string()),
        kind: None,
        title: None,
        content: Some("no metadata".to_string()),
        level: None,
        metadata: None,
    };
    let anonymous = Chunk {
        chunk_id: None,
        metadata: Some(ChunkMetadata::default()),
        ..orphan.clone()
    };

    let report = pipeline(store.clone(), embedder.clone())
        .process_chunks("empty", vec![orphan, anonymous])
        .await
        .expect("empty documents are not an error");

    assert_eq!(report.document_id, "empty");
    assert_eq!(report.mapping.discarded.len(), 2);
    assert_eq!(report.inserted(), 0);
    assert_eq!(report.references_created(), 0);
    assert_eq!(embedder.calls(), 0);
    assert_eq!(store.node_count(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn every_insert_failing_is_fatal() {
    let store = Arc::new(FaultyStore::default());
    FaultyStore::set(&store.fail_inserts, true);

    let failure = pipeline(store.clone(), Arc::new(StubEmbedder::default()))
        .process_chunks("A", guide_chunks())
        .await
        .expect_err("nothing persisted");

    assert!(matches!(
        failure.error,
        PipelineError::NothingPersisted {
            attempted: 2,
            failed: 2
        }
    ));
    assert_eq!(failure.report.failed(), 2);
    assert_eq!(failure.report.references_created(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn wholesale_embedding_failure_aborts_before_clearing() {
    let store = Arc::new(MemoryStore::new());
    pipeline(store.clone(), Arc::new(StubEmbedder::default()))
        .process_chunks("A", guide_chunks())
        .await
        .unwrap();

    let failure = pipeline(store.clone(), Arc::new(DownEmbedder))
        .process_chunks("A", guide_chunks())
        .await
        .expect_err("provider unreachable");

    assert!(matches!(failure.error, PipelineError::EmbeddingProvider(_)));
    assert_eq!(store.nodes("A").len(), 2);
    assert_eq!(failure.report.mapping.mapped, 2);
}

#[tokio::test(flavor = "current_thread")]
async fn fuzzy_fallback_links_same_document_nodes_only() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_node(&stored_record("A", "id3", "Guide > Installation > Linux"))
        .await
        .unwrap();
    store
        .insert_node(&stored_record("B", "id3", "Manual > Installation > Linux"))
        .await
        .unwrap();

    let report = pipeline(store.clone(), Arc::new(StubEmbedder::default()))
        .process_chunks(
            "A",
            vec![
                chunk("id1", &["Guide"], None, &["Installation > Linux"]),
                chunk("id3", &["Guide", "Installation", "Linux"], Some("id1"), &[]),
            ],
        )
        .await
        .unwrap();

    assert_eq!(report.fuzzy.patterns, 1);
    assert_eq!(report.fuzzy.foreign_candidates, 1);
    assert_eq!(report.relations.fuzzy_created, 1);

    let nodes = store.nodes("A");
    let references = store.document_references("A");
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].reference_type, ReferenceKind::Fuzzy);
    assert_eq!(references[0].strength, FUZZY_STRENGTH);
    assert_eq!(references[0].source_node_id, nodes[0].id);
    assert_eq!(references[0].target_node_id, nodes[1].id);
    assert_eq!(store.nodes("B").len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn per_item_store_failures_are_counted_not_fatal() {
    let store = Arc::new(FaultyStore::default());
    FaultyStore::set(&store.fail_lookups, true);
    FaultyStore::set(&store.fail_clear, true);
    FaultyStore::set(&store.fail_parents, true);
    FaultyStore::set(&store.fail_references, true);

    let report = pipeline(store.clone(), Arc::new(StubEmbedder::default()))
        .process_chunks(
            "A",
            vec![
                chunk("id1", &["Guide"], None, &["Nowhere"]),
                chunk("id2", &["Guide", "Step1"], Some("id1"), &["Guide"]),
            ],
        )
        .await
        .expect("only whole-phase failures abort");

    assert_eq!(report.inserted(), 2);
    assert_eq!(report.lookup_errors(), 1);
    assert!(report.persistence.clear_error.is_some());
    assert_eq!(report.relations.parent_failures.len(), 1);
    assert_eq!(report.relations.reference_failures.len(), 1);
    assert_eq!(report.parent_links(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn colliding_paths_resolve_to_the_first_claimant() {
    let store = Arc::new(MemoryStore::new());
    let report = pipeline(store.clone(), Arc::new(StubEmbedder::default()))
        .process_chunks(
            "doc",
            vec![
                chunk("faq-a", &["FAQ"], None, &[]),
                chunk("faq-b", &["FAQ"], None, &[]),
                chunk("id3", &["Support"], None, &["FAQ"]),
            ],
        )
        .await
        .unwrap();

    assert_eq!(
        report.mapping.ambiguous_paths["FAQ"],
        vec!["faq-a".to_string(), "faq-b".to_string()]
    );
    let nodes = store.nodes("doc");
    let references = store.document_references("doc");
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].target_node_id, nodes[0].id);
}

#[tokio::test(flavor = "current_thread")]
async fn cyclic_parent_declarations_leave_roots() {
    let store = Arc::new(MemoryStore::new());
    let report = pipeline(store.clone(), Arc::new(StubEmbedder::default()))
        .process_chunks(
            "doc",
            vec![
                chunk("a", &["A"], Some("b"), &["B"]),
                chunk("b", &["B"], Some("a"), &["A"]),
            ],
        )
        .await
        .unwrap();

    assert_eq!(report.relations.parent_cycles, vec!["a".to_string(), "b".to_string()]);
    assert!(store.nodes("doc").iter().all(|node| node.parent_id.is_none()));
    // Reference edges may still form a cycle.
    assert_eq!(report.references_created(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn overlapping_runs_for_one_document_are_refused() {
    let store = Arc::new(MemoryStore::new());
    let runner = pipeline(store.clone(), Arc::new(SlowEmbedder(Duration::from_millis(50))));

    let (first, second, other) = tokio::join!(
        runner.process_chunks("A", guide_chunks()),
        runner.process_chunks("A", guide_chunks()),
        runner.process_chunks("B", guide_chunks()),
    );

    assert!(first.is_ok());
    assert!(matches!(
        second.expect_err("same document overlaps").error,
        PipelineError::DocumentBusy(id) if id == "A"
    ));
    assert!(other.is_ok());
    assert!(runner.process_chunks("A", guide_chunks()).await.is_ok());
}

#[tokio::test(flavor = "current_thread")]
async fn markdown_sources_are_chunked_and_linked() {
    let store = Arc::new(MemoryStore::new());
    let file = source_file(
        ".md",
        "# Guide\n\nStart with [step one](#step1).\n\n## Step1\n\nRun the installer.\n\n## Step2\n\nSee [the guide](#guide).\n",
    );

    let report = pipeline(store.clone(), Arc::new(StubEmbedder::default()))
        .process_document(file.path(), Some("handbook"))
        .await
        .expect("markdown run succeeds");

    assert_eq!(report.chunks, 3);
    assert_eq!(report.inserted(), 3);
    assert_eq!(report.parent_links(), 2);
    assert_eq!(report.relations.exact_created, 2);

    let nodes = store.nodes("handbook");
    assert_eq!(nodes[1].record.path, "Guide > Step1");
    assert_eq!(nodes[1].record.metadata["original_id"], "chunk-0001");
}

#[tokio::test(flavor = "current_thread")]
async fn document_id_defaults_to_the_file_stem() {
    let store = Arc::new(MemoryStore::new());
    let file = source_file(".md", "# Notes\n\nShort.\n");
    let stem = file
        .path()
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap()
        .to_string();

    let report = pipeline(store.clone(), Arc::new(StubEmbedder::default()))
        .process_document(file.path(), None)
        .await
        .unwrap();

    assert_eq!(report.document_id, stem);
    assert_eq!(store.nodes(&stem).len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn blank_sources_succeed_without_collaborators() {
    let store = Arc::new(FaultyStore::default());
    FaultyStore::set(&store.fail_clear, true);
    let embedder = Arc::new(StubEmbedder::default());
    let file = source_file(".md", "  \n\n");

    let report = pipeline(store, embedder.clone())
        .process_document(file.path(), Some("blank"))
        .await
        .expect("blank source is not an error");

    assert_eq!(report.document_id, "blank");
    assert_eq!(report.chunks, 0);
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn unreadable_and_malformed_sources_fail() {
    let runner = pipeline(Arc::new(MemoryStore::new()), Arc::new(StubEmbedder::default()));

    let dir = tempfile::tempdir().unwrap();
    let missing = runner
        .process_document(&dir.path().join("absent.md"), None)
        .await
        .expect_err("missing file");
    assert!(matches!(missing.error, PipelineError::Input { .. }));
    assert_eq!(missing.report.document_id, "absent");

    let file = source_file(".jsonl", "{\"id\": \"a\"}\n{broken\n");
    let malformed = runner
        .process_document(file.path(), Some("chunks"))
        .await
        .expect_err("malformed chunk line");
    assert!(matches!(malformed.error, PipelineError::Parse { .. }));
}

#[tokio::test(flavor = "current_thread")]
async fn jsonl_sources_carry_upstream_metadata() {
    let store = Arc::new(MemoryStore::new());
    let file = source_file(
        ".jsonl",
        concat!(
            r#"{"id": 1, "type": "section", "title": "Guide", "content": "Intro", "level": 1, "metadata": {"hierarchy_path": ["Guide"], "section_type": "introduction", "keywords": ["guide"]}}"#,
            "\n",
            r#"{"id": 2, "type": "section", "title": "Step1", "content": "Do it", "level": 2, "metadata": {"hierarchy_path": ["Guide", "Step1"], "parent_id": 1, "related_sections": [["Guide"]], "link_count": 1, "contains_links": true}}"#,
            "\n",
        ),
    );

    let report = pipeline(store.clone(), Arc::new(StubEmbedder::default()))
        .process_document(file.path(), Some("jsonl"))
        .await
        .unwrap();

    assert_eq!(report.inserted(), 2);
    assert_eq!(report.parent_links(), 1);
    assert_eq!(report.relations.exact_created, 1);

    let nodes = store.nodes("jsonl");
    assert_eq!(nodes[0].record.section_type, "introduction");
    assert_eq!(nodes[0].record.metadata["keywords"][0], "guide");
    assert_eq!(nodes[1].record.content_type, "text");
    assert_eq!(nodes[1].record.metadata["contains_links"], true);
}

#[tokio::test(flavor = "current_thread")]
async fn fuzzy_targets_follow_paths_when_sections_shift() {
    let store = Arc::new(MemoryStore::new());
    let runner = pipeline(store.clone(), Arc::new(StubEmbedder::default()));
    let before = source_file(
        ".md",
        "# Guide\n\n## Installation\n\nSteps.\n\n## Usage\n\nSee [Install](#install-notes).\n",
    );
    let after = source_file(
        ".md",
        "# Guide\n\n## Overview\n\nAbout.\n\n## Installation\n\nSteps.\n\n## Usage\n\nSee [Install](#install-notes).\n",
    );

    runner.process_document(before.path(), Some("guide")).await.unwrap();
    let report = runner
        .process_document(after.path(), Some("guide"))
        .await
        .unwrap();

    assert_eq!(report.relations.fuzzy_created, 1);
    let nodes = store.nodes("guide");
    let path_of = |id: i64| {
        nodes
            .iter()
            .find(|node| node.id == id)
            .map(|node| node.record.path.clone())
            .unwrap()
    };
    let references = store.document_references("guide");
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].reference_type, ReferenceKind::Fuzzy);
    assert_eq!(path_of(references[0].source_node_id), "Guide > Usage");
    assert_eq!(path_of(references[0].target_node_id), "Guide > Installation");
}

#[tokio::test(flavor = "current_thread")]
async fn null_hierarchy_paths_map_to_the_unknown_path() {
    let store = Arc::new(MemoryStore::new());
    let file = source_file(
        ".jsonl",
        concat!(
            r#"{"id": "a", "type": "section", "content": "Loose text", "metadata": {"hierarchy_path": null, "related_sections": null, "child_ids": null}}"#,
            "\n",
            r#"{"id": "b", "type": "section", "content": "Guide text", "metadata": {"hierarchy_path": ["Guide"]}}"#,
            "\n",
        ),
    );

    let report = pipeline(store.clone(), Arc::new(StubEmbedder::default()))
        .process_document(file.path(), Some("loose"))
        .await
        .expect("null metadata lists are not a parse failure");

    assert_eq!(report.inserted(), 2);
    let paths: Vec<String> = store
        .nodes("loose")
        .into_iter()
        .map(|node| node.record.path)
        .collect();
    assert_eq!(paths, vec![UNKNOWN_PATH.to_string(), "Guide".to_string()]);
}
