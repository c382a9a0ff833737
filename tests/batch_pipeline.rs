//! End to end: CSV manifest in, Gemini mocked over HTTP, files on disk out.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use docflow::gemini::GeminiClient;
use docflow::logging::{FileLogger, LocalErrorLog};
use docflow::manifest::{parse_manifest, read_manifest, write_manifest};
use docflow::rotation::StaticKeys;
use docflow::stages::{
    DocumentStore, ExtractionStage, LocalStore, PersistenceStage, Prompts, StructuringStage,
    TranslationStage,
};
use docflow::state_machine::{ManifestStatus, RecordOutcome};
use docflow::{BatchCoordinator, BatchJob, CompletionReporter, ResourceRotator, Stage, StagePlan};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "gemini-test";

fn reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    }))
}

async fn gemini() -> MockServer {
    let server = MockServer::start().await;
    let endpoint = format!("/models/{MODEL}:generateContent");
    Mock::given(method("POST"))
        .and(path(endpoint.as_str()))
        .and(body_string_contains("Translate the following text"))
        .respond_with(reply("TRANSLATED"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(endpoint.as_str()))
        .respond_with(reply("EXTRACTED"))
        .with_priority(5)
        .mount(&server)
        .await;
    server
}

fn plan(server: &MockServer, input: &Path, output: &Path) -> StagePlan {
    let client = Arc::new(
        GeminiClient::with_base_url(server.uri(), MODEL, Duration::from_secs(5)).unwrap(),
    );
    let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::new(input, output));
    let prompts = Arc::new(Prompts::default());
    StagePlan::new(
        Arc::new(ExtractionStage::new(
            client.clone(),
            store.clone(),
            prompts.ocr.clone(),
        )),
        Arc::new(TranslationStage::new(client, store.clone(), prompts)),
        Arc::new(StructuringStage),
        Arc::new(PersistenceStage::new(store)),
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn manifest_round_trip_through_every_stage() {
    let server = gemini().await;
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input");
    let output = root.path().join("output");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::write(input.join("atlas.txt"), "page one").unwrap();
    std::fs::write(input.join("map.pdf"), b"%PDF-1.4 fake").unwrap();

    let manifest_path = root.path().join("manifest.csv");
    std::fs::write(
        &manifest_path,
        "fileId,source,targetLangs,bookName,status\n\
         atlas-1,atlas.txt,\"fr,de\",Atlas,pending\n\
         map-2,map.pdf,none,,pending\n\
         lost-3,lost.pdf,fr,,pending\n",
    )
    .unwrap();

    let records = read_manifest(&manifest_path).await.unwrap();
    let result_path = root.path().join("result.csv");
    let batch = BatchJob::new(&manifest_path, records).with_write_back(&result_path);

    let rotator = Arc::new(ResourceRotator::new(StaticKeys::new(vec![
        "key-one".into(),
        "key-two".into(),
    ])));
    let plan = Arc::new(plan(&server, &input, &output));
    let coordinator = BatchCoordinator::new(rotator.clone(), plan)
        .with_max_concurrency(2)
        .with_session_id("session-it")
        .with_logger(Arc::new(FileLogger::new(root.path().join("logs"), "session-it")))
        .with_error_log(Arc::new(LocalErrorLog::new(root.path().join("errors"))));

    let batch = coordinator.run(batch).await.unwrap();
    write_manifest(&batch.write_back_path, &batch.records)
        .await
        .unwrap();

    // Records come back in manifest order with final statuses.
    let ids: Vec<&str> = batch.records.iter().map(|r| r.job_id.as_str()).collect();
    assert_eq!(ids, ["atlas-1", "map-2", "lost-3"]);
    assert_eq!(batch.records[0].status, ManifestStatus::Processed);
    assert_eq!(batch.records[1].status, ManifestStatus::Processed);
    assert_eq!(batch.records[2].status, ManifestStatus::Failed);
    assert_eq!(
        batch.records[2].outcome(),
        RecordOutcome::FailedAt(Stage::Extraction)
    );

    let atlas = batch.records[0].artifacts();
    assert_eq!(atlas.extracted_text(), Some("EXTRACTED"));
    let translations = atlas.translations().unwrap();
    assert_eq!(translations["fr"], "TRANSLATED");
    assert_eq!(translations["de"], "TRANSLATED");
    assert_eq!(
        atlas.structured().unwrap()["processingMetadata"]["sessionId"],
        "session-it"
    );

    // Stage exports.
    assert_eq!(
        std::fs::read_to_string(output.join("ocr_atlas_1.txt")).unwrap(),
        "EXTRACTED"
    );
    assert!(output.join("translated_atlas_1_fr.txt").exists());
    assert!(output.join("translated_atlas_1_de.txt").exists());
    assert!(output.join("processed_atlas_1.json").exists());
    assert!(output.join("processed_map_2.json").exists());
    assert!(!output.join("processed_lost_3.json").exists());
    assert!(root.path().join("errors/error_lost_3.txt").exists());

    // Both keys were used and every allocation is counted.
    let usage = rotator.usage();
    assert_eq!(usage.len(), 2);
    assert_eq!(usage.iter().map(|(_, n)| n).sum::<u64>(), 3);

    // Summary and write-back agree.
    let summary = CompletionReporter::summarize(&batch.records);
    assert_eq!((summary.total, summary.succeeded, summary.failed), (3, 2, 1));

    let written = std::fs::read_to_string(&result_path).unwrap();
    let reread = parse_manifest(written.as_bytes()).unwrap();
    let statuses: Vec<_> = reread
        .iter()
        .map(|r| r.original_status.as_deref().unwrap_or_default())
        .collect();
    assert_eq!(statuses, ["processed", "processed", "failed"]);
    assert!(written.contains("lost-3,lost.pdf,fr,,failed,Extraction: Storage error"));

    let log_files = std::fs::read_dir(root.path().join("logs")).unwrap().count();
    assert_eq!(log_files, 4);
}

#[tokio::test]
async fn empty_key_source_fails_every_record_without_calling_the_model() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("a.txt"), "text").unwrap();

    let records = parse_manifest(b"fileId,source,targetLangs\na,a.txt,fr\nb,a.txt,de\n").unwrap();
    let rotator = Arc::new(ResourceRotator::new(StaticKeys::new(vec![])));
    let coordinator = BatchCoordinator::new(
        rotator,
        Arc::new(plan(&server, root.path(), root.path())),
    );

    let batch = coordinator
        .run(BatchJob::new("manifest.csv", records))
        .await
        .unwrap();

    for record in &batch.records {
        assert_eq!(record.status, ManifestStatus::Failed);
        assert_eq!(record.error_summary(), "Key Rotation: no resource available");
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}
