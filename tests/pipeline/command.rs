use std::{fs, os::unix::fs::PermissionsExt, path::Path, sync::Arc};

use uuid::Uuid;

use porichoy::{
    broker::{ActionTracker, BrokerPublisher, TracingActionObserver},
    pipeline::{CommandAnalyzer, PipelineSettings, RecognitionPipeline, Sentinels},
    record::{JsonlRecordSink, RecordSink},
    testing::ScriptedTransport,
    types::{OutcomeRecord, QoS},
};

fn write_executable(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("script should be written");
    let mut permissions = fs::metadata(path).expect("script metadata").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).expect("script should be executable");
}

#[tokio::test]
async fn external_analyzer_output_flows_to_result_topic_and_collection() {
    let dir = std::env::temp_dir().join(format!("porichoy-command-test-{}", Uuid::now_v7()));
    let corpus = dir.join("known_people");
    fs::create_dir_all(&corpus).expect("corpus dir should be created");
    fs::write(corpus.join("bob"), "bob").expect("corpus entry written");

    // Prints one line per corpus entry, like the real recognizer.
    let script = dir.join("recognize.sh");
    write_executable(
        &script,
        r#"for face in "$1"/*; do echo "$2,$(basename "$face")"; done"#,
    );

    let (transport, _session_rx, _inbound_rx) = ScriptedTransport::wired(1);
    let tracker = Arc::new(ActionTracker::new(Arc::new(TracingActionObserver)));
    let sink = Arc::new(JsonlRecordSink::new(dir.join("records"), "responses"));
    let record_sink: Arc<dyn RecordSink> = sink.clone();
    let staging_path = dir.join("temp.jpg");
    let pipeline = RecognitionPipeline::new(
        PipelineSettings {
            staging_path: staging_path.clone(),
            result_topic: "Result".to_string(),
            result_qos: QoS::AtMostOnce,
            sentinels: Sentinels::default(),
            no_match_message: "No match found".to_string(),
        },
        Arc::new(CommandAnalyzer::new(
            script.display().to_string(),
            Vec::new(),
            corpus.clone(),
        )),
        BrokerPublisher::new(transport.clone(), tracker),
        record_sink,
    );

    let record = pipeline
        .run_once(b"\xFF\xD8 jpeg")
        .await
        .expect("run should succeed");

    assert_eq!(record.response, "bob");
    assert_eq!(
        transport.published(),
        vec![(
            "Result".to_string(),
            QoS::AtMostOnce,
            format!("{},bob\n", staging_path.display())
        )]
    );
    assert_eq!(fs::read(&staging_path).expect("staged artifact"), b"\xFF\xD8 jpeg");

    let stored: Vec<OutcomeRecord> = fs::read_to_string(sink.path())
        .expect("collection written")
        .lines()
        .map(|line| serde_json::from_str(line).expect("record line"))
        .collect();
    assert_eq!(stored, vec![record]);

    let _ = fs::remove_dir_all(&dir);
}
