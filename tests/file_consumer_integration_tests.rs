// SPDX-License-Identifier: Apache-2.0

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fileconsumer::bounded_channel::{BoundedReceiver, bounded};
use fileconsumer::checkpoint::{self, KNOWN_FILES_KEY};
use fileconsumer::{
    ChannelEmitter, EmitBatch, FileConsumerConfig, JsonFileDatabase, ManagerState,
    PersisterExt, StartAt,
};
use tempfile::TempDir;

fn config(dir: &TempDir, pattern: &str) -> FileConsumerConfig {
    FileConsumerConfig {
        include: vec![format!("{}/{}", dir.path().display(), pattern)],
        poll_interval_ms: 20,
        start_at: StartAt::Beginning,
        include_file_path: true,
        ..Default::default()
    }
}

fn append(path: &Path, content: &str) {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(content.as_bytes()).unwrap();
}

/// Collect bodies until `count` arrived or the deadline passed
fn collect(rx: &BoundedReceiver<EmitBatch>, count: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut lines = Vec::new();
    while lines.len() < count && Instant::now() < deadline {
        if let Some(batch) = rx.recv_timeout(Duration::from_millis(50)) {
            lines.extend(batch.lines.into_iter().map(|l| l.body));
        }
    }
    lines
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tails_files_through_rotation() {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = TempDir::new().unwrap();
    let log = dir.path().join("app.log");
    append(&log, "one\ntwo\n");

    let (tx, rx) = bounded(16);
    let mut manager = config(&dir, "app.log")
        .build(Arc::new(ChannelEmitter::new(tx)))
        .unwrap();

    let db = JsonFileDatabase::open_memory();
    manager.start(Arc::new(db.persister("app"))).await.unwrap();
    assert_eq!(manager.state(), ManagerState::Running);

    let lines = tokio::task::spawn_blocking({
        let rx = rx.clone();
        move || collect(&rx, 2)
    })
    .await
    .unwrap();
    assert_eq!(lines, vec!["one", "two"]);

    // rotate: the tail of the old file and the new file are both read once
    append(&log, "three\n");
    std::fs::rename(&log, dir.path().join("app.log.1")).unwrap();
    append(&log, "four\n");

    let lines = tokio::task::spawn_blocking({
        let rx = rx.clone();
        move || collect(&rx, 2)
    })
    .await
    .unwrap();
    assert_eq!(lines, vec!["three", "four"]);

    manager.stop().await.unwrap();
    assert_eq!(manager.state(), ManagerState::Stopped);
    assert!(rx.try_recv().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resumes_from_checkpoint_file() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("app.log");
    let db_path = dir.path().join("state").join("checkpoints.json");
    append(&log, "before restart\n");

    {
        let (tx, rx) = bounded(16);
        let mut manager = config(&dir, "*.log")
            .build(Arc::new(ChannelEmitter::new(tx)))
            .unwrap();
        let db = JsonFileDatabase::open(&db_path).unwrap();
        manager.start(Arc::new(db.persister("app"))).await.unwrap();

        let lines = tokio::task::spawn_blocking(move || collect(&rx, 1))
            .await
            .unwrap();
        assert_eq!(lines, vec!["before restart"]);
        manager.stop().await.unwrap();
    }

    // the checkpoint on disk points past the first line
    let db = JsonFileDatabase::open(&db_path).unwrap();
    let persister = db.persister("app");
    let saved = checkpoint::load(&persister).unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].offset, 15);
    assert_eq!(
        saved[0].file_attributes.get("log.file.path").map(String::as_str),
        log.to_str()
    );
    let raw: serde_json::Value = persister.get_json(KNOWN_FILES_KEY).unwrap().unwrap();
    assert_eq!(raw["version"], 1);

    append(&log, "after restart\n");

    let (tx, rx) = bounded(16);
    let mut config = config(&dir, "*.log");
    config.start_at = StartAt::End;
    let mut manager = config.build(Arc::new(ChannelEmitter::new(tx))).unwrap();
    manager.start(Arc::new(persister)).await.unwrap();

    let lines = tokio::task::spawn_blocking(move || collect(&rx, 1))
        .await
        .unwrap();
    assert_eq!(lines, vec!["after restart"]);
    manager.stop().await.unwrap();
}
