//! End-to-end tests: sender -> receiver -> coordinator -> observer over loopback

use byteorder::{LittleEndian, WriteBytesExt};
use meshdrop::geometry::{Attribute, Diagnostic, MaterialTable, ObjectGeometry};
use meshdrop::ingest::{IngestObserver, IngestionError, StatusEvent, TickOutcome};
use meshdrop::network::{
    send, DirectoryStorage, FileReceiver, FrameSection, ProtocolError, ReceiveError,
    ReceiverConfig, ReceiverHandle, CENTER_BATCH_COMMAND,
};
use meshdrop::{Coordinator, CoordinatorOptions, IngestSummary};
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const CUBE: &str = "\
# unit cube
o cube
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
v 0 0 1
v 1 0 1
v 1 1 1
v 0 1 1
f 1 4 3 2
f 5 6 7 8
f 1 2 6 5
f 2 3 7 6
f 3 4 8 7
f 4 1 5 8
";

#[derive(Default)]
struct Recorder {
    ready: Vec<PathBuf>,
    commands: Vec<String>,
    objects: Vec<ObjectGeometry>,
    errors: Vec<String>,
    /// (section, expected, received) of every truncated transfer
    truncated: Vec<(FrameSection, u64, u64)>,
    summaries: Vec<IngestSummary>,
    statuses: Vec<StatusEvent>,
}

impl IngestObserver for Recorder {
    fn on_file_ready(&mut self, path: &Path) {
        self.ready.push(path.to_path_buf());
    }

    fn on_command(&mut self, name: &str) {
        self.commands.push(name.to_string());
    }

    fn on_geometry(&mut self, _source: &Path, object: ObjectGeometry, _materials: &MaterialTable) {
        self.objects.push(object);
    }

    fn on_ingestion_error(&mut self, context: &str, error: &IngestionError) {
        self.errors.push(format!("{context}: {error}"));
        if let IngestionError::Transfer {
            source:
                ReceiveError::Protocol(ProtocolError::TruncatedFrame {
                    section,
                    expected,
                    received,
                }),
            ..
        } = error
        {
            self.truncated.push((*section, *expected, *received));
        }
    }

    fn on_ingested(&mut self, _source: &Path, summary: &IngestSummary) {
        self.summaries.push(summary.clone());
    }

    fn on_status(&mut self, status: &StatusEvent) {
        self.statuses.push(status.clone());
    }
}

struct Harness {
    _dir: TempDir,
    storage: PathBuf,
    addr: SocketAddr,
    handle: ReceiverHandle,
    coordinator: Coordinator<Recorder>,
}

impl Harness {
    fn start() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("received");
        let config = ReceiverConfig {
            poll_interval: Duration::from_millis(10),
            ..ReceiverConfig::default()
        };
        let receiver =
            FileReceiver::bind_with_config("127.0.0.1:0", config, DirectoryStorage::new(&storage))
                .unwrap();
        let addr = receiver.local_addr().unwrap();
        let (events, handle) = receiver.run_async().unwrap();
        let coordinator =
            Coordinator::new(events, Recorder::default(), CoordinatorOptions::default());

        Self {
            _dir: dir,
            storage,
            addr,
            handle,
            coordinator,
        }
    }

    /// Tick until `done` holds for the observer and the coordinator is idle
    fn drive(&mut self, done: impl Fn(&Recorder) -> bool) -> &Recorder {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let outcome = self.coordinator.tick();
            if outcome == TickOutcome::Idle && done(self.coordinator.observer()) {
                break;
            }
            assert!(Instant::now() < deadline, "timed out waiting for ingestion");
            if outcome == TickOutcome::Idle {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        self.coordinator.observer()
    }
}

#[test]
fn test_cube_file_is_ingested() {
    let mut harness = Harness::start();
    send(harness.addr, "cube.geo", CUBE.as_bytes()).unwrap();

    let storage = harness.storage.clone();
    let recorder = harness.drive(|r| !r.summaries.is_empty());

    assert_eq!(recorder.ready, vec![storage.join("cube.geo")]);
    assert_eq!(
        std::fs::read_to_string(storage.join("cube.geo")).unwrap(),
        CUBE
    );

    assert_eq!(recorder.objects.len(), 1);
    let cube = &recorder.objects[0];
    assert_eq!(cube.name, "cube");
    assert_eq!(cube.triangle_count(), 12);
    assert_eq!(cube.batches.len(), 1);
    assert_eq!(cube.batches[0].positions.len(), 8);
    assert_eq!(cube.bounds().size(), [1.0, 1.0, 1.0]);

    let summary = &recorder.summaries[0];
    assert_eq!(summary.stats.faces, 6);
    assert_eq!(summary.stats.triangles, 12);
    assert!(summary.diagnostics.is_empty());
    assert!(recorder.errors.is_empty());
    assert!(recorder.statuses.iter().all(|s| !s.is_error()));
    assert_eq!(recorder.statuses.len(), 2);

    assert_eq!(harness.handle.stats().files_stored, 1);
}

#[test]
fn test_center_command_is_forwarded() {
    let mut harness = Harness::start();
    send(harness.addr, CENTER_BATCH_COMMAND, &[]).unwrap();

    let recorder = harness.drive(|r| !r.commands.is_empty());

    assert_eq!(recorder.commands, vec![CENTER_BATCH_COMMAND.to_string()]);
    assert!(recorder.ready.is_empty());
    assert!(recorder.objects.is_empty());
    assert_eq!(recorder.statuses.len(), 1);
    assert!(!harness.storage.join(CENTER_BATCH_COMMAND).exists());
}

#[test]
fn test_truncated_transfer_reports_error() {
    let mut harness = Harness::start();

    let mut stream = TcpStream::connect(harness.addr).unwrap();
    let name = b"cube.obj";
    stream
        .write_i32::<LittleEndian>(name.len() as i32)
        .unwrap();
    stream.write_all(name).unwrap();
    stream.write_i64::<LittleEndian>(1000).unwrap();
    stream.write_all(&CUBE.as_bytes()[..100]).unwrap();
    drop(stream);

    let recorder = harness.drive(|r| !r.errors.is_empty());

    assert!(recorder.ready.is_empty());
    assert!(recorder.objects.is_empty());
    assert_eq!(recorder.errors.len(), 1);
    assert!(recorder.errors[0].starts_with("cube.obj"));
    assert_eq!(recorder.truncated, vec![(FrameSection::Payload, 1000, 100)]);
    assert_eq!(recorder.statuses.len(), 1);
    assert!(recorder.statuses[0].is_error());
    assert!(!harness.storage.join("cube.obj").exists());
}

#[test]
fn test_unresolvable_index_is_a_diagnostic() {
    let mut harness = Harness::start();
    let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 999999\nf 1 2 3\n";
    send(harness.addr, "broken.obj", source.as_bytes()).unwrap();
    send(harness.addr, CENTER_BATCH_COMMAND, &[]).unwrap();

    let recorder = harness.drive(|r| !r.summaries.is_empty() && !r.commands.is_empty());

    // The bad corner is replaced, the face survives as a zero-area triangle
    assert_eq!(recorder.objects.len(), 1);
    assert_eq!(recorder.objects[0].triangle_count(), 2);

    let diagnostics = recorder.summaries[0].diagnostics.as_slice();
    assert_eq!(
        diagnostics,
        &[Diagnostic::UnresolvableIndex {
            line: 4,
            attribute: Attribute::Position,
            index: 999999,
            pool_len: 3,
        }]
    );
    assert!(recorder.errors.is_empty());
    assert_eq!(recorder.commands.len(), 1);
}

#[test]
fn test_events_wait_while_a_file_is_processed() {
    let mut harness = Harness::start();
    send(harness.addr, "first.obj", CUBE.as_bytes()).unwrap();

    // Take the file event so the coordinator starts processing
    let deadline = Instant::now() + Duration::from_secs(10);
    while harness.coordinator.observer().ready.is_empty() {
        assert!(Instant::now() < deadline, "file never arrived");
        if harness.coordinator.tick() == TickOutcome::Idle {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
    send(harness.addr, CENTER_BATCH_COMMAND, &[]).unwrap();

    let recorder = harness.drive(|r| !r.commands.is_empty());
    let messages: Vec<&str> = recorder
        .statuses
        .iter()
        .map(|s| s.message.as_str())
        .collect();

    assert_eq!(messages.len(), 3);
    assert!(messages[0].starts_with("Received first.obj"));
    assert!(messages[1].starts_with("Ingested first.obj"));
    assert!(messages[2].contains(CENTER_BATCH_COMMAND));
}

#[test]
fn test_run_returns_once_receiver_stops() {
    let Harness {
        _dir,
        addr,
        handle,
        mut coordinator,
        ..
    } = Harness::start();
    send(addr, CENTER_BATCH_COMMAND, &[]).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while coordinator.observer().commands.is_empty() {
        assert!(Instant::now() < deadline, "command never arrived");
        if coordinator.tick() == TickOutcome::Idle {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
    // A live receiver keeps the queue open
    assert_eq!(coordinator.tick(), TickOutcome::Idle);

    handle.shutdown();
    coordinator.run(Duration::from_millis(1));

    assert_eq!(coordinator.tick(), TickOutcome::Closed);
    assert_eq!(coordinator.observer().commands.len(), 1);
}
