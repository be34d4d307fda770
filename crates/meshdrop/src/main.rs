use log::{error, info, warn};
use meshdrop::cli::{Args, DEFAULT_BIND, DEFAULT_PORT, DEFAULT_STORAGE_DIR};
use meshdrop::geometry::{MaterialTable, ObjectGeometry};
use meshdrop::ingest::{IngestObserver, IngestionError, StatusEvent};
use meshdrop::network::{DirectoryStorage, FileReceiver, ReceiverConfig};
use meshdrop::{Coordinator, CoordinatorOptions, IngestSummary, Settings};
use std::path::Path;
use std::time::Duration;

/// Sleep between coordinator ticks when the queue is empty
const IDLE_WAIT: Duration = Duration::from_millis(10);

/// Logs everything the coordinator reports
#[derive(Default)]
struct LoggingObserver {
    files: usize,
    objects: usize,
    triangles: usize,
}

impl IngestObserver for LoggingObserver {
    fn on_file_ready(&mut self, path: &Path) {
        self.files += 1;
        info!("File ready: {}", path.display());
    }

    fn on_command(&mut self, name: &str) {
        info!("Command received: {}", name);
    }

    fn on_geometry(&mut self, source: &Path, object: ObjectGeometry, materials: &MaterialTable) {
        self.objects += 1;
        self.triangles += object.triangle_count();

        let bounds = object.bounds();
        let center = bounds.center();
        info!(
            "{}: '{}' {} batches, {} vertices, {} triangles, center [{:.3}, {:.3}, {:.3}]",
            source.display(),
            object.name,
            object.batches.len(),
            object.vertex_count(),
            object.triangle_count(),
            center.x,
            center.y,
            center.z
        );
        for name in object.materials() {
            if !materials.is_empty() && !materials.contains(name) {
                warn!("{}: material '{}' not defined, using default", object.name, name);
            }
        }
    }

    fn on_ingestion_error(&mut self, context: &str, error: &IngestionError) {
        error!("{}: {}", context, error);
    }

    fn on_ingested(&mut self, source: &Path, summary: &IngestSummary) {
        for diagnostic in summary.diagnostics.iter() {
            warn!("{}: {}", source.display(), diagnostic);
        }
        if summary.diagnostics.dropped() > 0 {
            warn!(
                "{}: {} further diagnostics not shown",
                source.display(),
                summary.diagnostics.dropped()
            );
        }
        info!(
            "Totals: {} files, {} objects, {} triangles",
            self.files, self.objects, self.triangles
        );
    }

    fn on_status(&mut self, status: &StatusEvent) {
        println!("{}", status);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse_args();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::load_from_dir(&std::env::current_dir()?)?,
    }
    .unwrap_or_default();
    let receiver_settings = settings.receiver();

    let port = args.port.or(receiver_settings.port).unwrap_or(DEFAULT_PORT);
    let bind = args
        .bind
        .clone()
        .or(receiver_settings.bind)
        .unwrap_or_else(|| DEFAULT_BIND.to_string());
    let storage_dir = args
        .storage_dir
        .clone()
        .or(receiver_settings.storage_dir)
        .unwrap_or_else(|| DEFAULT_STORAGE_DIR.into());

    let mut config = ReceiverConfig::default();
    settings.apply_to_receiver(&mut config);

    let mut options = CoordinatorOptions::default();
    settings.apply_to_coordinator(&mut options);
    args.apply_to_parse(&mut options.parse);

    let receiver = FileReceiver::bind_with_config(
        format!("{}:{}", bind, port),
        config,
        DirectoryStorage::new(&storage_dir),
    )?;

    println!("Meshdrop listening on {}", receiver.local_addr()?);
    println!("Storage directory: {:?}", storage_dir);
    println!("Split mode: {}", options.parse.split_mode);
    println!("Frame format:");
    println!("  - name_len(i32 LE) + name(UTF-8)");
    println!("  - payload_len(i64 LE) + payload");

    // Dropping the handle would stop the accept loop
    let (events, _handle) = receiver.run_async()?;
    let mut coordinator = Coordinator::new(events, LoggingObserver::default(), options);
    coordinator.run(IDLE_WAIT);
    Ok(())
}
