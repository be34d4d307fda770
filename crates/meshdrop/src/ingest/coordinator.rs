//! Idle/processing state machine that turns transfer events into parsed geometry

use super::observer::{IngestObserver, StatusEvent};
use super::{IngestSummary, IngestionError};
use crate::geometry::{GeometryError, ObjPipeline, ParseOptions, Step};
use meshdrop_network::{EventReceiver, TransferEvent};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub parse: ParseOptions,
    /// Pipeline steps run per tick while a file is being processed
    pub steps_per_tick: usize,
    /// Stored files with these extensions are announced but not parsed
    pub skip_extensions: Vec<String>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            parse: ParseOptions::default(),
            steps_per_tick: 1,
            skip_extensions: ["mtl", "png", "jpg", "jpeg", "tga", "bmp"]
                .map(String::from)
                .to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Waiting for the next event
    Idle,
    /// A stored file is being parsed; further events wait in the queue
    Processing,
}

/// What a call to [`Coordinator::tick`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The queue was empty
    Idle,
    /// An event was handled or the current parse advanced
    Worked,
    /// The queue is empty and every producer is gone
    Closed,
}

struct Job {
    path: PathBuf,
    pipeline: ObjPipeline<BufReader<File>>,
    started: Instant,
}

/// Single-threaded consumer of transfer events
///
/// Each tick either takes one event from the queue or advances the current
/// parse by a bounded number of steps, never both, so the time spent per tick
/// stays small and predictable.
pub struct Coordinator<O> {
    events: EventReceiver,
    observer: O,
    options: CoordinatorOptions,
    job: Option<Job>,
}

impl<O: IngestObserver> Coordinator<O> {
    pub fn new(events: EventReceiver, observer: O, options: CoordinatorOptions) -> Self {
        Self {
            events,
            observer,
            options,
            job: None,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        if self.job.is_some() {
            CoordinatorState::Processing
        } else {
            CoordinatorState::Idle
        }
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn into_observer(self) -> O {
        self.observer
    }

    pub fn tick(&mut self) -> TickOutcome {
        if let Some(job) = self.job.take() {
            self.advance(job);
            return TickOutcome::Worked;
        }

        match self.events.try_next() {
            Ok(Some(event)) => {
                self.handle_event(event);
                TickOutcome::Worked
            }
            Ok(None) => TickOutcome::Idle,
            Err(_) => TickOutcome::Closed,
        }
    }

    /// Tick until the queue closes, sleeping `idle_wait` whenever there is nothing to do
    pub fn run(&mut self, idle_wait: Duration) {
        loop {
            match self.tick() {
                TickOutcome::Worked => {}
                TickOutcome::Idle => thread::sleep(idle_wait),
                TickOutcome::Closed => break,
            }
        }
        info!("Event queue closed; coordinator stopping");
    }

    fn handle_event(&mut self, event: TransferEvent) {
        let status = event.status_line();

        match event {
            TransferEvent::FileStored { path, .. } => {
                self.observer.on_file_ready(&path);
                self.emit(StatusEvent::info(status));
                if self.should_parse(&path) {
                    self.start(path);
                } else {
                    debug!("Not parsing {}", path.display());
                }
            }
            TransferEvent::Command { name, .. } => {
                info!("Forwarding command {}", name);
                self.observer.on_command(&name);
                self.emit(StatusEvent::info(status));
            }
            TransferEvent::Failed { name, peer, error } => {
                let context = name.clone().unwrap_or_else(|| peer.to_string());
                let error = IngestionError::Transfer {
                    name,
                    peer,
                    source: error,
                };
                self.observer.on_ingestion_error(&context, &error);
                self.emit(StatusEvent::error(status));
            }
        }
    }

    fn should_parse(&self, path: &Path) -> bool {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension {
            Some(ext) => !self.options.skip_extensions.iter().any(|s| *s == ext),
            None => true,
        }
    }

    fn start(&mut self, path: PathBuf) {
        match ObjPipeline::open(&path, self.options.parse.clone()) {
            Ok(pipeline) => {
                self.job = Some(Job {
                    path,
                    pipeline,
                    started: Instant::now(),
                })
            }
            Err(e) => self.fail(path, e),
        }
    }

    fn advance(&mut self, mut job: Job) {
        for _ in 0..self.options.steps_per_tick.max(1) {
            let step = job.pipeline.step();

            while let Some(object) = job.pipeline.next_object() {
                self.observer
                    .on_geometry(&job.path, object, job.pipeline.materials());
            }

            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Done) => {
                    self.complete(job);
                    return;
                }
                Err(e) => {
                    self.fail(job.path, e);
                    return;
                }
            }
        }
        self.job = Some(job);
    }

    fn complete(&mut self, job: Job) {
        let summary = IngestSummary {
            stats: *job.pipeline.stats(),
            diagnostics: job.pipeline.diagnostics().clone(),
            elapsed: job.started.elapsed(),
            source: job.path,
        };

        let name = display_name(&summary.source);
        if !summary.diagnostics.is_empty() {
            warn!(
                "{}: {} recoverable problems",
                name,
                summary.diagnostics.total()
            );
        }

        let status = StatusEvent::info(format!(
            "Ingested {}: {} objects, {} triangles, {} diagnostics in {:.2?}",
            name,
            summary.stats.objects,
            summary.stats.triangles,
            summary.diagnostics.total(),
            summary.elapsed
        ));
        self.observer.on_ingested(&summary.source, &summary);
        self.emit(status);
    }

    fn fail(&mut self, path: PathBuf, source: GeometryError) {
        let context = display_name(&path);
        let error = IngestionError::Geometry { path, source };
        warn!("{}", error);

        self.observer.on_ingestion_error(&context, &error);
        self.emit(StatusEvent::error(error.to_string()));
    }

    fn emit(&mut self, status: StatusEvent) {
        self.observer.on_status(&status);
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
