use clap::Parser;
use log::{info, warn};
use meshdrop::network::{send_batch, FileSender, SenderConfig};
use meshdrop::Settings;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Send files to a meshdrop receiver, one connection per file"
)]
struct Args {
    /// Files or glob patterns to send, in order
    #[arg(required = true)]
    files: Vec<String>,

    /// Server address
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    /// Server port
    #[arg(short, long, default_value = "12345")]
    port: u16,

    /// Pause between files in milliseconds
    #[arg(short = 'd', long)]
    pause_ms: Option<u64>,

    /// Send the center command after the last file
    #[arg(short, long)]
    center: bool,

    /// Settings file (defaults to meshdrop.toml in the working directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

const DEFAULT_PAUSE_MS: u64 = 200;

/// Expand glob patterns, keeping plain paths that match nothing as given
fn expand_inputs(inputs: &[String]) -> Result<Vec<PathBuf>, glob::PatternError> {
    let mut paths = Vec::new();
    for input in inputs {
        let mut matched: Vec<PathBuf> = glob::glob(input)?.filter_map(Result::ok).collect();
        if matched.is_empty() {
            paths.push(PathBuf::from(input));
        } else {
            matched.sort();
            paths.append(&mut matched);
        }
    }
    Ok(paths)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::load_from_dir(&std::env::current_dir()?)?,
    }
    .unwrap_or_default();

    let mut config = SenderConfig::default();
    settings.apply_to_sender(&mut config);
    let pause = Duration::from_millis(
        args.pause_ms
            .or(settings.sender().pause_ms)
            .unwrap_or(DEFAULT_PAUSE_MS),
    );

    let paths = expand_inputs(&args.files)?;
    let addr = format!("{}:{}", args.server, args.port);
    info!("Sending {} files to {}", paths.len(), addr);

    let sender = FileSender::new(config);
    let start = Instant::now();
    let sent = match send_batch(&sender, addr.as_str(), &paths, pause) {
        Ok(sent) => sent,
        Err((sent, e)) => {
            warn!("Sent {} of {} files", sent, paths.len());
            return Err(e.into());
        }
    };

    if args.center {
        thread_pause(pause);
        sender.send_center_command(addr.as_str())?;
        info!("Sent center command");
    }

    println!(
        "Sent {} files to {} in {:.2}s",
        sent,
        addr,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn thread_pause(pause: Duration) {
    if !pause.is_zero() {
        std::thread::sleep(pause);
    }
}
