/// Dual console/file logging (spec §6): records always land in a
/// timestamped file under the configured directory; when console logging
/// is enabled they are additionally duplicated to stdout. One file is
/// opened per process run, mirroring the original logger's one-file-per-run
/// behavior rather than rotating mid-run.
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

pub fn init(level: &str, console: bool, dir: &Path) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(dir)?;

    let run_started = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let file_name = format!("goexpose-server-{run_started}.log");
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let file_layer = tracing_subscriber::fmt::layer().with_target(false).with_ansi(false).with_writer(non_blocking);

    if console {
        let console_layer = tracing_subscriber::fmt::layer().with_target(false).compact();
        tracing_subscriber::registry().with(filter).with(file_layer).with(console_layer).init();
    } else {
        tracing_subscriber::registry().with(filter).with(file_layer).init();
    }

    Ok(guard)
}
