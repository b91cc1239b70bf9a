use refbox::{resolve_tool_paths, MemoryWorld, ReferenceBoxSession, StartupError};
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::runner::ConsoleRunner;

pub(crate) fn build_console() -> Result<ConsoleRunner, StartupError> {
    init_tracing();
    info!("=== Reference Box Console ===");

    let paths = resolve_tool_paths()?;
    info!(
        root = %paths.root.display(),
        session = %paths.session_file().display(),
        snapshots = %paths.snapshot_dir.display(),
        "tool_paths_resolved"
    );

    let session = ReferenceBoxSession::open(paths);
    let mut runner = ConsoleRunner::new(MemoryWorld::new(), session);
    for line in runner.open_window() {
        println!("{line}");
    }
    Ok(runner)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout belongs to the command output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}
