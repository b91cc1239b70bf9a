mod app;

use std::io;

use tracing::error;

fn main() {
    let mut runner = match app::build_console() {
        Ok(runner) => runner,
        Err(err) => {
            error!(error = %err, "startup_failed");
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    if let Err(err) = runner.run(stdin.lock(), stdout.lock()) {
        error!(error = %err, "console_io_failed");
        std::process::exit(1);
    }
}
