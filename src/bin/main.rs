use gastown::{cli, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());

    // The daemon installs its own telemetry with a rolling file layer.
    let _telemetry_guard = if cli::is_daemon_run(&cli) {
        None
    } else {
        Some(telemetry::init_cli(cli.verbose))
    };

    if let Err(e) = cli::run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
