use autowebprompt::cli::{self, Commands};
use autowebprompt::errors::AutoWebError;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!cli.no_color);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    if cli.no_color {
        console::set_colors_enabled(false);
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    let result = match cli.command {
        Commands::Run(args) => cli::run::handle_run(args, shutdown).await,
        Commands::Batch(args) => cli::batch::handle_batch(args, shutdown).await,
        Commands::Validate(args) => cli::validate::handle_validate(args).await,
        Commands::Check(args) => cli::check::handle_check(args).await,
        Commands::Tasks(args) => cli::tasks::handle_tasks(args).await,
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            let exit_code = match &e {
                AutoWebError::Config(_) | AutoWebError::Yaml(_) => 2,
                AutoWebError::Browser(_) => 3,
                _ => 1,
            };
            std::process::exit(exit_code);
        }
    }
}
