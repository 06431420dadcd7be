use anyhow::{Context, Result};
use clap::Parser;

use sendfile::cli::ServerOpts;
use sendfile::server::serve;

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Shutting down server (Ctrl-C)...");
        // 128 + SIGINT
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let opts = ServerOpts::parse();
    let config = opts.to_config();
    let logger = opts.logger()?;

    eprintln!("Starting sendfile server:");
    eprintln!("  Port: {}", config.port);
    eprintln!("  Bind: {}", config.bind);
    eprintln!("  Root: {}", config.root.display());
    if config.concurrent {
        eprintln!("  Mode: one thread per connection");
    }
    if config.bind.is_unspecified() {
        eprintln!("WARNING: listening on all interfaces; transfers are unencrypted and unauthenticated");
    }

    serve(&config, logger)
}
