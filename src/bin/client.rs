use anyhow::Result;
use clap::Parser;

use sendfile::cli::ClientOpts;
use sendfile::client::send_file;

fn main() -> Result<()> {
    let opts = ClientOpts::parse();
    let config = opts.to_config();

    let summary = send_file(&config)?;
    eprintln!(
        "sent {} ({} bytes) to {}:{} in {:.3}s",
        summary.name, summary.bytes, config.host, config.port, summary.seconds
    );
    Ok(())
}
