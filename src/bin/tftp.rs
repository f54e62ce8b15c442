//! `tftp` — the interactive client binary. Bootstraps logging, optionally
//! connects to a remote given on the command line, then hands off to the
//! REPL (spec.md §4.6/§6).

use anyhow::Result;
use clap::Parser;

use tftp_rs::client::Client;
use tftp_rs::config::ClientConfig;
use tftp_rs::repl;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ClientConfig::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level)).init();

    let mut client = Client::new(cli.session_options());

    if let Some(host) = &cli.host {
        if let Err(e) = client.connect(host, cli.port).await {
            eprintln!("{e}");
        }
    }

    repl::run(&mut client).await;
    Ok(())
}
