//! CA Bundle Controller
//!
//! Keeps the `caBundle` of one admission webhook entry equal to a certificate
//! file on local disk:
//! - reasserts the bundle on a fixed interval, healing external overwrites
//!   (e.g. a reapplied manifest that omits the field)
//! - re-reads the file whenever its directory changes, so rotations propagate
//!   within one interval
//!
//! The admission webhook server itself runs separately; the two only share the
//! certificate file and the webhook configuration resource.

mod cert_source;
mod config;
mod controller;
mod error;
mod health;
mod reconciler;
mod reconciler_test;
mod test_utils;
mod watcher;

use crate::config::{Cli, Command, LogFormat};
use anyhow::Context;
use clap::Parser;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Cli {
        logging,
        command,
        run,
    } = Cli::parse();
    init_tracing(logging.log_format);

    match command.unwrap_or(Command::Run(run)) {
        Command::Run(args) => {
            info!("Starting CA Bundle Controller {}", env!("CARGO_PKG_VERSION"));

            let controller = Controller::new(args)
                .await
                .context("failed to start CA bundle reconciler")?;
            controller.run().await?;
        }
        Command::Probe(args) => {
            health::check_status(&args.options())?;
            println!("OK");
        }
        Command::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
