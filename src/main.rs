//! Monitor for a Quectel L86-class receiver on a serial port.
//!
//! ```bash
//! lx6-monitor --port /dev/ttyUSB0
//! lx6-monitor --config lx6.json
//! lx6-monitor --list
//! ```
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use quectel_lx6::serial::{self, SerialTransport};
use quectel_lx6::{Lx6Builder, Lx6Config, NmeaSentence, SentenceKind};

#[derive(Parser)]
#[command(name = "lx6-monitor")]
#[command(about = "Stream fixes from a Quectel L86-class GNSS receiver", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port, overrides the configuration
    #[arg(long)]
    port: Option<String>,

    /// List serial ports and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if cli.list {
        for port in SerialTransport::discover_ports()? {
            println!(
                "{}  {}",
                port.port_name,
                port.product.as_deref().or(port.manufacturer.as_deref()).unwrap_or("")
            );
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Lx6Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Lx6Config::default(),
    };
    if cli.port.is_some() {
        config.port = cli.port;
    }
    let Some(port) = config.port.clone() else {
        bail!("no serial port given, use --port or set \"port\" in the configuration");
    };

    let transport = serial::shared(SerialTransport::new(&port, config.baud_rate));
    let gnss = Lx6Builder::new(transport).config(config).build();
    let mut sentences = gnss.subscribe_sentences();

    gnss.init(true).await.context("starting receiver")?;
    log::info!("Streaming from {}", port);

    loop {
        tokio::select! {
            received = sentences.recv() => match received {
                Ok(sentence) => report(&sentence),
                Err(RecvError::Lagged(skipped)) => log::warn!("Dropped {} sentences", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    log::debug!("Chat metrics: {:?}", gnss.chat_metrics());
    Ok(())
}

fn report(sentence: &NmeaSentence) {
    let field = |index: usize| sentence.fields.get(index).map(String::as_str).unwrap_or("");

    match sentence.kind {
        SentenceKind::Gga => {
            if !matches!(field(6), "" | "0") {
                println!("Got a fix! {} {} {} {} ({} satellites)", field(2), field(3), field(4), field(5), field(7));
            } else {
                log::debug!("No fix yet");
            }
        }
        SentenceKind::Gsv => {
            log::info!("{} satellites in view ({})", field(3), sentence.talker);
        }
        SentenceKind::Rmc => log::trace!("{}", sentence.line),
    }
}
