use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::Value;
use simplelog::{ConfigBuilder, WriteLogger};
use tokio_util::sync::CancellationToken;

use waypoint::core::config::{self, CliOverrides};
use waypoint::stream::{chunked_body, parse_deferred};

#[derive(Parser)]
#[command(name = "waypoint", about = "Navigation engine tooling")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a captured deferred loader body
    Decode {
        /// File holding the raw response body
        file: PathBuf,
        /// Replay the body in chunks of this many bytes
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Pretty-print JSON values
        #[arg(long)]
        pretty: bool,
    },
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    let Command::Decode {
        file,
        chunk_size,
        pretty,
    } = args.command;

    let file_config = config::load_config().map_err(io::Error::other)?;
    let resolved = config::resolve(&file_config, &CliOverrides { chunk_size, pretty });

    let log_config = ConfigBuilder::new().set_time_format_rfc3339().build();
    if let Ok(log_file) = File::create(&resolved.log_file) {
        let _ = WriteLogger::init(resolved.log_level, log_config, log_file);
    }
    log::info!("Waypoint decoding {} ({} byte chunks)", file.display(), resolved.chunk_size);

    let bytes = fs::read(&file)?;
    let body = chunked_body(bytes, resolved.chunk_size);
    let parsed = parse_deferred(Some(body), CancellationToken::new())
        .await
        .map_err(io::Error::other)?;

    let render = |value: &Value| {
        let text = if resolved.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        text.map_err(io::Error::other)
    };

    println!("{}", render(&parsed.initial.unwrap_or(Value::Null))?);

    // print fields in the order they resolve, not the order they were declared
    let mut pending: FuturesUnordered<_> = parsed
        .deferred
        .into_iter()
        .map(|(field, deferred)| async move { (field, deferred.wait().await) })
        .collect();
    while let Some((field, result)) = pending.next().await {
        match result {
            Ok(value) => println!("{field}: {}", render(&value)?),
            Err(e) => {
                log::warn!("Deferred field {field} failed: {e}");
                println!("{field}: error: {e}");
            }
        }
    }

    Ok(())
}
