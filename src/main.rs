use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use time::macros::format_description;
use tracing_appender::non_blocking;
use tracing_subscriber::fmt::time::LocalTime;

use torrent::{parse_torrent, start_session, AnnounceConfig};
use torrent::config::{DEFAULT_PORT, DEFAULT_TRACKER_TIMEOUT};

#[derive(Parser, Debug)]
#[command(name="announce", version, about="Inspect a .torrent file or ask its tracker for peers")]
struct Args {
    #[arg(short, long, help="Print contents of torrent file instead of announcing")]
    inspect: bool,

    #[arg(short, long, default_value_t=DEFAULT_PORT, help="Port reported to the tracker")]
    port: u16,

    #[arg(short, long, default_value_t=DEFAULT_TRACKER_TIMEOUT.as_secs(), help="Tracker timeout in seconds")]
    timeout: u64,

    #[arg(long, default_value="logs", help="Directory the log file is written to")]
    log_dir: PathBuf,

    file: PathBuf,
}

impl From<&Args> for AnnounceConfig {
    fn from(args: &Args) -> Self {
        AnnounceConfig::default()
            .with_port(args.port)
            .with_timeout(Duration::from_secs(args.timeout))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filename = args.file.display();

    let file_appender = tracing_appender::rolling::never(&args.log_dir, "announce.log");
    let (non_blocking, _guard) = non_blocking(file_appender);
    let timer = LocalTime::new(
        format_description!("[month]/[day]/[year] [hour repr:24]:[minute]:[second].[subsecond digits:4]"));
    tracing_subscriber::fmt().with_writer(non_blocking).with_ansi(false).with_timer(timer).init();

    if args.inspect {
        match parse_torrent(&args.file) {
            Ok(torrent) => {
                println!("Contents of {}:\n{}", filename, torrent);
                ExitCode::SUCCESS
            },
            Err(e) => {
                eprintln!("Unable to parse {}: {e}", filename);
                ExitCode::FAILURE
            },
        }
    } else {
        match start_session(&args.file, &AnnounceConfig::from(&args)).await {
            Ok(session) => {
                println!("Tracker for {} offered {} peer(s), re-announce in {}s:", filename, session.peers.len(), session.interval);
                for (i, peer) in session.peers.iter().enumerate() {
                    println!("{i:03}: {peer}");
                }
                ExitCode::SUCCESS
            },
            Err(e) => {
                eprintln!("Announce for {} failed: {e}", filename);
                ExitCode::FAILURE
            },
        }
    }
}
