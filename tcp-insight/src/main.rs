#![warn(clippy::all)]

#[macro_use]
extern crate log;

use clap::{crate_version, Parser};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use libtcp_insight::*;

mod capture;

/// TCP capture analysis tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<String>,

    /// Show only packets whose endpoint matches this substring
    #[arg(long)]
    host: Option<String>,

    /// Show only packets touching this port ("N" or "N-M")
    #[arg(long)]
    port: Option<String>,

    /// Detection sensitivity (LENIENT, BALANCED or STRICT)
    #[arg(short, long)]
    sensitivity: Option<String>,

    /// Hide IPv4 packets
    #[arg(long)]
    no_ipv4: bool,

    /// Hide IPv6 packets
    #[arg(long)]
    no_ipv6: bool,

    /// Addresses bound to the capturing host (default: private-range heuristic)
    #[arg(short, long)]
    local: Vec<String>,

    /// Print connection reports as JSON
    #[arg(long)]
    json: bool,

    /// Be verbose
    #[arg(short, long)]
    verbose: bool,

    /// Input file
    input: Option<String>,
}

fn load_config(config: &mut Config, filename: &str) -> Result<(), io::Error> {
    debug!("Loading configuration {filename}");
    let path = Path::new(&filename);
    let file = File::open(path)?;
    config.load_config(file)
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::try_from_env("TCP_INSIGHT_LOG")
        .unwrap_or_else(|_| EnvFilter::from_default_env().add_directive(default_level.into()));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .compact()
        .init();

    info!("tcp-insight {}", crate_version!());

    // load config
    let mut config = Config::default();
    if let Some(filename) = args.config.as_ref() {
        load_config(&mut config, filename)?;
    }
    // override config options from command-line arguments
    if let Some(name) = args.sensitivity.as_ref() {
        config.set("sensitivity", name.as_str());
    }

    let sensitivity = sensitivity_from_config(&config);
    let display = DisplayConfig::from_config(&config);
    let mut filter = FilterConfig::from_config(&config);
    if args.host.is_some() {
        filter.host_filter = args.host.clone();
    }
    if args.port.is_some() {
        filter.port_filter = args.port.clone();
    }
    if args.no_ipv4 {
        filter.show_ipv4 = false;
    }
    if args.no_ipv6 {
        filter.show_ipv6 = false;
    }
    if let Some(spec) = filter.port_filter.as_ref() {
        // fail early on a bad CLI filter instead of silently ignoring it
        PortRange::parse(spec).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    }

    let input_filename = match args.input.as_ref() {
        Some(s) => s.as_str(),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "Input file name cannot be empty",
            ));
        }
    };

    let mut input_reader: Box<dyn io::Read + Send> = if input_filename == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(Path::new(input_filename))?)
    };

    let session = Arc::new(Session::new());
    if !args.local.is_empty() {
        session.set_local_addresses(args.local.iter().cloned());
    }

    let queue = IngestQueue::spawn(Arc::clone(&session));
    let stats = capture::process_reader(&mut input_reader, &session, &queue)?;
    queue.shutdown();
    info!(
        "read {} blocks, {} packets, {} TCP segments",
        stats.blocks, stats.packets, stats.tcp_segments
    );

    if args.json {
        print_json(&session, sensitivity)?;
        return Ok(());
    }

    for packet in session.global_store().snapshot().iter() {
        if is_visible(packet, &filter) {
            println!("{}", format_packet_line(packet, &display));
        }
    }

    for conn in session.connections() {
        println!();
        print!("{}", connection_report(&conn, &display, sensitivity));
    }

    println!();
    print!("{}", format_status_summary(&session.status_summary()));

    Ok(())
}

fn print_json(session: &Session, sensitivity: Sensitivity) -> io::Result<()> {
    let connections: Vec<serde_json::Value> = session
        .connections()
        .iter()
        .map(|conn| {
            let store = conn.store();
            serde_json::json!({
                "id": conn.id(),
                "remote": conn.ident().to_string(),
                "status": conn.status(),
                "packets_sent": store.in_direction(Direction::Outgoing).len(),
                "packets_received": store.in_direction(Direction::Incoming).len(),
                "bytes_sent": store.bytes_in_direction(Direction::Outgoing),
                "bytes_received": store.bytes_in_direction(Direction::Incoming),
                "features": detect(conn, sensitivity),
            })
        })
        .collect();
    let doc = serde_json::json!({ "connections": connections });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}
