//! payload-tool - inspect, decode and trim DAQ payload files
//!
//! Usage:
//!   payload-tool scan <file>                         - List the records of every payload
//!   payload-tool decode <file> [--format msgpack]    - Decode payloads to JSON lines or MessagePack
//!   payload-tool trim <file> <output> --board <id>   - Remove launches of selected boards
//!   payload-tool sizes <file>                        - Per-board launch sizes as JSON lines
//!   payload-tool synth <output> --events <n>         - Write synthetic events

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use payload_parsing::common::{CounterSnapshot, PayloadCounters};
use payload_parsing::config::{parse_boards, Config};
use payload_parsing::decoder::{DecodeConfiguration, RecordRegistry, V5Event};
use payload_parsing::emulator::PayloadEmulator;
use payload_parsing::payload::trimmer::encoded_sizes;
use payload_parsing::payload::{
    EventDecoder, PayloadFileReader, PayloadFileWriter, PayloadScanner, PayloadTrimmer,
    RecordContent, TrimSelection,
};

#[derive(Parser)]
#[command(name = "payload-tool")]
#[command(about = "Inspect, decode and trim DAQ event payload files")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "PAYLOAD_TOOL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the records of every payload
    Scan {
        /// Payload file
        file: PathBuf,

        /// Keep records of unknown type instead of failing
        #[arg(long)]
        skip_unsupported: bool,
    },

    /// Decode every payload
    Decode {
        /// Payload file
        file: PathBuf,

        /// Output encoding
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip waveform decoding
        #[arg(long)]
        headers_only: bool,
    },

    /// Remove launches of selected boards from every payload
    Trim {
        /// Payload file
        file: PathBuf,

        /// Output payload file
        output: PathBuf,

        /// Mainboard ID in hex (repeatable; adds to the configured boards)
        #[arg(short, long = "board")]
        boards: Vec<String>,

        /// Also remove trigger request records
        #[arg(long)]
        drop_triggers: bool,

        /// Worker threads
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Print the launch record sizes of each board as JSON lines
    Sizes {
        /// Payload file
        file: PathBuf,
    },

    /// Write synthetic events to a payload file
    Synth {
        /// Output payload file
        output: PathBuf,

        /// Number of events
        #[arg(short, long, default_value = "100")]
        events: usize,

        /// RNG seed (overrides the configured one)
        #[arg(short, long)]
        seed: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Msgpack,
}

fn main() {
    let filter = match "payload_parsing=info".parse::<Directive>() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Scan {
            file,
            skip_unsupported,
        } => scan_file(&file, &config, skip_unsupported),
        Commands::Decode {
            file,
            format,
            output,
            headers_only,
        } => decode_file(&file, &config, format, output.as_deref(), headers_only),
        Commands::Trim {
            file,
            output,
            boards,
            drop_triggers,
            jobs,
        } => {
            let mut selection = config.trim.selection()?;
            selection.boards.extend(parse_boards(&boards)?);
            selection.drop_triggers |= drop_triggers;
            let jobs = jobs.unwrap_or(config.trim.jobs).max(1);
            trim_file(&file, &output, &config, &selection, jobs)
        }
        Commands::Sizes { file } => print_sizes(&file, &config),
        Commands::Synth {
            output,
            events,
            seed,
        } => synthesize(&output, &config, events, seed),
    }
}

fn scanner(config: &Config, skip_unsupported: bool) -> PayloadScanner<'static> {
    PayloadScanner::new(config.decode.configuration())
        .skip_unsupported(skip_unsupported || config.decode.skip_unsupported)
}

fn read_all(path: &Path) -> Result<Vec<Vec<u8>>> {
    PayloadFileReader::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("reading {}", path.display()))
}

fn scan_file(path: &Path, config: &Config, skip_unsupported: bool) -> Result<()> {
    let scanner = scanner(config, skip_unsupported);
    let registry = RecordRegistry::global();

    for (n, payload) in PayloadFileReader::open(path)?.enumerate() {
        let payload = payload?;
        if V5Event::is_v5(&payload) {
            print_v5(n, &payload)?;
            continue;
        }
        let index = scanner
            .scan(&payload)
            .with_context(|| format!("scanning payload {}", n))?;

        match &index.header {
            Some(header) => println!(
                "payload {}: event {} run {} year {} ({} bytes, {} records)",
                n,
                header.event_id,
                header.run_id,
                header.year,
                payload.len(),
                index.len()
            ),
            None => println!("payload {}: {} bytes, {} records", n, payload.len(), index.len()),
        }

        for record in &index.records {
            let name = registry.name(record.tag).unwrap_or("unsupported");
            match &record.content {
                RecordContent::Launch(launch) => println!(
                    "  {:>8}  {:>5} B  type {:>2} {:<30} board {}  t={:.1} ns  {}",
                    record.span.start,
                    record.span.len(),
                    record.tag,
                    name,
                    launch.board,
                    launch.start_time,
                    launch.trigger_type
                ),
                RecordContent::Trigger(trigger) => println!(
                    "  {:>8}  {:>5} B  type {:>2} {:<30} source {}  {} sub-triggers",
                    record.span.start,
                    record.span.len(),
                    record.tag,
                    name,
                    trigger.source_id,
                    trigger.sub_triggers.len()
                ),
                RecordContent::Unsupported => println!(
                    "  {:>8}  {:>5} B  type {:>2} {}",
                    record.span.start,
                    record.span.len(),
                    record.tag,
                    name
                ),
            }
        }
    }
    Ok(())
}

fn print_v5(n: usize, payload: &[u8]) -> Result<()> {
    let event = V5Event::parse(payload).with_context(|| format!("scanning V5 payload {}", n))?;
    println!(
        "payload {}: V5 event {} run {} year {} ({} bytes, {} hit records, {} trigger records)",
        n,
        event.header.event_id,
        event.header.run_id,
        event.header.year,
        payload.len(),
        event.hits.len(),
        event.triggers.len()
    );
    for hit in &event.hits {
        println!("  {:>8}  {:>5} B  hit record {:?}", hit.span.start, hit.span.len(), hit.kind);
    }
    for trigger in &event.triggers {
        println!(
            "  {:>8}  {:>5} B  trigger record, {} hit indices",
            trigger.span.start,
            trigger.span.len(),
            trigger.hit_indices
        );
    }
    Ok(())
}

fn decode_file(
    path: &Path,
    config: &Config,
    format: OutputFormat,
    output: Option<&Path>,
    headers_only: bool,
) -> Result<()> {
    let mut decode: DecodeConfiguration = config.decode.configuration();
    if headers_only {
        decode = decode.headers_only();
    }
    let decoder = EventDecoder::with_scanner(
        PayloadScanner::new(decode).skip_unsupported(config.decode.skip_unsupported),
    );

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    let mut events = 0u64;
    for (n, payload) in PayloadFileReader::open(path)?.enumerate() {
        let payload = payload?;
        let event = decoder
            .decode(&payload)
            .with_context(|| format!("decoding payload {}", n))?;
        match format {
            OutputFormat::Json => {
                serde_json::to_writer(&mut out, &event)?;
                writeln!(out)?;
            }
            OutputFormat::Msgpack => out.write_all(&rmp_serde::to_vec_named(&event)?)?,
        }
        events += 1;
    }
    out.flush()?;
    info!(events, "decoded payloads");
    Ok(())
}

fn trim_file(
    path: &Path,
    output: &Path,
    config: &Config,
    selection: &TrimSelection,
    jobs: usize,
) -> Result<()> {
    if selection.is_empty() {
        warn!("empty selection; payloads are copied unchanged");
    }

    let payloads = read_all(path)?;
    let trimmer = PayloadTrimmer::new(scanner(config, false));
    let counters = PayloadCounters::new();
    let chunk_size = payloads.len().div_ceil(jobs).max(1);

    let results: Vec<Option<Vec<u8>>> = std::thread::scope(|s| {
        let handles: Vec<_> = payloads
            .chunks(chunk_size)
            .enumerate()
            .map(|(chunk, batch)| {
                let counters = &counters;
                s.spawn(move || {
                    batch
                        .iter()
                        .enumerate()
                        .map(|(i, payload)| {
                            let n = chunk * chunk_size + i;
                            match trimmer.trim(payload, selection) {
                                Ok(trimmed) => {
                                    counters.inc_payloads();
                                    counters.add_records_removed(trimmed.removed_records as u64);
                                    counters.add_bytes(payload.len() as u64, trimmed.data.len() as u64);
                                    Some(trimmed.data)
                                }
                                Err(e) => {
                                    counters.inc_failures();
                                    warn!(payload = n, error = %e, "dropping payload that failed to trim");
                                    None
                                }
                            }
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    });

    let mut writer = PayloadFileWriter::create(output)
        .with_context(|| format!("creating {}", output.display()))?;
    for data in results.iter().flatten() {
        writer.write_payload(data)?;
    }
    writer.finish()?;

    print_summary(&counters.snapshot());
    let failures = counters.snapshot().failures;
    if failures > 0 {
        bail!("{} payloads could not be trimmed", failures);
    }
    Ok(())
}

fn print_summary(snapshot: &CounterSnapshot) {
    println!("Payloads:        {}", snapshot.payloads);
    println!("Failures:        {}", snapshot.failures);
    println!("Records removed: {}", snapshot.records_removed);
    println!(
        "Size:            {} -> {} ({:.1}%)",
        CounterSnapshot::format_bytes(snapshot.bytes_in),
        CounterSnapshot::format_bytes(snapshot.bytes_out),
        snapshot.size_ratio() * 100.0
    );
}

fn print_sizes(path: &Path, config: &Config) -> Result<()> {
    let scanner = scanner(config, false);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (n, payload) in PayloadFileReader::open(path)?.enumerate() {
        let payload = payload?;
        let index = scanner
            .scan(&payload)
            .with_context(|| format!("scanning payload {}", n))?;
        serde_json::to_writer(&mut out, &encoded_sizes(&index))?;
        writeln!(out)?;
    }
    Ok(())
}

fn synthesize(output: &Path, config: &Config, events: usize, seed: Option<u64>) -> Result<()> {
    let mut emulator_config = config.emulator.clone();
    if seed.is_some() {
        emulator_config.seed = seed;
    }
    let mut emulator = PayloadEmulator::new(emulator_config)?;

    let mut writer = PayloadFileWriter::create(output)
        .with_context(|| format!("creating {}", output.display()))?;
    for _ in 0..events {
        writer.write_payload(&emulator.generate_event()?)?;
    }
    let bytes = writer.bytes_written();
    writer.finish()?;

    info!(
        events,
        boards = emulator.boards().len(),
        size = %CounterSnapshot::format_bytes(bytes),
        path = %output.display(),
        "wrote synthetic events"
    );
    Ok(())
}
