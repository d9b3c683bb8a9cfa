//! ircevents replay tool
//!
//! Reads raw IRC lines from stdin, runs them through a small demo mutation set
//! and logs every trigger that fires.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use ircevents::{
    BoxError, Engine, EngineConfig, EngineRuntime, LineSource, ReaderSource, Record,
    RuntimeConfig, RuntimeHooks, Value,
};

/// Replay configuration
struct Config {
    /// Optional JSON engine configuration file
    engine_config: Option<PathBuf>,
    /// Runtime queue capacity
    queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine_config: None,
            queue_capacity: RuntimeConfig::default().queue_capacity,
        }
    }
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--engine-config" | "-c" => {
                if i + 1 < args.len() {
                    config.engine_config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --engine-config requires a value");
                    std::process::exit(1);
                }
            }
            "--queue" | "-q" => {
                if i + 1 < args.len() {
                    config.queue_capacity = args[i + 1].parse().unwrap_or_else(|_| {
                        eprintln!("error: invalid queue capacity: {}", args[i + 1]);
                        std::process::exit(1);
                    });
                    i += 2;
                } else {
                    eprintln!("error: --queue requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("ircevents-replay - replay IRC lines through the trigger engine");
                println!();
                println!("USAGE:");
                println!("    ircevents-replay [OPTIONS] < lines.txt");
                println!();
                println!("OPTIONS:");
                println!("    -c, --engine-config <FILE>   JSON engine configuration");
                println!("    -q, --queue <N>              Runtime queue capacity [default: 1024]");
                println!("    -h, --help                   Print help information");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    config
}

/// Split `[:prefix] COMMAND params... [:trailing]` into a message record.
fn parse_message(line: &str) -> Result<Option<Record>, BoxError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (prefix, rest) = match line.strip_prefix(':') {
        Some(tail) => {
            let (p, r) = tail.split_once(' ').ok_or("prefix without command")?;
            (Some(p), r)
        }
        None => (None, line),
    };
    let (head, trailing) = match rest.split_once(" :") {
        Some((h, t)) => (h, Some(t)),
        None => (rest, None),
    };
    let mut words = head.split_whitespace();
    let command = words.next().ok_or("missing command")?;
    let mut params: Vec<Value> = words.map(Value::from).collect();
    if let Some(t) = trailing {
        params.push(Value::from(t));
    }

    let mut record = Record::new()
        .with("command", command.to_ascii_uppercase())
        .with("params", Value::List(params));
    if let Some(p) = prefix {
        let nick = p.split_once('!').map_or(p, |(n, _)| n);
        record.insert("nick", nick);
        record.insert("prefix", p);
    }
    record.insert("_raw", line);
    Ok(Some(record))
}

/// Extract the channel of JOIN/PART lines.
fn parse_membership(line: &str) -> Result<Option<Record>, BoxError> {
    let Some(message) = parse_message(line)? else {
        return Ok(None);
    };
    let command = message.get("command").and_then(Value::as_string).unwrap_or_default();
    if command != "JOIN" && command != "PART" {
        return Ok(None);
    }
    let channel = message
        .get("params")
        .and_then(Value::as_list)
        .and_then(|p| p.first())
        .cloned()
        .unwrap_or(Value::Null);
    Ok(Some(
        Record::new()
            .with("event", command)
            .with("channel", channel)
            .with("nick", message.get("nick").cloned().unwrap_or(Value::Null)),
    ))
}

fn build_engine(config: EngineConfig) -> Result<Engine, BoxError> {
    let mut engine = Engine::with_config(config)?;
    engine.register_namespace("message");
    engine.register_namespace("membership");
    engine.add_mutation("message", parse_message)?;
    engine.add_mutation("membership", parse_membership)?;

    engine.add_trigger("message", [("command", "PING")], |record, state| {
        let pings = state.increment("pings", 1);
        info!(pings, params = %record.get("params").cloned().unwrap_or_default(), "PING");
        Ok(())
    })?;
    engine.add_trigger("membership", [("event", "JOIN")], |record, state| {
        let joins = state.increment("joins", 1);
        info!(joins, channel = %record.get("channel").cloned().unwrap_or_default(), "JOIN");
        Ok(())
    })?;
    engine.add_trigger("membership", [("event", "PART")], |record, state| {
        let parts = state.increment("parts", 1);
        info!(parts, channel = %record.get("channel").cloned().unwrap_or_default(), "PART");
        Ok(())
    })?;
    Ok(engine)
}

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let config = parse_args();
    let engine_config = match &config.engine_config {
        Some(path) => EngineConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };

    let fired = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(AtomicU64::new(0));
    let (fired_sink, failures_sink) = (Arc::clone(&fired), Arc::clone(&failures));
    let hooks = RuntimeHooks::new().on_report(move |report| {
        fired_sink.fetch_add(report.fired.len() as u64, Ordering::Relaxed);
        let failed = report.transform_failures.len() + report.callback_failures.len();
        failures_sink.fetch_add(failed as u64, Ordering::Relaxed);
    });

    let engine = build_engine(engine_config)?;
    let runtime = EngineRuntime::start(
        engine,
        RuntimeConfig {
            queue_capacity: config.queue_capacity,
            ..RuntimeConfig::default()
        },
        hooks,
    )?;

    let stdin = io::stdin();
    let mut source = ReaderSource::new(stdin.lock());
    while let Some(line) = source.next_line() {
        runtime.submit_blocking(line?)?;
    }
    runtime.flush()?;

    info!(
        lines = runtime.processed_lines(),
        fired = fired.load(Ordering::Relaxed),
        failures = failures.load(Ordering::Relaxed),
        "replay finished"
    );
    runtime.shutdown()?;
    Ok(())
}
