use std::env::{self, VarError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use blobscope_audit::{AuditConfig, Auditor, Operation, ReportSink, SampleStrategy, SnapshotOrder};
use blobscope_error::AuditError;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    const ENV_KEY: &'static str = "BLOBSCOPE_LOG_FORMAT";

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "human" => Some(Self::Human),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    fn from_env() -> Result<Option<Self>, String> {
        match env::var(Self::ENV_KEY) {
            Ok(value) => Self::parse(&value).map(Some).ok_or_else(|| {
                format!("invalid {}={value:?}; expected one of: human, json", Self::ENV_KEY)
            }),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => Err(format!("{} contains non-UTF-8 bytes", Self::ENV_KEY)),
        }
    }
}

#[derive(Debug)]
struct CliConfig {
    audit: AuditConfig,
    summary_json: bool,
    log_format: Option<LogFormat>,
}

fn print_help() {
    let help = "\
blobscope - offline inspector for blob store logs, index snapshots and replica tokens

USAGE:
    blobscope --operation <NAME> [OPTIONS]

OPERATIONS:
    DumpIndex                          Dump one index snapshot (--file)
    DumpIndexesForReplica              Dump every snapshot of a replica and per-key status (--replica-dir)
    DumpActiveBlobsFromIndex           Live keys of one index snapshot (--file)
    DumpActiveBlobsForReplica          Live keys across a replica's snapshots (--replica-dir)
    DumpNRandomActiveBlobsForReplica   Random live keys of a replica (--replica-dir, --active-blobs-count)
    DumpLog                            Scan a log file, resynchronizing past corruption (--file)
    DumpReplicatoken                   Dump a replica token file (--file)
    CompareIndexToLog                  Check index entries against the log (--file, --log-file)

OPTIONS:
    --operation <NAME>            Operation to run
    --config <PATH>               JSON config file; flags override its fields
    --file <PATH>                 Index, log or replica token file
    --log-file <PATH>             Log file for CompareIndexToLog
    --replica-dir <PATH>          Directory of a replica's index snapshots
    --start-offset <N>            First log offset to scan (default 0)
    --end-offset <N>              Log offset to stop at (default: file length)
    --blobs <ID,ID,...>           Only report these keys
    --out-file <PATH>             Write the report here instead of stdout
    --exclude-misc-logging        Report record lines only
    --active-blobs-count <N>      Keys to draw for DumpNRandomActiveBlobsForReplica
    --sample-strategy <S>         with_replacement|without_replacement (default with_replacement)
    --seed <u64>                  Seed for random draws
    --snapshot-order <O>          log_offset|listing (default log_offset)
    --key-width <N>               Decode keys as N raw bytes instead of blob ids
    --now-ms <u64>                Reference time for expiry checks (default: now)
    --summary-json                Print the run summary as JSON after the report
    --log-format <F>              human|json (default human, or BLOBSCOPE_LOG_FORMAT)
    -h, --help                    Show this help

Diagnostics go to stderr, filtered by RUST_LOG (default info).
";
    println!("{help}");
}

fn flag_value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> Result<&'a str, String> {
    *index += 1;
    args.get(*index)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn flag_number<T: FromStr>(args: &[String], index: &mut usize, flag: &str) -> Result<T, String> {
    let raw = flag_value(args, index, flag)?;
    raw.parse::<T>()
        .map_err(|_| format!("invalid {flag} value: {raw}"))
}

/// Config file named by `--config`, or defaults.
fn base_config(args: &[String]) -> Result<AuditConfig, String> {
    match args.iter().position(|arg| arg == "--config") {
        Some(pos) => {
            let path = args
                .get(pos + 1)
                .ok_or_else(|| "--config requires a value".to_owned())?;
            AuditConfig::from_json_file(Path::new(path)).map_err(|err| err.to_string())
        }
        None => Ok(AuditConfig::default()),
    }
}

fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let mut config = CliConfig {
        audit: base_config(args)?,
        summary_json: false,
        log_format: None,
    };
    let audit = &mut config.audit;

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--config" => {
                flag_value(args, &mut index, "--config")?;
            }
            "--operation" => {
                let raw = flag_value(args, &mut index, "--operation")?;
                let operation = Operation::parse(raw).ok_or_else(|| {
                    let names: Vec<&str> = Operation::ALL.iter().map(|op| op.name()).collect();
                    format!("invalid --operation value: {raw} (expected one of {})", names.join("|"))
                })?;
                audit.operation = Some(operation);
            }
            "--file" => audit.file = Some(PathBuf::from(flag_value(args, &mut index, "--file")?)),
            "--log-file" => {
                audit.log_file = Some(PathBuf::from(flag_value(args, &mut index, "--log-file")?));
            }
            "--replica-dir" => {
                audit.replica_dir = Some(PathBuf::from(flag_value(args, &mut index, "--replica-dir")?));
            }
            "--start-offset" => {
                audit.start_offset = Some(flag_number(args, &mut index, "--start-offset")?);
            }
            "--end-offset" => audit.end_offset = Some(flag_number(args, &mut index, "--end-offset")?),
            "--blobs" => {
                audit.blobs = flag_value(args, &mut index, "--blobs")?
                    .split(',')
                    .map(str::to_owned)
                    .collect();
            }
            "--out-file" => {
                audit.out_file = Some(PathBuf::from(flag_value(args, &mut index, "--out-file")?));
            }
            "--exclude-misc-logging" => audit.exclude_misc_logging = true,
            "--active-blobs-count" => {
                audit.active_blobs_count = Some(flag_number(args, &mut index, "--active-blobs-count")?);
            }
            "--sample-strategy" => {
                let raw = flag_value(args, &mut index, "--sample-strategy")?;
                audit.sample_strategy = SampleStrategy::parse(raw).ok_or_else(|| {
                    format!(
                        "invalid --sample-strategy value: {raw} (expected with_replacement|without_replacement)"
                    )
                })?;
            }
            "--seed" => audit.seed = Some(flag_number(args, &mut index, "--seed")?),
            "--snapshot-order" => {
                let raw = flag_value(args, &mut index, "--snapshot-order")?;
                audit.snapshot_order = SnapshotOrder::parse(raw).ok_or_else(|| {
                    format!("invalid --snapshot-order value: {raw} (expected log_offset|listing)")
                })?;
            }
            "--key-width" => audit.key_width = Some(flag_number(args, &mut index, "--key-width")?),
            "--now-ms" => audit.now_ms = Some(flag_number(args, &mut index, "--now-ms")?),
            "--summary-json" => config.summary_json = true,
            "--log-format" => {
                let raw = flag_value(args, &mut index, "--log-format")?;
                config.log_format = Some(
                    LogFormat::parse(raw)
                        .ok_or_else(|| format!("invalid --log-format value: {raw} (expected human|json)"))?,
                );
            }
            "-h" | "--help" => {
                print_help();
                return Err(String::new());
            }
            unknown => return Err(format!("unknown option: {unknown}")),
        }
        index += 1;
    }

    Ok(config)
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_logging(format_override: Option<LogFormat>) -> Result<(), String> {
    let format = match format_override {
        Some(format) => format,
        None => LogFormat::from_env()?.unwrap_or(LogFormat::Human),
    };

    match format {
        LogFormat::Human => tracing_subscriber::fmt()
            .with_env_filter(default_env_filter())
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
            .try_init()
            .map_err(|err| format!("failed to initialize human logger: {err}")),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_env_filter(default_env_filter())
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
            .map_err(|err| format!("failed to initialize JSON logger: {err}")),
    }
}

fn run(cli: &CliConfig) -> Result<(), AuditError> {
    let config = &cli.audit;
    let mut auditor = Auditor::new(config)?;
    let mut sink = match &config.out_file {
        Some(path) => ReportSink::create(path, config.exclude_misc_logging)?,
        None => ReportSink::stdout(config.exclude_misc_logging),
    };

    let outcome = auditor.run(&mut sink);
    sink.finish()?;

    if cli.summary_json {
        let json = serde_json::to_string_pretty(auditor.summary())
            .map_err(|err| AuditError::Io(err.into()))?;
        println!("{json}");
    }
    outcome
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(message) if message.is_empty() => return ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            eprintln!("run with --help for usage");
            return ExitCode::from(2);
        }
    };
    if let Err(message) = init_logging(cli.log_format) {
        eprintln!("error: {message}");
        return ExitCode::from(2);
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(target: "blobscope.cli", error = %err, "blobscope failed");
            eprintln!("error: {err}");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}
