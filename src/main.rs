use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rusty_tau::collection::PointerClick;
use rusty_tau::error::{Result, TauError};
use rusty_tau::io::{
    read_metadata, read_stimulus_onsets, read_traces_csv, write_events_csv, write_flags_csv,
};
use rusty_tau::session::{AdvanceOutcome, Session};
use rusty_tau::settings::Settings;
use rusty_tau::signal::{Representation, Stimulus};
use rusty_tau::store::DataSet;

#[derive(Parser)]
#[command(
    name = "rusty_tau",
    version,
    about = "Annotate transient events in traces and fit their rise and decay time constants"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file (JSON); defaults are used if it does not exist
    #[arg(long, global = true, default_value = "rusty_tau_settings.json")]
    settings: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Build a session file from a trace table (one column per channel)
    Import(ImportArgs),
    /// Annotate one event on a channel from scripted clicks
    Annotate(AnnotateArgs),
    /// Export the events of a session as a table
    Export(ExportArgs),
    /// Write the goodness of fit of every event as JSON
    Report(ExportArgs),
    /// Print the noise statistics of every channel as JSON
    Stats(StatsArgs),
    /// Export the flagged channels as a table
    Flags(ExportArgs),
}

#[derive(Args)]
struct ImportArgs {
    /// Trace table (CSV)
    traces: PathBuf,
    /// Sampling rate in Hz, overrides the settings
    #[arg(long)]
    sampling_rate: Option<f64>,
    /// Stimulus onset table (CSV with start, end, info)
    #[arg(long)]
    stimulus: Option<PathBuf>,
    /// One-row metadata table (CSV)
    #[arg(long)]
    metadata: Option<PathBuf>,
    /// Output session file
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args)]
struct AnnotateArgs {
    /// Session file, updated in place
    session: PathBuf,
    #[arg(long)]
    channel: String,
    /// Representation to display and fit (raw, df, z, min_max)
    #[arg(long, default_value = "raw")]
    representation: String,
    /// Moving-average window in seconds, clamped to the settings range; enables the filter.
    /// Without a value, the default window of the settings is used
    #[arg(long, num_args = 0..=1)]
    filter: Option<Option<f64>>,
    /// Start, center and end times of the event
    #[arg(long, num_args = 3, required = true)]
    boundary: Vec<f64>,
    /// Times at which the trace crosses the rise and decay guides
    #[arg(long, num_args = 2, required = true)]
    tau: Vec<f64>,
    /// Seed of the event colors
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Args)]
struct ExportArgs {
    /// Session file
    session: PathBuf,
    /// Output file
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args)]
struct StatsArgs {
    /// Session file
    session: PathBuf,
    /// Noise percentile
    #[arg(long, default_value_t = 5.0)]
    percentile: f64,
}

fn recording_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn import(args: ImportArgs, settings: &Settings) -> Result<()> {
    let sampling_rate = args.sampling_rate.unwrap_or(settings.sampling_rate);
    let mut data = DataSet::new(
        &recording_name(&args.traces),
        sampling_rate,
        settings.fbs_percentile,
    )?;

    let traces = read_traces_csv(&args.traces)?;
    let num_samples = traces.iter().map(|(_, t)| t.len()).max().unwrap_or(0);
    for (key, raw) in traces {
        data.add_channel_trace(&key, raw)?;
    }
    info!("Imported {} channels", data.num_channels());

    if let Some(path) = args.stimulus {
        let onsets = read_stimulus_onsets(File::open(path)?)?;
        let t_max = num_samples as f64 / sampling_rate;
        data.set_stimulus(Stimulus::from_onsets(
            onsets,
            t_max,
            1.0 / settings.stimulus_sampling_rate,
        )?);
    }
    if let Some(path) = args.metadata {
        data.add_metadata(read_metadata(File::open(path)?)?);
    }

    data.save_to(&args.out)
}

fn annotate(args: AnnotateArgs, settings: &Settings) -> Result<()> {
    let data = DataSet::load_from(&args.session)?;
    let mut session = Session::new(data, args.seed)?;
    session.select_channel(&args.channel)?;
    session.set_representation(args.representation.parse::<Representation>()?)?;
    if let Some(requested) = args.filter {
        let window = settings.filter_window(requested);
        info!("Filtering with a {} s window", window);
        session.set_filter_window(Some(window))?;
        session.set_filter_active(true)?;
    }

    session.begin_annotation()?;
    for t in args.boundary.iter() {
        session.handle_click(&PointerClick::at(*t, 0.0));
    }
    let guides = match session.advance()? {
        AdvanceOutcome::TauPhase(guides) => guides,
        _ => {
            return Err(TauError::InvalidParameter(
                "Boundary times must snap onto three distinct samples".to_string(),
            ))
        }
    };
    session.handle_click(&PointerClick::at(args.tau[0], guides.rise.y));
    session.handle_click(&PointerClick::at(args.tau[1], guides.decay.y));
    match session.advance()? {
        AdvanceOutcome::Committed(id) => info!("Event {} committed on {}", id, args.channel),
        outcome => {
            return Err(TauError::InvalidOperation(format!(
                "Annotation did not commit: {:?}",
                outcome
            )))
        }
    }

    session.into_data().save_to(&args.session)
}

fn write_json<T: serde::Serialize, W: Write>(writer: W, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load_or_default(&cli.settings)?;
    match cli.command {
        Command::Import(args) => import(args, &settings),
        Command::Annotate(args) => annotate(args, &settings),
        Command::Export(args) => {
            let data = DataSet::load_from(&args.session)?;
            write_events_csv(&args.out, &data.event_rows())
        }
        Command::Report(args) => {
            let data = DataSet::load_from(&args.session)?;
            write_json(File::create(&args.out)?, &data.fit_reports()?)
        }
        Command::Stats(args) => {
            let data = DataSet::load_from(&args.session)?;
            let stats = data
                .noise_statistics(args.percentile)?
                .into_iter()
                .collect::<std::collections::BTreeMap<_, _>>();
            write_json(std::io::stdout(), &stats)
        }
        Command::Flags(args) => {
            let data = DataSet::load_from(&args.session)?;
            write_flags_csv(&args.out, &data.flagged_channels())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    if let Err(e) = run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}
