use clap::{Parser, Subcommand};
use picoflow::{
    analysis::{correlation_resolutions, run_pass, PassOptions},
    data::{io::DEFAULT_BATCH_SIZE, write_parquet},
    histograms::HistogramStore,
    simulate::{generate_events, SimulationConfig},
    AnalysisConfig, Harmonic, ReadWrite,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Raise the log level (-v for debug, -vv for trace). Overrides RUST_LOG.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one analysis pass over an event file.
    Run {
        /// Input Parquet event file.
        input: String,
        /// Output histogram file.
        #[arg(long, value_name = "HISTS", default_value = "hists.bin")]
        hists: String,
        /// Output calibration file.
        #[arg(long, value_name = "CALIB_OUT", default_value = "calib.bin")]
        calib_out: String,
        /// Calibration file from a previous pass.
        #[arg(long, value_name = "CALIB_IN")]
        calib_in: Option<String>,
        /// TOML analysis configuration.
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<String>,
        /// Harmonic order of the event plane (1, 2 or 3); overrides the configuration.
        #[arg(short = 'n', long, value_name = "ORDER")]
        harmonic: Option<u8>,
        /// Stop after this many events.
        #[arg(long, value_name = "N")]
        max_events: Option<usize>,
        /// Rows decoded per record batch.
        #[arg(long, value_name = "ROWS", default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// Write seeded toy events to a Parquet file.
    Generate {
        /// Output Parquet event file.
        output: String,
        /// TOML simulation configuration.
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<String>,
        /// Number of events; overrides the configuration.
        #[arg(short = 'N', long, value_name = "N")]
        n_events: Option<usize>,
        /// Random seed; overrides the configuration.
        #[arg(short, long, value_name = "SEED")]
        seed: Option<u64>,
    },
    /// Print the event-plane resolution derived from a histogram file.
    Resolution {
        /// Histogram file written by `run`.
        hists: String,
    },
    /// Print the default analysis configuration as TOML.
    Config,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Run {
            input,
            hists,
            calib_out,
            calib_in,
            config,
            harmonic,
            max_events,
            batch_size,
        } => {
            let mut config = match config {
                Some(path) => AnalysisConfig::from_toml_file(&path)?,
                None => AnalysisConfig::default(),
            };
            if let Some(order) = harmonic {
                config.event_plane.harmonic = Harmonic::try_from(order)?;
            }
            let mut options = PassOptions::new(input, hists, calib_out).with_batch_size(batch_size);
            if let Some(path) = calib_in {
                options = options.with_calibration_input(path);
            }
            if let Some(n) = max_events {
                options = options.with_max_events(n);
            }
            let summary = run_pass(&config, &options)?;
            print!("{summary}");
        }
        Commands::Generate {
            output,
            config,
            n_events,
            seed,
        } => {
            let mut config = match config {
                Some(path) => SimulationConfig::from_toml_file(&path)?,
                None => SimulationConfig::default(),
            };
            if let Some(n) = n_events {
                config.n_events = n;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            let events = generate_events(&config)?;
            write_parquet(&events, &output, DEFAULT_BATCH_SIZE)?;
            info!(events = events.len(), output = output.as_str(), "wrote toy events");
        }
        Commands::Resolution { hists } => {
            let store = HistogramStore::load(&hists)?;
            for row in correlation_resolutions(&store)? {
                match row.resolution {
                    Some(resolution) => println!(
                        "{} cent{} ({} events): {}",
                        row.key, row.centrality, row.entries, resolution
                    ),
                    None => println!(
                        "{} cent{} ({} events): non-positive correlation",
                        row.key, row.centrality, row.entries
                    ),
                }
            }
        }
        Commands::Config => {
            print!("{}", AnalysisConfig::default().to_toml_string()?);
        }
    }
    Ok(())
}
