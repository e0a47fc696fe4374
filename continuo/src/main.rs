// CLI entry point for the continuo melody continuer.
//
// Reads a MIDI file, continues its melody with a variable-order Markov
// model, and writes `<output-base>.mid` (original plus continuation) and
// `<output-base>.wav` (additive sine render of the same timeline). See
// `pipeline.rs` for the stage order.
//
// Usage:
//   continuo <input.mid> <output-base> [OPTIONS]
//     --length <N>          Pitches to generate (default: 50)
//     --order <N>           Maximum Markov order (default: 3)
//     --sample-rate <HZ>    WAV sample rate (default: 44100)
//     --seed <N>            RNG seed (default: derived from the clock)
//     --spacing <TICKS>     Ticks between generated notes (default: one beat)
//     --half-notes          Generated notes last half the spacing
//     --config <FILE>       JSON config; flags override its values
//     --model-out <FILE>    Also save the Markov model as JSON
//     --timeline-out <FILE> Also save the merged timeline as JSON
//
// Log verbosity follows RUST_LOG (default: info); logs go to stderr.

use std::path::PathBuf;
use std::str::FromStr;

use continuo::config::ContinuationConfig;
use continuo::merge::NoteLength;
use continuo::pipeline::{Dumps, run};
use tracing_subscriber::EnvFilter;

/// Parsed command line. Flag values stay `None` when not given so they only
/// override a config file when present.
#[derive(Debug, Default)]
struct Cli {
    input: Option<PathBuf>,
    output_base: Option<PathBuf>,
    config_path: Option<PathBuf>,
    length: Option<usize>,
    order: Option<usize>,
    sample_rate: Option<u32>,
    seed: Option<u64>,
    spacing: Option<u64>,
    half_notes: bool,
    dumps: Dumps,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args();
    let (Some(input), Some(output_base)) = (cli.input.clone(), cli.output_base.clone()) else {
        eprintln!("Missing <input.mid> and <output-base>");
        print_usage();
        std::process::exit(1);
    };

    let mut config = match &cli.config_path {
        Some(path) => ContinuationConfig::load(path).unwrap_or_else(|e| {
            eprintln!("Failed to load config {}: {e}", path.display());
            std::process::exit(1);
        }),
        None => ContinuationConfig::default(),
    };
    apply_overrides(&cli, &mut config);

    // Unseeded runs log the clock-derived seed; pass it to --seed to repeat.
    let (_, mut rng) = config.rng();

    match run(&input, &output_base, &config, &cli.dumps, &mut rng) {
        Ok(report) => {
            println!(
                "Continued {} notes with {} of {} generated pitches (order {})",
                report.input_notes, report.generated, report.requested, report.effective_order
            );
            if report.early_stop {
                println!("Generation stopped early: no matching context");
            }
            if report.fallback_draws > 0 {
                println!("Fallback draws: {}", report.fallback_draws);
            }
            println!("MIDI: {}", report.midi_path.display());
            println!(
                "WAV:  {} ({:.2} s)",
                report.wav_path.display(),
                report.duration_seconds
            );
        }
        Err(e) => {
            eprintln!("continuo failed: {e}");
            std::process::exit(1);
        }
    }
}

fn apply_overrides(cli: &Cli, config: &mut ContinuationConfig) {
    if let Some(length) = cli.length {
        config.length = length;
    }
    if let Some(order) = cli.order {
        config.max_order = order;
    }
    if let Some(sample_rate) = cli.sample_rate {
        config.synth.sample_rate = sample_rate;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    if cli.spacing.is_some() {
        config.spacing.spacing = cli.spacing;
    }
    if cli.half_notes {
        config.spacing.note_length = NoteLength::Half;
    }
}

/// Parse `std::env::args()` by hand; exits on malformed input.
fn parse_args() -> Cli {
    let mut cli = Cli::default();
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--length" => {
                i += 1;
                cli.length = Some(flag_value(&args, i, "--length"));
            }
            "--order" => {
                i += 1;
                cli.order = Some(flag_value(&args, i, "--order"));
            }
            "--sample-rate" => {
                i += 1;
                cli.sample_rate = Some(flag_value(&args, i, "--sample-rate"));
            }
            "--seed" => {
                i += 1;
                cli.seed = Some(flag_value(&args, i, "--seed"));
            }
            "--spacing" => {
                i += 1;
                cli.spacing = Some(flag_value(&args, i, "--spacing"));
            }
            "--half-notes" => cli.half_notes = true,
            "--config" => {
                i += 1;
                cli.config_path = Some(flag_value(&args, i, "--config"));
            }
            "--model-out" => {
                i += 1;
                cli.dumps.model = Some(flag_value(&args, i, "--model-out"));
            }
            "--timeline-out" => {
                i += 1;
                cli.dumps.timeline = Some(flag_value(&args, i, "--timeline-out"));
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with("--") => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
            positional => {
                if cli.input.is_none() {
                    cli.input = Some(PathBuf::from(positional));
                } else if cli.output_base.is_none() {
                    cli.output_base = Some(PathBuf::from(positional));
                } else {
                    eprintln!("Unexpected argument: {positional}");
                    print_usage();
                    std::process::exit(1);
                }
            }
        }
        i += 1;
    }

    cli
}

fn flag_value<T: FromStr>(args: &[String], i: usize, flag: &str) -> T {
    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{flag} requires a valid value");
        std::process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: continuo <input.mid> <output-base> [OPTIONS]");
    println!();
    println!("Writes <output-base>.mid and <output-base>.wav.");
    println!();
    println!("Options:");
    println!("  --length <N>          Pitches to generate (default: 50)");
    println!("  --order <N>           Maximum Markov order (default: 3)");
    println!("  --sample-rate <HZ>    WAV sample rate (default: 44100)");
    println!("  --seed <N>            RNG seed (default: derived from the clock)");
    println!("  --spacing <TICKS>     Ticks between generated notes (default: one beat)");
    println!("  --half-notes          Generated notes last half the spacing");
    println!("  --config <FILE>       JSON config; flags override its values");
    println!("  --model-out <FILE>    Also save the Markov model as JSON");
    println!("  --timeline-out <FILE> Also save the merged timeline as JSON");
    println!("  --help, -h            Show this help");
}
