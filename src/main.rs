use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use opening_oracle::ingest::{self, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_PRUNE_THRESHOLD};
use opening_oracle::{
    FilterConfig, IngestOptions, IngestSummary, Lookup, OpeningFilter, QuerySession,
    StatisticsStore, TimeClass,
};
use shakmaty::Color;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "opening-oracle", version, about = "Opening statistics from bulk game streams")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Filter raw game streams and build the statistics snapshot.
    Build(BuildArgs),
    /// Walk opening lines interactively against a built snapshot.
    Play(PlayArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Input file or glob pattern (plain or .zst).
    #[arg(long)]
    input: String,
    /// Snapshot directory. An existing snapshot is extended, not replaced.
    #[arg(long, default_value = "data")]
    out: PathBuf,
    /// Lowest accepted rating (both players, inclusive).
    #[arg(long)]
    elo_min: u32,
    /// Highest accepted rating (both players, inclusive).
    #[arg(long)]
    elo_max: u32,
    #[arg(long, value_enum, default_value_t = TimeClassArg::Blitz)]
    time_class: TimeClassArg,
    /// Records between crash-recovery checkpoints.
    #[arg(long, default_value_t = DEFAULT_CHECKPOINT_INTERVAL)]
    checkpoint_interval: u64,
    /// Entries with fewer games are dropped at the final export.
    #[arg(long, default_value_t = DEFAULT_PRUNE_THRESHOLD)]
    min_games: u64,
}

#[derive(Args)]
struct PlayArgs {
    /// Snapshot directory produced by `build`.
    #[arg(long, default_value = "data")]
    data: PathBuf,
    /// The side being advised.
    #[arg(long, value_enum)]
    side: SideArg,
    /// Candidates shown by the `r` command.
    #[arg(long, default_value_t = 5)]
    rank_depth: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum TimeClassArg {
    Bullet,
    Blitz,
    Rapid,
}

impl From<TimeClassArg> for TimeClass {
    fn from(arg: TimeClassArg) -> Self {
        match arg {
            TimeClassArg::Bullet => TimeClass::Bullet,
            TimeClassArg::Blitz => TimeClass::Blitz,
            TimeClassArg::Rapid => TimeClass::Rapid,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SideArg {
    White,
    Black,
}

impl From<SideArg> for Color {
    fn from(arg: SideArg) -> Self {
        match arg {
            SideArg::White => Color::White,
            SideArg::Black => Color::Black,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {
        Command::Build(args) => build(args),
        Command::Play(args) => play(args),
    }
}

fn build(args: BuildArgs) -> Result<()> {
    if args.elo_min > args.elo_max {
        bail!("--elo-min must not exceed --elo-max");
    }
    let config = FilterConfig {
        elo_min: args.elo_min,
        elo_max: args.elo_max,
        time_class: args.time_class.into(),
    };

    let paths = ingest::expand_paths(&args.input)
        .with_context(|| format!("bad input pattern {:?}", args.input))?;
    if paths.is_empty() {
        bail!("no input files match {:?}", args.input);
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
        eprintln!("stopping at the next checkpoint");
    })
    .context("failed to set Ctrl-C handler")?;

    let mut store = StatisticsStore::load(&args.out)?;
    if !store.is_empty() {
        info!(positions = store.len(), "extending existing snapshot");
    }

    let options = IngestOptions {
        data_dir: args.out.clone(),
        checkpoint_interval: args.checkpoint_interval,
        prune_threshold: args.min_games,
    };

    let mut total = IngestSummary::default();
    for path in &paths {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        info!(path = %path.display(), "scanning stream");
        let reader = ingest::open_stream(path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        let mut filter = OpeningFilter::new(reader, config.clone());

        let summary = ingest::run(&mut store, filter.by_ref(), &options, &cancel)?;
        let stats = filter.stats();
        info!(
            path = %path.display(),
            accepted = stats.accepted,
            rejected = stats.rejected(),
            replay_errors = summary.replay_errors,
            "stream done"
        );

        total.ingested += summary.ingested;
        total.replay_errors += summary.replay_errors;
        total.checkpoints += summary.checkpoints;
        total.cancelled |= summary.cancelled;
    }

    println!(
        "{} records ingested ({} replay errors), {} positions in {}",
        total.ingested,
        total.replay_errors,
        store.len(),
        args.out.display()
    );
    if total.cancelled {
        println!("run was cancelled; the snapshot is consistent and resumable");
    }
    Ok(())
}

fn play(args: PlayArgs) -> Result<()> {
    let store = StatisticsStore::load(&args.data)?;
    if store.is_empty() {
        bail!(
            "no snapshot under {}; run `opening-oracle build` first",
            args.data.display()
        );
    }
    info!(positions = store.len(), "snapshot loaded");

    let advised: Color = args.side.into();
    let mut session = QuerySession::new(Arc::new(store), advised);

    println!("advising {:?}; moves in SAN, several per line allowed", advised);
    println!("commands: a accept suggestion, r [k] rank candidates, u undo, n new game, q quit");
    if advised == Color::White {
        let outcome = session.lookup();
        render(&session, &outcome);
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        prompt(&session)?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let input = line.trim();
        match input {
            "" => {}
            "q" => break,
            "n" => {
                session.new_game();
                if advised == Color::White {
                    let outcome = session.lookup();
                    render(&session, &outcome);
                }
            }
            "u" => {
                session.undo();
                let outcome = session.lookup();
                render(&session, &outcome);
            }
            "a" => match session.accept_suggestion() {
                Ok(outcome) => render(&session, &outcome),
                Err(e) => println!("{e}"),
            },
            // `r` or `r <count>`; SAN moves never start with a
            // lowercase r, so this cannot shadow a move.
            _ if input == "r" || input.starts_with("r ") => {
                match rank_count(input, args.rank_depth) {
                    Some(k) => {
                        let outcome = session.rank_expand(k);
                        render(&session, &outcome);
                    }
                    None => println!("invalid rank count"),
                }
            }
            _ => match session.enter_move(input) {
                Ok(outcome) => render(&session, &outcome),
                Err(e) => println!("{e}"),
            },
        }
    }
    Ok(())
}

fn rank_count(input: &str, default: usize) -> Option<usize> {
    let rest = input[1..].trim();
    if rest.is_empty() {
        Some(default)
    } else {
        rest.parse().ok().filter(|&k| k > 0)
    }
}

fn prompt(session: &QuerySession) -> Result<()> {
    let line = session.current_line();
    if line.is_empty() {
        print!("> ");
    } else {
        print!("{line} > ");
    }
    io::stdout().flush()?;
    Ok(())
}

/// Win rates print at three decimals: the store's integer half-point
/// counters make the value reproducible run to run.
fn render(session: &QuerySession, outcome: &Lookup) {
    match outcome {
        Lookup::Direct(entry) => {
            println!(
                "this line: {} games, win rate {:.3}",
                entry.games,
                entry.win_rate()
            );
        }
        Lookup::Ranked(ranked) => {
            for (i, s) in ranked.iter().enumerate() {
                println!(
                    "{}. {} ({} games, win rate {:.3})",
                    i + 1,
                    s.san,
                    s.games,
                    s.win_rate()
                );
            }
            if let Some(top) = session.suggestion() {
                println!("suggestion: {}", top.san);
            }
        }
        Lookup::NoSurvivors => {
            println!("statistics exist here, but no candidate clears the floors");
        }
        Lookup::Unexplored => {
            println!("no statistics for this line");
        }
    }
}
