use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use telemetry_agent::{load_args_file, parse_arg_pair, Agent};
use telemetry_core::{
    init_tracing, parse_interval, AgentConfig, DataConfig, Execution, Map, Script,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config = AgentConfig {
        data: DataConfig {
            path: matches.get_one::<String>("data").map(PathBuf::from),
            ttl: matches.get_one::<String>("ttl").cloned(),
        },
        ..Default::default()
    };

    // Initialize logging
    init_tracing(&config.log_filter);

    // Parsing needs no store, so `check` leaves the database unlocked
    if let Some(("check", sub)) = matches.subcommand() {
        return check(sub);
    }

    let agent = Agent::open(&config)?;

    let result = match matches.subcommand() {
        Some(("run", sub)) => run(&agent, sub),
        Some(("sweep", _)) => sweep(&agent),
        Some(("watch", sub)) => {
            let agent = Arc::new(agent);
            let result = watch(agent.clone(), sub).await;
            let agent = Arc::try_unwrap(agent)
                .map_err(|_| warn!("agent still shared at shutdown; the store is not closed"))
                .ok();
            return finish(agent, result);
        }
        _ => missing_subcommand(),
    };

    finish(Some(agent), result)
}

fn cli() -> Command {
    let script = || {
        Arg::new("script")
            .value_name("SCRIPT")
            .help("Path of the script file")
            .required(true)
            .index(1)
    };

    Command::new("telemetry-agent")
        .version(telemetry_core::VERSION)
        .about("Runs telemetry scripts against a local aggregation store")
        .subcommand_required(true)
        .arg(
            Arg::new("data")
                .long("data")
                .value_name("PATH")
                .help("Aggregation store directory; counters and series are disabled without it")
                .global(true),
        )
        .arg(
            Arg::new("ttl")
                .long("ttl")
                .value_name("INTERVAL")
                .help("Retention window for series samples, e.g. 24h")
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Run a script once and print its output as JSON")
                .arg(script())
                .arg(
                    Arg::new("arg")
                        .long("arg")
                        .value_name("KEY=VALUE")
                        .help("Script argument; the value is parsed as JSON when possible")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("args")
                        .long("args")
                        .value_name("FILE")
                        .help("JSON, YAML or TOML file holding script arguments"),
                )
                .arg(
                    Arg::new("job")
                        .long("job")
                        .value_name("NAME")
                        .help("Job name used in logs (defaults to the script file name)"),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Parse a script without running it")
                .arg(script()),
        )
        .subcommand(Command::new("sweep").about("Remove expired series samples once"))
        .subcommand(
            Command::new("watch")
                .about("Run a script on a fixed interval until interrupted")
                .arg(script())
                .arg(
                    Arg::new("every")
                        .long("every")
                        .value_name("INTERVAL")
                        .help("Time between runs, e.g. 30s")
                        .required(true),
                )
                .arg(
                    Arg::new("sweep-every")
                        .long("sweep-every")
                        .value_name("INTERVAL")
                        .help("Time between store sweeps")
                        .default_value("1h"),
                ),
        )
}

fn missing_subcommand() -> Result<()> {
    anyhow::bail!("no command given; see --help")
}

/// Closes the store and passes `result` through
fn finish(agent: Option<Agent>, result: Result<()>) -> Result<()> {
    if let Some(agent) = agent {
        if let Err(err) = agent.close() {
            error!("failed to close the aggregation store: {err}");
        }
    }
    result
}

fn script_arg<'a>(matches: &'a ArgMatches) -> Result<&'a Path> {
    matches
        .get_one::<String>("script")
        .map(Path::new)
        .context("missing script path")
}

fn job_name(matches: &ArgMatches, script: &Path) -> String {
    matches.get_one::<String>("job").cloned().unwrap_or_else(|| {
        script
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script".to_string())
    })
}

/// `--args FILE` first, then every `--arg` on top of it
fn script_args(matches: &ArgMatches) -> Result<Map> {
    let mut args = match matches.get_one::<String>("args") {
        Some(path) => load_args_file(Path::new(path))?,
        None => Map::new(),
    };

    for pair in matches.get_many::<String>("arg").into_iter().flatten() {
        let (key, value) = parse_arg_pair(pair)?;
        args.insert(key, value);
    }
    Ok(args)
}

fn load(agent: &Agent, path: &Path) -> Result<Script> {
    agent
        .load_script(path)
        .with_context(|| format!("{} is not a valid script", path.display()))
}

fn run(agent: &Agent, matches: &ArgMatches) -> Result<()> {
    let path = script_arg(matches)?;
    let job = job_name(matches, path);
    let args = script_args(matches)?;
    let script = load(agent, path)?;

    let execution = agent.run(&job, &script, args);
    let output = serde_json::to_string_pretty(&execution.output)?;

    match execution.result {
        Ok(()) => {
            println!("{output}");
            Ok(())
        }
        Err(err) => {
            eprintln!("{output}");
            Err(anyhow::Error::new(err).context(format!("job `{job}` failed")))
        }
    }
}

fn check(matches: &ArgMatches) -> Result<()> {
    let path = script_arg(matches)?;
    let script = Agent::check(path).with_context(|| format!("{} is not a valid script", path.display()))?;
    println!("{}: ok ({} commands)", path.display(), script.len());
    Ok(())
}

fn sweep(agent: &Agent) -> Result<()> {
    match agent.sweep()? {
        Some(report) => println!(
            "removed {} samples from {} series",
            report.removed, report.buckets
        ),
        None => println!("no data path configured; nothing to sweep"),
    }
    Ok(())
}

async fn watch(agent: Arc<Agent>, matches: &ArgMatches) -> Result<()> {
    let path = script_arg(matches)?;
    let job = job_name(matches, path);
    let script = Arc::new(load(&agent, path)?);
    let every = interval_arg(matches, "every")?;
    let sweep_every = interval_arg(matches, "sweep-every")?;

    let mut run_timer = tokio::time::interval(every);
    let mut sweep_timer = tokio::time::interval(sweep_every);
    let mut in_flight: Option<JoinHandle<Execution>> = None;

    info!(job = %job, ?every, ?sweep_every, "watching {}", path.display());

    loop {
        tokio::select! {
            _ = run_timer.tick() => {
                if in_flight.as_ref().is_some_and(|run| !run.is_finished()) {
                    warn!(job = %job, "the previous run is still in progress; skipping this one");
                    continue;
                }

                in_flight = Some(agent.spawn_run(job.clone(), script.clone()));
            }
            _ = sweep_timer.tick() => {
                let sweeper = agent.clone();
                if let Err(err) = tokio::task::spawn_blocking(move || sweeper.run_sweep()).await {
                    error!("sweep did not complete: {err}");
                }
                for err in agent.drain_store_errors() {
                    warn!("sweep failed and will be retried: {err}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; shutting down");
                break;
            }
        }
    }

    // The run holds a clone of the agent until it returns; the store can
    // only be closed after that
    if let Some(run) = in_flight {
        if let Err(err) = run.await {
            error!("script run did not complete: {err}");
        }
    }
    Ok(())
}

fn interval_arg(matches: &ArgMatches, id: &str) -> Result<Duration> {
    let text = matches
        .get_one::<String>(id)
        .with_context(|| format!("missing --{id}"))?;
    let interval = parse_interval(text)?;
    if interval.is_zero() {
        anyhow::bail!("--{id} must be longer than zero");
    }
    Ok(interval)
}
