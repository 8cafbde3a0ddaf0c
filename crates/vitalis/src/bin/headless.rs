//! Headless runner: loads a content directory, places buildings, seeds the
//! ledger and runs a fixed number of frames, logging every event.
//!
//! ```text
//! vitalis-headless --content content --building cell --credit GLUCOSE=20 --frames 300
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use vitalis::{Session, SessionConfig, init_logging};
use vitalis_core::event::EventKind;
use vitalis_core::fixed::fixed64_to_f64;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a Vitalis session without a front end", long_about = None)]
struct Args {
    /// Session config file (TOML, RON or JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Content directory; overrides the config file.
    #[arg(long)]
    content: Option<PathBuf>,

    /// Number of frames to run.
    #[arg(long, default_value_t = 600)]
    frames: u32,

    /// Seconds per frame.
    #[arg(long, default_value_t = 0.1)]
    dt: f64,

    /// Building type to place before the first frame (repeatable).
    #[arg(long = "building")]
    buildings: Vec<String>,

    /// Starting resources as NAME=AMOUNT (repeatable).
    #[arg(long = "credit", value_parser = parse_credit)]
    credits: Vec<(String, f64)>,

    /// Research to complete before the first frame (repeatable).
    #[arg(long = "research")]
    research: Vec<String>,

    /// Log filter; overrides the config file. `RUST_LOG` wins over both.
    #[arg(long)]
    log: Option<String>,
}

fn parse_credit(raw: &str) -> Result<(String, f64), String> {
    let (name, amount) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=AMOUNT, got '{raw}'"))?;
    let amount: f64 = amount
        .parse()
        .map_err(|e| format!("bad amount in '{raw}': {e}"))?;
    Ok((name.to_string(), amount))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(dir) = args.content {
        config = config.with_content_dir(dir);
    }
    if let Some(filter) = args.log {
        config.log_filter = filter;
    }
    init_logging(&config.log_filter)?;

    let mut session = Session::from_config(&config)?;
    for kind in EventKind::ALL {
        session.on_passive(kind, Box::new(|event| info!(?event, "event")));
    }

    for (i, name) in args.buildings.iter().enumerate() {
        session.register_building(name, i as i32, 0)?;
    }
    for (name, amount) in &args.credits {
        session.credit(name, *amount)?;
    }
    for tech in &args.research {
        session.complete_research(tech)?;
    }

    info!(frames = args.frames, dt = args.dt, "running");
    let mut completions = 0;
    for _ in 0..args.frames {
        completions += session.update(args.dt).completions;
    }

    let snapshot = session.snapshot();
    let registry = session.registry();
    info!(
        clock = fixed64_to_f64(snapshot.clock),
        completions,
        unlocked = session.progression().unlocked_count(),
        "run finished"
    );
    for (resource, quantity) in &snapshot.ledger {
        info!(
            resource = registry.resource_name(*resource).unwrap_or("?"),
            quantity = fixed64_to_f64(*quantity),
            "ledger"
        );
    }
    for (disease, state) in session.kernel().active_diseases() {
        let name = registry.get_disease(disease).map_or("?", |d| d.name.as_str());
        info!(disease = name, tier = state.tier, "active disease");
    }
    if let Err(err) = session.save() {
        tracing::warn!(%err, "final save failed");
    }
    Ok(())
}
