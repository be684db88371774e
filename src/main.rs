//! Repcam binary: runs one scripted test session and prints the result as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use repcam::{
    CameraBackend, CameraError, Command, MockCamera, RepcamConfig, SessionHandle, SessionSnapshot,
    SessionState, SimulatedPipeline, TestId,
};
use repcam::catalog::catalog;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "repcam", version, about = "Record a fitness test and print the analysed result")]
struct Cli {
    /// Test to run: situps, vertical_jump or shuttle_run
    #[arg(short, long)]
    test: Option<TestId>,

    /// Seconds to record (defaults to the test's expected duration)
    #[arg(short, long)]
    seconds: Option<u32>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Make the mock camera refuse the first request
    #[arg(long)]
    simulate_denied: bool,

    /// Use the V4L2 camera instead of the mock
    #[cfg(feature = "v4l2")]
    #[arg(long)]
    v4l2: bool,

    /// V4L2 device index, overriding camera.device_index (implies --v4l2)
    #[cfg(feature = "v4l2")]
    #[arg(long)]
    device: Option<u32>,

    /// Print the test catalog and exit
    #[arg(long)]
    list_tests: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.list_tests {
        for def in catalog() {
            println!(
                "{:<14} {:<14} {:>3}s  ({})",
                def.id, def.name, def.expected_duration_seconds, def.unit
            );
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => RepcamConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RepcamConfig::default(),
    };
    let test = cli.test.unwrap_or(config.session.default_test);
    let seconds = cli
        .seconds
        .unwrap_or_else(|| test.definition().expected_duration_seconds);

    let pipeline = Arc::new(SimulatedPipeline::new(
        config.analysis.step_percent,
        config.analysis_cadence(),
    ));
    let mut session = repcam::SessionDriver::spawn(&config, backend(&cli, &config), pipeline);
    let mut updates = session.subscribe();

    println!("{} test, recording {seconds}s", test.definition().name);
    session.send(Command::SelectTest(test)).await?;
    acquire_camera(&session, &mut updates).await?;

    session.send(Command::Start).await?;
    let snapshot = follow(&mut updates, |s| {
        s.state != SessionState::Recording || s.elapsed_seconds.is_some_and(|e| e >= seconds)
    })
    .await?;
    if snapshot.state == SessionState::Recording {
        session.send(Command::Stop).await?;
    }
    let snapshot = follow(&mut updates, |s| {
        matches!(s.state, SessionState::Results | SessionState::Idle)
    })
    .await?;
    if snapshot.state != SessionState::Results {
        bail!("analysis ended without a result");
    }

    let record = session
        .next_result()
        .await
        .context("session ended without a result")?;
    println!(
        "{}: {}, form {}% {}",
        test.definition().name,
        record.reps_or_metric(),
        record.form_score_percent(),
        record.rating_label()
    );
    println!("{}", serde_json::to_string_pretty(&record)?);

    session.shutdown().await;
    Ok(())
}

#[cfg_attr(not(feature = "v4l2"), allow(unused_variables))]
fn backend(cli: &Cli, config: &RepcamConfig) -> Arc<dyn CameraBackend> {
    #[cfg(feature = "v4l2")]
    {
        if cli.v4l2 || cli.device.is_some() {
            let index = cli.device.unwrap_or(config.camera.device_index);
            return Arc::new(repcam::V4L2Camera::new(index));
        }
    }

    let camera = MockCamera::new();
    if cli.simulate_denied {
        camera.deny_next(CameraError::PermissionDenied("simulated refusal".to_owned()));
    }
    Arc::new(camera)
}

/// Request the camera, retrying once after a denial.
async fn acquire_camera(
    session: &SessionHandle,
    updates: &mut watch::Receiver<SessionSnapshot>,
) -> Result<()> {
    for attempt in 1..=2 {
        session.send(Command::RequestCamera).await?;
        let snapshot = follow(updates, |s| {
            matches!(s.state, SessionState::Ready | SessionState::CameraDenied)
        })
        .await?;
        if snapshot.state == SessionState::Ready {
            return Ok(());
        }
        let reason = snapshot.camera_error.unwrap_or_default();
        eprintln!("Camera access required ({reason}), attempt {attempt}");
    }
    bail!("camera unavailable")
}

/// Print recording and analysis progress until `done` holds.
async fn follow<F>(
    updates: &mut watch::Receiver<SessionSnapshot>,
    done: F,
) -> Result<SessionSnapshot>
where
    F: Fn(&SessionSnapshot) -> bool,
{
    let mut last_line = String::new();
    loop {
        let snapshot = updates.borrow_and_update().clone();
        let line = match (snapshot.recording_badge(), snapshot.progress_percent) {
            (Some(badge), _) => format!("REC {badge}"),
            (None, Some(percent)) => format!("Analyzing... {percent}%"),
            (None, None) => String::new(),
        };
        if !line.is_empty() && line != last_line {
            println!("{line}");
            last_line = line;
        }
        if done(&snapshot) {
            return Ok(snapshot);
        }
        updates.changed().await.context("session driver stopped")?;
    }
}
