//! Watch mode - recompile styles whenever a style source changes

use super::run::run_with;
use super::{load_builder, Options};
use anyhow::{bail, Context, Result};
use kiln_build::Builder;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Debounce delay in milliseconds
const DEBOUNCE_MS: u64 = 300;

/// Task re-run on every change
const WATCH_TASK: &str = "sass";

/// Run `sass` once, then again on every relevant change until Ctrl+C
pub async fn run_watch(options: &Options) -> Result<()> {
    let builder = load_builder(options)?;
    let roots = builder
        .declarations()
        .style_watch_roots(builder.project_root())
        .context("Invalid style patterns")?;
    if roots.is_empty() {
        bail!("Nothing to watch: no [styles] declared");
    }

    // Initial run
    run_once(&builder, options).await;

    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        // Receiver gone means the loop below has ended
        let _ = tx.send(event);
    })
    .context("Failed to create file watcher")?;

    let mut watching = 0;
    for root in &roots {
        if !root.is_dir() {
            warn!(path = %root.display(), "style directory does not exist, not watching");
            continue;
        }
        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;
        watching += 1;
    }
    if watching == 0 {
        bail!("Nothing to watch: no style directory exists");
    }

    if !options.quiet && !options.json {
        for root in &roots {
            println!("Watching {} for changes...", root.display());
        }
        println!("Press Ctrl+C to stop\n");
    }

    let output_root = builder.output_root().to_path_buf();
    let mut debouncer = Debouncer::new(Duration::from_millis(DEBOUNCE_MS));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let deadline = debouncer.deadline();
        tokio::select! {
            received = rx.recv() => {
                let Some(result) = received else { break };
                match result {
                    Ok(event) if is_relevant_change(&event, &output_root) => {
                        debug!(paths = ?event.paths, "change detected");
                        debouncer.record(Instant::now());
                    }
                    Ok(_) => {}
                    Err(e) => warn!("watch error: {}", e),
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                // Changes made while this runs queue up and re-arm the debouncer
                if debouncer.fire(Instant::now()) {
                    run_once(&builder, options).await;
                }
            }
            _ = &mut ctrl_c => {
                debug!("interrupted, stopping watch");
                break;
            }
        }
    }

    Ok(())
}

/// Trailing-edge debounce
///
/// A run becomes due once `quiet` has passed since the most recent change.
#[derive(Debug)]
struct Debouncer {
    quiet: Duration,
    /// Set while changes are pending
    deadline: Option<Instant>,
}

impl Debouncer {
    fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
        }
    }

    /// Note a change at `now`, pushing the run back
    fn record(&mut self, now: Instant) {
        self.deadline = Some(now + self.quiet);
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether a run is due at `now`; clears the pending state when it is
    fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// A change worth recompiling for: content or layout changed outside the output root
fn is_relevant_change(event: &Event, output_root: &Path) -> bool {
    let kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    kind && event.paths.iter().any(|p| !p.starts_with(output_root))
}

/// Run the watch task; failures are reported and watching continues
async fn run_once(builder: &Builder, options: &Options) {
    if let Err(e) = run_with(builder, WATCH_TASK, options).await {
        error!("{:#}", e);
    }
}
