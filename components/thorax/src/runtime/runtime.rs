// Local crates
use crate::{
    cursor::cursor_store::{CursorSource, CursorStore, JournalCursorStore},
    helpers::load_config::Config,
    instrumentation::tracing::panic_message,
    journal::client::{BugoutJournalClient, JournalClient},
    metrics::metrics,
    reporter::reporter::{HumbugReporter, Reporter, error_report, panic_report, system_report},
    sink::{analytics::AnalyticsSink, segment::SegmentSink},
    sync::sync_loop::{SyncLoop, SyncOptions},
    transformer::transformer::Transformer,
};

// External crates
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::instrument;

/// Thorax runtime: one single-shot sync against Bugout and Segment,
/// bracketed by reporting.
pub async fn run_thorax(cfg: Config) -> Result<()> {
    let reporter = Arc::new(
        HumbugReporter::new(&cfg.reporting, &cfg.journal.spire_url)
            .context("Failed to build crash reporter")?,
    );
    tracing::debug!(reporting_enabled = reporter.is_enabled(), "Crash reporter ready");
    reporter.publish(system_report()).await;

    let task_reporter = Arc::clone(&reporter);
    let handle = tokio::spawn(async move {
        let built = build_collaborators(&cfg);
        match built {
            Ok((journal, cursors, mut sink)) => {
                run_with(&cfg, journal.as_ref(), &cursors, &mut sink, task_reporter.as_ref()).await
            }
            Err(e) => {
                report_failure(task_reporter.as_ref(), &e).await;
                Err(e)
            }
        }
    });

    supervise(reporter.as_ref(), handle).await
}

type Collaborators = (
    Arc<BugoutJournalClient>,
    JournalCursorStore<BugoutJournalClient>,
    SegmentSink,
);

fn build_collaborators(cfg: &Config) -> Result<Collaborators> {
    let journal = Arc::new(
        BugoutJournalClient::new(&cfg.journal).context("Failed to build Bugout journal client")?,
    );
    let cursors = JournalCursorStore::new(Arc::clone(&journal), env!("CARGO_PKG_VERSION"));
    let sink = SegmentSink::new(&cfg.segment).context("Failed to build Segment sink")?;
    Ok((journal, cursors, sink))
}

/// Await the run task. A panic inside it is reported before unwinding
/// continues.
async fn supervise<R: Reporter>(reporter: &R, handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            reporter.publish(panic_report(&panic_message(payload.as_ref()))).await;
            std::panic::resume_unwind(payload)
        }
        Err(e) => Err(anyhow::Error::new(e).context("Thorax run was cancelled")),
    }
}

async fn report_failure<R: Reporter>(reporter: &R, error: &anyhow::Error) {
    tracing::error!(error = %format!("{error:#}"), "Thorax run failed");
    reporter.publish(error_report(error)).await;
}

/// Run one sync with the given collaborators.
///
/// The sink is closed on every exit path, and a failed run is published to
/// `reporter` before its error is returned.
pub async fn run_with<J, C, S, R>(
    cfg: &Config,
    journal: &J,
    cursors: &C,
    sink: &mut S,
    reporter: &R,
) -> Result<()>
where
    J: JournalClient,
    C: CursorStore,
    S: AnalyticsSink,
    R: Reporter,
{
    let result = sync_journal(cfg, journal, cursors, sink).await;
    if let Err(e) = &result {
        report_failure(reporter, e).await;
    }
    result
}

#[instrument(name = "thorax_runtime::sync_journal", skip_all, level = "debug")]
async fn sync_journal<J, C, S>(cfg: &Config, journal: &J, cursors: &C, sink: &mut S) -> Result<()>
where
    J: JournalClient,
    C: CursorStore,
    S: AnalyticsSink,
{
    let started = Instant::now();

    let transformer = Transformer::new(cfg.sync.identity_policy);
    let options = SyncOptions {
        batch_size: cfg.sync.batch_size,
        delay: Duration::from_secs(cfg.sync.delay_secs),
        source: CursorSource::from_options(
            cfg.sync.cursor_name.as_deref(),
            cfg.sync.cursor.as_deref(),
        ),
    };

    let outcome = SyncLoop::new(journal, cursors, &*sink, &transformer, options)
        .run()
        .await;

    // Buffered events are flushed whether or not the run succeeded
    let stats = sink.close().await;
    if stats.failed > 0 {
        tracing::warn!(
            failed = stats.failed,
            delivered = stats.delivered,
            "Some analytics events were not accepted by Segment"
        );
    }

    metrics::observe_duration(&metrics::RUN_DURATION_SECONDS, started);
    if let Some(path) = &cfg.metrics.textfile_path {
        if let Err(e) = metrics::write_textfile(Path::new(path)) {
            tracing::warn!(error = %format!("{e:#}"), "Failed to write metrics textfile");
        }
    }

    let summary = outcome.context("Journal sync failed")?;
    tracing::info!(
        pages = summary.pages,
        entries = summary.entries,
        messages = summary.messages,
        start_cursor = %summary.start_cursor,
        cursor = %summary.cursor,
        checkpoints_written = summary.checkpoints_written,
        checkpoint_failures = summary.checkpoint_failures,
        delivered = stats.delivered,
        elapsed = ?started.elapsed(),
        "Thorax run complete"
    );
    println!("Done!");
    Ok(())
}
