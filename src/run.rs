//! Top-level backup workflow: one browser session, one scroll loop with
//! harvest-on-progress, one final harvest pass, guaranteed teardown.

use crate::config::VaultConfig;
use crate::harvest::{harvest_pass, HarvestConfig, ImageFetcher, UreqFetcher};
use crate::ledger::{FileLedgerStore, Ledger, LedgerStore};
use crate::scroll::{run_scroll, LivePane, ScrollConfig, ScrollEvent, ScrollOutcome};
use crate::webdriver::{is_transient_dom, Session};
use crate::{Result, VaultError};
use serde::Serialize;
use serde_json::json;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    pub scroll_outcome: ScrollOutcome,
    pub harvest_passes: usize,
    pub images_downloaded: usize,
}

/// Opens a session, runs the scroll/harvest workflow, and always tears the
/// session down. On error the session lingers for `error_linger_secs` first so
/// the page can be inspected manually.
///
/// `on_ready` runs after navigation and the initial page-load wait; the CLI
/// uses it to pause for a manual login.
pub fn run_backup<FReady, FLog>(
    config: &VaultConfig,
    mut on_ready: FReady,
    mut log_line: FLog,
) -> Result<BackupSummary>
where
    FReady: FnMut() -> Result<()>,
    FLog: FnMut(&str, &str, serde_json::Value) -> Result<()>,
{
    let chat_url = config
        .chat_url
        .as_deref()
        .ok_or_else(|| VaultError::InvalidUrl("no chat URL configured".to_string()))?;

    let session = Session::connect(&config.webdriver_url)?;
    log_line(
        "info",
        "session_opened",
        json!({ "webdriver": config.webdriver_url, "session": session.session_id() }),
    )?;

    let result = drive(&session, chat_url, config, &mut on_ready, &mut log_line);

    if result.is_err() && config.error_linger_secs > 0 {
        let _ = log_line(
            "warn",
            "lingering_before_teardown",
            json!({ "seconds": config.error_linger_secs }),
        );
        thread::sleep(Duration::from_secs(config.error_linger_secs));
    }
    if let Err(err) = session.quit() {
        let _ = log_line(
            "warn",
            "session_teardown_failed",
            json!({ "error": err.to_string() }),
        );
    }

    result
}

fn drive<FReady, FLog>(
    session: &Session,
    chat_url: &str,
    config: &VaultConfig,
    on_ready: &mut FReady,
    log_line: &mut FLog,
) -> Result<BackupSummary>
where
    FReady: FnMut() -> Result<()>,
    FLog: FnMut(&str, &str, serde_json::Value) -> Result<()>,
{
    session.navigate(chat_url)?;
    log_line("info", "navigated", json!({ "url": chat_url }))?;
    if config.page_load_wait_ms > 0 {
        thread::sleep(Duration::from_millis(config.page_load_wait_ms));
    }
    on_ready()?;

    let mut ledger = Ledger::open(FileLedgerStore::in_dir(&config.output_dir))?;
    log_line(
        "info",
        "ledger_loaded",
        json!({ "known_hashes": ledger.len() }),
    )?;

    let fetcher = UreqFetcher::new(Duration::from_secs(config.fetch_timeout_secs));
    let harvest_config = HarvestConfig {
        min_dimension: config.min_dimension,
        download_delay: Duration::from_millis(config.download_delay_ms),
    };
    let scroll_config = ScrollConfig {
        max_scrolls: config.max_scrolls,
        settle: Duration::from_millis(config.settle_ms),
        stall_threshold: config.stall_threshold,
        stop_marker: config.stop_marker.clone(),
    };

    let mut passes = 0_usize;
    let mut downloaded = 0_usize;

    let mut pane = LivePane::new(session, &config.pane_locator);
    let outcome = run_scroll(&mut pane, &scroll_config, |event| match event {
        ScrollEvent::Scrolled {
            iteration,
            height,
            offset,
        } => log_line(
            "info",
            "scrolled",
            json!({ "iteration": iteration, "height": height, "offset": offset }),
        ),
        ScrollEvent::Stalled { iteration, count } => log_line(
            "info",
            "stalled",
            json!({ "iteration": iteration, "count": count }),
        ),
        ScrollEvent::Progress { iteration, grew_by } => {
            log_line(
                "info",
                "new_content_loaded",
                json!({ "iteration": iteration, "grew_by": grew_by }),
            )?;
            if !config.harvest_during_scroll {
                return Ok(());
            }
            match harvest_current(
                session,
                &config.output_dir,
                &harvest_config,
                &mut ledger,
                &fetcher,
                log_line,
            ) {
                Ok(count) => {
                    passes += 1;
                    downloaded += count;
                    Ok(())
                }
                // A stale page snapshot is retried on the next progress event.
                Err(err) if is_transient_dom(&err) => Ok(()),
                Err(err) => Err(err),
            }
        }
    })?;
    log_line(
        "info",
        "scroll_finished",
        json!({ "outcome": outcome.as_str() }),
    )?;

    // Best-effort final pass regardless of how the scroll loop ended.
    downloaded += harvest_current(
        session,
        &config.output_dir,
        &harvest_config,
        &mut ledger,
        &fetcher,
        log_line,
    )?;
    passes += 1;

    Ok(BackupSummary {
        scroll_outcome: outcome,
        harvest_passes: passes,
        images_downloaded: downloaded,
    })
}

fn harvest_current<S, F, FLog>(
    session: &Session,
    output_dir: &std::path::Path,
    config: &HarvestConfig,
    ledger: &mut Ledger<S>,
    fetcher: &F,
    log_line: &mut FLog,
) -> Result<usize>
where
    S: LedgerStore,
    F: ImageFetcher + ?Sized,
    FLog: FnMut(&str, &str, serde_json::Value) -> Result<()>,
{
    let page_url = session.current_url()?;
    let page_html = session.page_source()?;
    harvest_pass(
        &page_url,
        &page_html,
        output_dir,
        config,
        ledger,
        fetcher,
        |level, event, fields| log_line(level, event, fields),
    )
}
