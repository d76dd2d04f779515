//! End-to-end scroll/harvest flow against scripted surfaces and a stub
//! fetcher, with the real file-backed ledger in a temp dir.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use chatvault::harvest::{harvest_pass, FetchedImage, HarvestConfig, ImageFetcher};
use chatvault::ledger::{content_address, FileLedgerStore, Ledger, LEDGER_FILE_NAME};
use chatvault::scroll::{run_scroll, Probe, ScrollConfig, ScrollEvent, ScrollOutcome, ScrollSample, ScrollSurface};
use chatvault::Result;

const PAGE_URL: &str = "https://example.com/t/42";

struct ScriptedPane {
    script: VecDeque<Probe>,
}

impl ScriptedPane {
    fn new(script: Vec<Probe>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl ScrollSurface for ScriptedPane {
    fn probe(&mut self) -> Probe {
        self.script.pop_front().unwrap_or(Probe::Lost)
    }

    fn scroll_to_top(&mut self) -> Probe {
        self.script.pop_front().unwrap_or(Probe::Lost)
    }

    fn marker_visible(&mut self, _marker: &str) -> bool {
        false
    }
}

struct StubFetcher {
    responses: HashMap<String, Vec<u8>>,
}

impl StubFetcher {
    fn new(entries: &[(&str, &[u8])]) -> Self {
        let responses = entries
            .iter()
            .map(|(url, body)| (url.to_string(), body.to_vec()))
            .collect();
        Self { responses }
    }
}

impl ImageFetcher for StubFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage> {
        match self.responses.get(url) {
            Some(body) => Ok(FetchedImage {
                status: 200,
                body: body.clone(),
            }),
            None => Ok(FetchedImage {
                status: 404,
                body: Vec::new(),
            }),
        }
    }
}

fn sample(scroll_height: i64) -> Probe {
    Probe::Sample(ScrollSample {
        scroll_height,
        scroll_top: 0,
    })
}

fn quiet_harvest(
    html: &str,
    output_dir: &Path,
    ledger: &mut Ledger<FileLedgerStore>,
    fetcher: &StubFetcher,
) -> usize {
    harvest_pass(
        PAGE_URL,
        html,
        output_dir,
        &HarvestConfig {
            min_dimension: 50,
            download_delay: Duration::ZERO,
        },
        ledger,
        fetcher,
        |_level, _event, _fields| Ok(()),
    )
    .expect("harvest pass")
}

#[test]
fn scrolling_with_harvest_on_progress_fills_the_ledger() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("images");

    // Two growth steps, then three stalls at the top.
    let mut pane = ScriptedPane::new(vec![
        sample(1000),
        sample(1500),
        sample(1500),
        sample(2200),
        sample(2200),
        sample(2200),
        sample(2200),
        sample(2200),
        sample(2200),
        sample(2200),
    ]);

    // The document reveals more images as older messages load.
    let early_html = r#"<html><body>
        <img src="https://cdn.example.com/a.jpg" width="640" height="480" />
    </body></html>"#;
    let late_html = r#"<html><body>
        <img src="https://cdn.example.com/a.jpg" width="640" height="480" />
        <img src="https://cdn.example.com/b.png" />
        <img src="https://cdn.example.com/icon.png" width="16" height="16" />
        <img src="data:image/gif;base64,R0lGOD" />
    </body></html>"#;
    let documents = vec![early_html, late_html];

    let fetcher = StubFetcher::new(&[
        ("https://cdn.example.com/a.jpg", b"jpeg-bytes"),
        ("https://cdn.example.com/b.png", b"png-bytes"),
        ("https://cdn.example.com/icon.png", b"icon-bytes"),
    ]);
    let mut ledger = Ledger::open(FileLedgerStore::in_dir(&out)).expect("ledger");

    let config = ScrollConfig {
        max_scrolls: 20,
        settle: Duration::ZERO,
        stall_threshold: 3,
        stop_marker: None,
    };
    let mut growth_seen = 0_usize;
    let mut downloaded = 0_usize;
    let outcome = run_scroll(&mut pane, &config, |event| {
        if let ScrollEvent::Progress { .. } = event {
            let html = documents[growth_seen.min(documents.len() - 1)];
            growth_seen += 1;
            downloaded += quiet_harvest(html, &out, &mut ledger, &fetcher);
        }
        Ok(())
    })
    .expect("run_scroll");

    assert_eq!(outcome, ScrollOutcome::ReachedTop);
    assert_eq!(growth_seen, 2);

    // Final pass catches nothing new.
    downloaded += quiet_harvest(late_html, &out, &mut ledger, &fetcher);

    assert_eq!(downloaded, 2);
    let ledger_raw = std::fs::read_to_string(out.join(LEDGER_FILE_NAME)).expect("ledger file");
    let lines: Vec<&str> = ledger_raw.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.contains(&content_address("https://cdn.example.com/a.jpg").as_str()));
    assert!(lines.contains(&content_address("https://cdn.example.com/b.png").as_str()));

    let image_files: Vec<String> = std::fs::read_dir(&out)
        .expect("read_dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
        .filter(|name| name != LEDGER_FILE_NAME)
        .collect();
    assert_eq!(image_files.len(), 2);
    assert!(image_files.iter().all(|name| name.starts_with("img_")));
}

#[test]
fn a_second_run_reuses_the_persisted_ledger() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("images");
    let html = r#"<html><body>
        <img src="https://cdn.example.com/a.jpg" />
        <img src="https://cdn.example.com/b.png" />
    </body></html>"#;
    let fetcher = StubFetcher::new(&[
        ("https://cdn.example.com/a.jpg", b"jpeg-bytes"),
        ("https://cdn.example.com/b.png", b"png-bytes"),
    ]);

    let mut first = Ledger::open(FileLedgerStore::in_dir(&out)).expect("ledger");
    assert_eq!(quiet_harvest(html, &out, &mut first, &fetcher), 2);
    drop(first);

    // Fresh process: the on-disk ledger alone must prevent re-downloads.
    let mut second = Ledger::open(FileLedgerStore::in_dir(&out)).expect("ledger");
    assert_eq!(second.len(), 2);
    assert_eq!(quiet_harvest(html, &out, &mut second, &fetcher), 0);

    let ledger_raw = std::fs::read_to_string(out.join(LEDGER_FILE_NAME)).expect("ledger file");
    assert_eq!(ledger_raw.lines().count(), 2);
}
