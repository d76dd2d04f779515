//! Backward-scroll loop over a live chat pane.
//!
//! The pane is re-acquired on every probe because the page re-renders its DOM
//! subtree while older messages stream in; holding an element reference across
//! the settle wait goes stale. Each probe reports an explicit result
//! ([`Probe`]) so the retry policy is a visible match instead of swallowed
//! exceptions.

use crate::webdriver::{is_transient_dom, ElementId, Session};
use crate::{Result, VaultError};
use serde::Serialize;
use std::thread;
use std::time::Duration;

pub const DEFAULT_STALL_THRESHOLD: u32 = 3;

const SCRIPT_SCROLL_HEIGHT: &str = "return arguments[0].scrollHeight";
const SCRIPT_CLIENT_HEIGHT: &str = "return arguments[0].clientHeight";
const SCRIPT_SCROLL_TOP: &str = "return arguments[0].scrollTop";
const SCRIPT_SCROLL_TO_TOP: &str = "arguments[0].scrollTo(0, 0)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollSample {
    pub scroll_height: i64,
    pub scroll_top: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Sample(ScrollSample),
    /// Stale/missing element mid-iteration; retry next iteration.
    Transient,
    /// The pane cannot be re-acquired at all.
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollOutcome {
    ReachedTop,
    MarkerFound,
    BudgetExhausted,
    SurfaceLost,
}

impl ScrollOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollOutcome::ReachedTop => "reached_top",
            ScrollOutcome::MarkerFound => "marker_found",
            ScrollOutcome::BudgetExhausted => "budget_exhausted",
            ScrollOutcome::SurfaceLost => "surface_lost",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollEvent {
    /// One completed scroll-and-settle iteration, with the post-settle sample.
    Scrolled {
        iteration: usize,
        height: i64,
        offset: i64,
    },
    /// New content loaded during the settle wait.
    Progress { iteration: usize, grew_by: i64 },
    /// No height change while already at the top boundary.
    Stalled { iteration: usize, count: u32 },
}

#[derive(Debug, Clone)]
pub struct ScrollConfig {
    pub max_scrolls: usize,
    pub settle: Duration,
    pub stall_threshold: u32,
    pub stop_marker: Option<String>,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            max_scrolls: 100,
            settle: Duration::from_secs(2),
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            stop_marker: None,
        }
    }
}

pub trait ScrollSurface {
    /// Re-acquire the pane and measure it.
    fn probe(&mut self) -> Probe;
    /// Re-acquire the pane, measure it, then command a scroll to offset 0.
    /// The returned sample is taken before the scroll.
    fn scroll_to_top(&mut self) -> Probe;
    /// Whether the stop marker text is currently rendered.
    fn marker_visible(&mut self, marker: &str) -> bool;
}

/// Runs the scroll loop until the top is detected, a stop marker renders, the
/// budget runs out, or the pane is lost. `on_event` observes every state
/// transition; errors it returns abort the loop.
pub fn run_scroll<S, F>(surface: &mut S, config: &ScrollConfig, mut on_event: F) -> Result<ScrollOutcome>
where
    S: ScrollSurface,
    F: FnMut(&ScrollEvent) -> Result<()>,
{
    let mut stalls: u32 = 0;

    for iteration in 1..=config.max_scrolls {
        let pre = match surface.scroll_to_top() {
            Probe::Sample(sample) => sample,
            Probe::Transient => continue,
            Probe::Lost => return Ok(ScrollOutcome::SurfaceLost),
        };

        if !config.settle.is_zero() {
            thread::sleep(config.settle);
        }

        let post = match surface.probe() {
            Probe::Sample(sample) => sample,
            Probe::Transient => continue,
            Probe::Lost => return Ok(ScrollOutcome::SurfaceLost),
        };

        on_event(&ScrollEvent::Scrolled {
            iteration,
            height: post.scroll_height,
            offset: post.scroll_top,
        })?;

        if let Some(marker) = config.stop_marker.as_deref() {
            if surface.marker_visible(marker) {
                return Ok(ScrollOutcome::MarkerFound);
            }
        }

        if post.scroll_height > pre.scroll_height {
            stalls = 0;
            on_event(&ScrollEvent::Progress {
                iteration,
                grew_by: post.scroll_height - pre.scroll_height,
            })?;
        } else if post.scroll_height == pre.scroll_height && post.scroll_top == 0 {
            stalls += 1;
            on_event(&ScrollEvent::Stalled {
                iteration,
                count: stalls,
            })?;
            if stalls >= config.stall_threshold {
                return Ok(ScrollOutcome::ReachedTop);
            }
        } else {
            // Height unchanged but not at the top yet: rendering lag.
            stalls = 0;
        }
    }

    Ok(ScrollOutcome::BudgetExhausted)
}

/// WebDriver-backed surface. Among all locator matches it picks the first
/// element whose content overflows its viewport, falling back to the first
/// match when none overflow.
pub struct LivePane<'a> {
    session: &'a Session,
    locator: String,
}

impl<'a> LivePane<'a> {
    pub fn new(session: &'a Session, locator: &str) -> Self {
        Self {
            session,
            locator: locator.to_string(),
        }
    }

    fn acquire(&self) -> Result<ElementId> {
        let elements = self.session.find_elements_xpath(&self.locator)?;
        if elements.is_empty() {
            return Err(VaultError::PaneNotFound(self.locator.clone()));
        }
        for element in &elements {
            let scroll_height = match self.script_i64(SCRIPT_SCROLL_HEIGHT, element) {
                Ok(v) => v,
                Err(err) if is_transient_dom(&err) => continue,
                Err(err) => return Err(err),
            };
            let client_height = match self.script_i64(SCRIPT_CLIENT_HEIGHT, element) {
                Ok(v) => v,
                Err(err) if is_transient_dom(&err) => continue,
                Err(err) => return Err(err),
            };
            if scroll_height > client_height {
                return Ok(element.clone());
            }
        }
        elements
            .into_iter()
            .next()
            .ok_or_else(|| VaultError::PaneNotFound(self.locator.clone()))
    }

    fn measure(&self, element: &ElementId) -> Result<ScrollSample> {
        Ok(ScrollSample {
            scroll_height: self.script_i64(SCRIPT_SCROLL_HEIGHT, element)?,
            scroll_top: self.script_i64(SCRIPT_SCROLL_TOP, element)?,
        })
    }

    fn script_i64(&self, script: &str, element: &ElementId) -> Result<i64> {
        let value = self.session.execute_on(script, element)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|v| v as i64))
            .ok_or_else(|| {
                VaultError::Protocol(format!("script returned a non-numeric value: {value}"))
            })
    }
}

fn classify(err: VaultError) -> Probe {
    if is_transient_dom(&err) {
        Probe::Transient
    } else {
        Probe::Lost
    }
}

impl ScrollSurface for LivePane<'_> {
    fn probe(&mut self) -> Probe {
        let element = match self.acquire() {
            Ok(element) => element,
            Err(err) => return classify(err),
        };
        match self.measure(&element) {
            Ok(sample) => Probe::Sample(sample),
            Err(err) => classify(err),
        }
    }

    fn scroll_to_top(&mut self) -> Probe {
        let element = match self.acquire() {
            Ok(element) => element,
            Err(err) => return classify(err),
        };
        let sample = match self.measure(&element) {
            Ok(sample) => sample,
            Err(err) => return classify(err),
        };
        match self.session.execute_on(SCRIPT_SCROLL_TO_TOP, &element) {
            Ok(_) => Probe::Sample(sample),
            Err(err) => classify(err),
        }
    }

    fn marker_visible(&mut self, marker: &str) -> bool {
        self.session
            .page_source()
            .map(|source| source.contains(marker))
            .unwrap_or(false)
    }
}
