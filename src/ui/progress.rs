//! Pipeline progress UI.
//!
//! Renders [`SchedulerEvent`]s on stderr so stage output on stdout stays
//! byte-for-byte deterministic. Supports three modes:
//! - `full`: progress bars and colors
//! - `minimal`: one line per event
//! - `json`: one JSON object per event

use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::scheduler::SchedulerEvent;
use crate::stage::StageId;
use crate::ui::icons::{CHECK, CROSS, GATE, GROUP, RUNNING, SKIP, SPARKLE, WARN};

/// Output mode for the progress UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UiMode {
    /// Progress bars
    #[default]
    Full,
    /// Single-line status updates
    Minimal,
    /// JSON-formatted events
    Json,
    /// No progress output
    Quiet,
}

/// Progress display driven by scheduler events.
///
/// Events arrive from a single consumer task, so the bar map lock is never contended.
pub struct PipelineUI {
    mode: UiMode,
    multi: MultiProgress,
    header_bar: ProgressBar,
    stage_bars: Mutex<BTreeMap<StageId, ProgressBar>>,
    term: Term,
}

impl PipelineUI {
    pub fn new(mode: UiMode) -> Self {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let header_style = ProgressStyle::default_bar()
            .template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let header_bar = if mode == UiMode::Full {
            multi.add(ProgressBar::new(0))
        } else {
            ProgressBar::hidden()
        };
        header_bar.set_style(header_style);
        header_bar.set_prefix("Stages");

        Self {
            mode,
            multi,
            header_bar,
            stage_bars: Mutex::new(BTreeMap::new()),
            term: Term::stderr(),
        }
    }

    /// Consume events from `rx` on a background task until the sender side closes.
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::Receiver<SchedulerEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.handle_event(&event);
            }
        })
    }

    pub fn handle_event(&self, event: &SchedulerEvent) {
        match self.mode {
            UiMode::Quiet => {}
            UiMode::Json => self.handle_json(event),
            UiMode::Minimal => self.handle_minimal(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_json(&self, event: &SchedulerEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    fn handle_minimal(&self, event: &SchedulerEvent) {
        let line = match event {
            SchedulerEvent::RunStarted {
                change_id,
                lane,
                pending,
                ..
            } => format!("{} on lane {}: {} stage(s)", change_id, lane, pending.len()),
            SchedulerEvent::StageCompleted { stage, .. } => format!("ok {}", stage),
            SchedulerEvent::StageFailed { stage, error } => format!("FAILED {} ({})", stage, error),
            SchedulerEvent::GateEvaluated { summary, .. } => format!("gate {}", summary),
            SchedulerEvent::RunCompleted { success } => {
                format!("done: {}", if *success { "ok" } else { "failed" })
            }
            _ => return,
        };
        let _ = writeln!(&self.term, "{}", line);
    }

    fn handle_full(&self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::RunStarted {
                change_id,
                lane,
                pending,
                skipped,
                resumed,
            } => {
                self.header_bar.set_length(pending.len() as u64);
                self.header_bar
                    .set_message(format!("{} ({})", change_id, lane));
                if *resumed && !skipped.is_empty() {
                    let names: Vec<String> = skipped.iter().map(|s| s.to_string()).collect();
                    self.println(format!(
                        "{}Resuming; already complete: {}",
                        SKIP,
                        style(names.join(", ")).dim()
                    ));
                }
            }
            SchedulerEvent::GroupStarted { stages, workers } => {
                let names: Vec<&str> = stages.iter().map(|s| s.name()).collect();
                self.println(format!(
                    "{}Parallel group: {} ({} worker(s))",
                    GROUP,
                    style(names.join(", ")).yellow(),
                    workers
                ));
            }
            SchedulerEvent::StageStarted { stage } => self.on_stage_started(*stage),
            SchedulerEvent::StageCompleted { stage, .. } => {
                self.finish_bar(*stage, format!("{}done", CHECK));
                self.header_bar.inc(1);
            }
            SchedulerEvent::StageFailed { stage, error } => {
                self.finish_bar(*stage, format!("{}{}", CROSS, style(error).red()));
            }
            SchedulerEvent::GroupCompleted { not_started, .. } => {
                if !not_started.is_empty() {
                    let names: Vec<&str> = not_started.iter().map(|s| s.name()).collect();
                    self.println(format!("{}Not started: {}", SKIP, names.join(", ")));
                }
            }
            SchedulerEvent::GateEvaluated {
                passed,
                advisory,
                summary,
                ..
            } => {
                let icon = match (passed, advisory) {
                    (true, _) => GATE,
                    (false, true) => WARN,
                    (false, false) => CROSS,
                };
                let summary = if *passed {
                    style(summary.clone()).green()
                } else {
                    style(summary.clone()).red()
                };
                self.println(format!("{}Quality gate {}", icon, summary));
            }
            SchedulerEvent::RunCompleted { success } => {
                if *success {
                    self.header_bar
                        .finish_with_message(format!("{}complete", SPARKLE));
                } else {
                    self.header_bar.abandon_with_message("halted");
                }
            }
        }
    }

    fn on_stage_started(&self, stage: StageId) {
        let bar_style = ProgressStyle::default_spinner()
            .template("  {spinner} {prefix:.bold} {msg}")
            .expect("progress bar template is a valid static string");
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(bar_style);
        bar.set_prefix(stage.to_string());
        bar.set_message(format!("{}running", RUNNING));
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut bars) = self.stage_bars.lock() {
            bars.insert(stage, bar);
        }
    }

    fn finish_bar(&self, stage: StageId, message: String) {
        let bar = self.stage_bars.lock().ok().and_then(|mut b| b.remove(&stage));
        match bar {
            Some(bar) => bar.finish_with_message(message),
            None => self.println(format!("  {} {}", stage, message)),
        }
    }

    /// Print above the bars, falling back to plain stderr if the bars are hidden.
    fn println(&self, line: String) {
        if self.multi.println(&line).is_err() {
            let _ = writeln!(&self.term, "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::LaneName;

    #[test]
    fn test_quiet_mode_ignores_events() {
        let ui = PipelineUI::new(UiMode::Quiet);
        ui.handle_event(&SchedulerEvent::RunCompleted { success: true });
        assert!(ui.stage_bars.lock().unwrap().is_empty());
    }

    #[test]
    fn test_full_mode_tracks_running_stages() {
        let ui = PipelineUI::new(UiMode::Full);
        ui.handle_event(&SchedulerEvent::RunStarted {
            change_id: "add-login".into(),
            lane: LaneName::Light,
            pending: vec![StageId::PROPOSAL],
            skipped: vec![],
            resumed: false,
        });
        ui.handle_event(&SchedulerEvent::StageStarted {
            stage: StageId::PROPOSAL,
        });
        assert_eq!(ui.stage_bars.lock().unwrap().len(), 1);
        ui.handle_event(&SchedulerEvent::StageCompleted {
            stage: StageId::PROPOSAL,
            checkpoint: "01-x".into(),
        });
        assert!(ui.stage_bars.lock().unwrap().is_empty());
        assert_eq!(ui.header_bar.position(), 1);
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let json = serde_json::to_value(SchedulerEvent::StageFailed {
            stage: StageId::TEST,
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "stage_failed");
        assert_eq!(json["stage"], 5);
    }
}
