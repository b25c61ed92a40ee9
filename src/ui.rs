//! Startup stage reporting for the binaries.
//!
//! On a terminal each stage gets an indicatif spinner; otherwise a plain
//! `==>` line. Stages report success on drop unless they were failed first.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::str::FromStr;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl FromStr for UiMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "plain" => Ok(Self::Plain),
            "pretty" => Ok(Self::Pretty),
            other => Err(format!("unknown UI mode '{}' (auto|plain|pretty)", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    /// Pick pretty output only when stderr is a terminal.
    pub fn detect(mode: UiMode) -> Self {
        Self::new(mode, std::io::stderr().is_terminal())
    }

    fn use_pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Run `work` as a stage, failing the stage with the error it returns.
    pub fn step<T, E: std::fmt::Display>(
        &self,
        name: &str,
        work: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let stage = self.stage(name);
        match work() {
            Ok(value) => Ok(value),
            Err(err) => {
                stage.fail(&err);
                Err(err)
            }
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    done: bool,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            done: false,
        }
    }

    /// Mark the stage failed; nothing more is printed on drop.
    pub fn fail(mut self, reason: &dyn std::fmt::Display) {
        let message = format!(
            "✘ {} ({}): {}",
            self.name,
            format_duration(self.start.elapsed()),
            reason
        );
        self.emit(message);
    }

    /// Finish with extra detail after the stage name.
    pub fn finish_with(mut self, detail: &str) {
        let message = format!(
            "✔ {}: {} ({})",
            self.name,
            detail,
            format_duration(self.start.elapsed())
        );
        self.emit(message);
    }

    fn emit(&mut self, message: String) {
        self.done = true;
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        self.emit(message);
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes() {
        assert_eq!("Plain".parse::<UiMode>().unwrap(), UiMode::Plain);
        assert_eq!("auto".parse::<UiMode>().unwrap(), UiMode::Auto);
        assert!("fancy".parse::<UiMode>().is_err());
    }

    #[test]
    fn pretty_requires_a_terminal() {
        assert!(!Ui::new(UiMode::Pretty, false).use_pretty());
        assert!(!Ui::new(UiMode::Plain, true).use_pretty());
        assert!(Ui::new(UiMode::Auto, true).use_pretty());
    }

    #[test]
    fn step_passes_results_through() {
        let ui = Ui::new(UiMode::Plain, false);
        let mut runs = 0;
        let ok: Result<u32, String> = ui.step("Load configuration", || {
            runs += 1;
            Ok(7)
        });
        assert_eq!(ok, Ok(7));

        let err: Result<u32, String> = ui.step("Connect MQTT broker", || {
            runs += 1;
            Err("connection refused".to_string())
        });
        assert_eq!(err, Err("connection refused".to_string()));
        assert_eq!(runs, 2);
    }

    #[test]
    fn failed_stage_does_not_report_success_on_drop() {
        let ui = Ui::new(UiMode::Plain, false);
        let mut stage = ui.stage("Load configuration");
        assert!(!stage.done);
        stage.emit("✘ Load configuration: bad".to_string());
        assert!(stage.done);
    }

    #[test]
    fn format_duration_switches_units() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
