use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Run phases that get their own spinner.
#[derive(Debug, Clone, Copy)]
pub enum ProgressType {
    Provision,
    Workload,
    Teardown,
}

#[derive(Debug, Clone)]
pub struct ProgressConfig {
    pub spinner_chars: &'static str,
    pub tick_interval: Duration,
    pub color: &'static str,
}

impl ProgressType {
    pub fn config(self) -> ProgressConfig {
        match self {
            ProgressType::Provision => ProgressConfig {
                spinner_chars: "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏",
                tick_interval: Duration::from_millis(120),
                color: "cyan",
            },
            ProgressType::Workload => ProgressConfig {
                spinner_chars: "⠋⠙⠚⠞⠖⠦⠴⠲⠳⠓",
                tick_interval: Duration::from_millis(120),
                color: "blue",
            },
            ProgressType::Teardown => ProgressConfig {
                spinner_chars: "⠋⠙⠚⠒⠂⠂⠒⠲⠴⠦⠖⠒⠐⠐⠒⠓⠋",
                tick_interval: Duration::from_millis(150),
                color: "yellow",
            },
        }
    }

    /// Starts a spinner on stderr. Draws nothing when stderr is not a terminal.
    pub fn create_spinner(self, message: &str) -> PhaseSpinner {
        let config = self.config();
        let spinner = ProgressBar::new_spinner();
        let template = format!("{{spinner:.{}}} {{msg}}", config.color);
        let spinner_style = ProgressStyle::default_spinner()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(config.spinner_chars);

        spinner.set_style(spinner_style);
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(config.tick_interval);

        PhaseSpinner { spinner }
    }
}

pub struct PhaseSpinner {
    spinner: ProgressBar,
}

impl PhaseSpinner {
    pub fn set_message(&self, message: &str) {
        self.spinner.set_message(message.to_string());
    }

    pub fn finish_success(&self, message: &str) {
        self.spinner
            .finish_with_message(format!("{} {}", style("✓").green(), message));
    }

    pub fn finish_failure(&self, message: &str) {
        self.spinner
            .finish_with_message(format!("{} {}", style("✗").red(), style(message).red()));
    }
}
