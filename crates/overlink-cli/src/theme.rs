//! Terminal styling for CLI output.

use colored::Colorize;

/// Output styles.
pub(crate) struct Theme;

impl Theme {
    /// Section title.
    pub(crate) fn header(text: &str) -> String {
        text.bold().cyan().to_string()
    }

    /// Completed step.
    pub(crate) fn success(text: &str) -> String {
        format!("{} {text}", "✓".green().bold())
    }

    /// Something the user should look at.
    pub(crate) fn warning(text: &str) -> String {
        format!("{} {}", "!".yellow().bold(), text.yellow())
    }

    /// Neutral note.
    pub(crate) fn info(text: &str) -> String {
        format!("{} {text}", "·".blue())
    }

    /// Secondary detail.
    pub(crate) fn dimmed(text: &str) -> String {
        text.dimmed().to_string()
    }

    /// Rule under a section title.
    pub(crate) fn separator() -> String {
        "─".repeat(40).dimmed().to_string()
    }

    /// `label  value` row.
    pub(crate) fn field(label: &str, value: &str) -> String {
        format!("  {:<12} {value}", label.dimmed())
    }

    /// A process ID.
    pub(crate) fn pid(pid: u32) -> String {
        pid.to_string().green().to_string()
    }
}
