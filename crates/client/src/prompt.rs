use dialoguer::{theme::ColorfulTheme, Confirm, Select};
use log::warn;

/// Questions asked of the user while a command runs.
pub trait Prompter: Send + Sync {
    fn confirm(&self, question: &str, default: bool) -> bool;

    /// Index of the chosen option, `None` when nothing was chosen.
    fn select(&self, question: &str, options: &[String]) -> Option<usize>;
}

/// Interactive prompts on the user's terminal. When the terminal cannot
/// be used, every question gets its default answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm(&self, question: &str, default: bool) -> bool {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(question)
            .default(default)
            .interact()
            .unwrap_or_else(|err| {
                warn!("Unable to prompt, assuming '{}': {err}", if default { "yes" } else { "no" });
                default
            })
    }

    fn select(&self, question: &str, options: &[String]) -> Option<usize> {
        if options.is_empty() {
            return None;
        }
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(question)
            .items(options)
            .default(0)
            .interact_opt()
            .unwrap_or_else(|err| {
                warn!("Unable to prompt: {err}");
                None
            })
    }
}

/// Answers every confirmation the same way and never selects anything.
/// Used for `--no-prompt` runs and scripts.
#[derive(Debug, Clone, Copy)]
pub struct AutoAnswer(pub bool);

impl Prompter for AutoAnswer {
    fn confirm(&self, _question: &str, _default: bool) -> bool {
        self.0
    }

    fn select(&self, _question: &str, _options: &[String]) -> Option<usize> {
        None
    }
}
