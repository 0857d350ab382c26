//! Interactive prompts for destructive commands.

use anyhow::{Context, Result, bail};
use console::{Term, style};
use dialoguer::{Confirm, MultiSelect, theme::ColorfulTheme};
use pulse_core::SelectionKey;

fn ensure_terminal() -> Result<()> {
    if !Term::stderr().is_term() {
        bail!("Not a terminal; pass --yes to skip the confirmation prompt");
    }
    Ok(())
}

/// Ask a yes/no question, defaulting to no.
pub fn confirm(prompt: &str) -> Result<bool> {
    ensure_terminal()?;

    let answer = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact_opt()
        .context("Failed to read confirmation")?;
    Ok(answer.unwrap_or(false))
}

/// Let the user tick selections to remove. `None` means the prompt was cancelled.
pub fn pick_keys(
    candidates: &[SelectionKey],
    label: impl Fn(&SelectionKey) -> String,
) -> Result<Option<Vec<SelectionKey>>> {
    ensure_terminal()?;

    println!();
    println!("{}", style("  Remove selections").bold().cyan());
    println!(
        "  {}",
        style("Space to toggle, enter to confirm, Esc to cancel").dim()
    );
    println!();

    let items: Vec<String> = candidates.iter().map(label).collect();
    let picked = MultiSelect::with_theme(&ColorfulTheme::default())
        .items(&items)
        .interact_opt()
        .context("Failed to read selection")?;

    Ok(picked.map(|indices| indices.into_iter().map(|i| candidates[i].clone()).collect()))
}

/// Let the user tick and untick listed blocks, starting from `selected`.
/// Returns the indices ticked on confirmation, `None` when cancelled.
pub fn toggle(items: &[String], selected: &[bool]) -> Result<Option<Vec<usize>>> {
    ensure_terminal()?;

    println!();
    println!("{}", style("  Select blocks").bold().cyan());
    println!(
        "  {}",
        style("Ticked blocks are selected; space to toggle, enter to apply").dim()
    );
    println!();

    MultiSelect::with_theme(&ColorfulTheme::default())
        .items(items)
        .defaults(selected)
        .interact_opt()
        .context("Failed to read selection")
}
