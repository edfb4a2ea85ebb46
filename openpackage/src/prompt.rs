//! Interactive prompts.
//!
//! Every prompt here is an explicit call that can return
//! [`OpkgError::UserCancellation`][]; nothing holds state across one. When
//! no terminal is attended, callers should not reach for these at all and
//! instead take their documented defaults.

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, MultiSelect, Select};

use crate::arbitrate::ChooserOutcome;
use crate::discovery::DiscoveredFile;
use crate::errors::{OpkgError, OpkgResult};

/// Whether prompting is possible at all
pub fn interactive() -> bool {
    console::user_attended()
}

fn theme() -> ColorfulTheme {
    ColorfulTheme::default()
}

/// Yes/no with a default; Esc cancels
pub fn confirm(message: &str, default: bool) -> OpkgResult<bool> {
    let choice = Confirm::with_theme(&theme())
        .with_prompt(message)
        .default(default)
        .interact_opt()?;
    choice.ok_or(OpkgError::UserCancellation)
}

/// Pick one item; `None` means the user backed out
pub fn select(message: &str, items: &[String]) -> OpkgResult<Option<usize>> {
    let choice = Select::with_theme(&theme())
        .with_prompt(message)
        .items(items)
        .default(0)
        .interact_opt()?;
    Ok(choice)
}

/// Pick any subset; `None` means the user backed out
pub fn multi_select(message: &str, items: &[String]) -> OpkgResult<Option<Vec<usize>>> {
    let choice = MultiSelect::with_theme(&theme())
        .with_prompt(message)
        .items(items)
        .interact_opt()?;
    Ok(choice)
}

/// The interactive chooser for the "same mtime, all contents unique"
/// arbitration case: elect one universal copy, keep any subset
/// platform-specific, and let the rest be synchronized to the elected
/// contents. Backing out of either prompt falls back to the
/// non-interactive rule.
pub fn arbitration_chooser(
    registry_path: &str,
    files: &[DiscoveredFile],
) -> OpkgResult<ChooserOutcome> {
    let items: Vec<String> = files
        .iter()
        .map(|file| format!("{} [{}]", file.full_path, file.source.label()))
        .collect();
    let Some(universal) = select(
        &format!("{registry_path} differs across platforms; pick the universal copy"),
        &items,
    )?
    else {
        return Ok(ChooserOutcome::Cancelled);
    };

    let rest: Vec<(usize, String)> = items
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| *idx != universal)
        .collect();
    let rest_items: Vec<String> = rest.iter().map(|(_, item)| item.clone()).collect();
    let Some(chosen) = multi_select(
        "keep any of these as platform-specific variants (the rest are overwritten to match)",
        &rest_items,
    )?
    else {
        return Ok(ChooserOutcome::Cancelled);
    };

    let platform_specific = chosen.into_iter().map(|idx| rest[idx].0).collect();
    Ok(ChooserOutcome::Elected {
        universal,
        platform_specific,
    })
}
