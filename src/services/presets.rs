//! One-shot bundles: everything recommended, or everything back to stock.

use crate::models::{SwapSettings, Tunable};
use crate::services::command::CommandRunner;
use crate::services::swap::{SwapError, SwapManager, space_needed};
use crate::services::system::SpaceProbe;
use crate::services::tweaks::{TweakError, TweakService};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PresetError {
    #[error("swap step failed: {0}")]
    Swap(#[from] SwapError),

    #[error("tweak step failed: {0}")]
    Tweak(#[from] TweakError),
}

/// Swap size the recommended preset aims for given `free` bytes.
///
/// The recommended size when it fits; otherwise the largest offered size
/// that fits, never above the automatic cap; the default size when nothing
/// else does.
pub fn recommended_swap_size(settings: &SwapSettings, offered_gb: &[u32], free: u64) -> u32 {
    if space_needed(settings.recommended_size_gb, settings.overhead_bytes) <= free {
        return settings.recommended_size_gb;
    }

    offered_gb
        .iter()
        .copied()
        .filter(|&size| size <= settings.max_auto_size_gb)
        .filter(|&size| space_needed(size, settings.overhead_bytes) <= free)
        .max()
        .unwrap_or(settings.default_size_gb)
}

/// Resize swap, lower swappiness and enable every memory tweak. Stops at
/// the first failing step.
pub async fn apply_recommended<R, P>(
    swap: &SwapManager<R, P>,
    tweaks: &TweakService<R>,
) -> Result<(), PresetError>
where
    R: CommandRunner,
    P: SpaceProbe,
{
    tracing::info!("Starting swap file resize...");
    let offered: Vec<u32> = swap
        .available_sizes()?
        .into_iter()
        .map(|option| option.size_gb)
        .collect();
    let size = recommended_swap_size(swap.settings(), &offered, swap.free_space()?);
    swap.change_size(size).await?;

    tracing::info!("Swap file resized, changing swappiness...");
    let swappiness = Tunable::Swappiness
        .recommended()
        .parse::<u32>()
        .map_err(|_| SwapError::ParseSwappiness(Tunable::Swappiness.recommended().to_string()))?;
    swap.change_swappiness(swappiness).await?;

    for tunable in Tunable::TWEAKS {
        tracing::info!("Enabling {}...", tunable.label());
        tweaks.enable(tunable).await?;
    }

    tracing::info!("All settings configured!");
    Ok(())
}

/// Return swap and every tweak to the stock configuration.
pub async fn apply_stock<R, P>(
    swap: &SwapManager<R, P>,
    tweaks: &TweakService<R>,
) -> Result<(), PresetError>
where
    R: CommandRunner,
    P: SpaceProbe,
{
    tracing::info!("Resizing swap file to {} GB...", swap.settings().default_size_gb);
    swap.change_size(swap.settings().default_size_gb).await?;

    tracing::info!("Swap file resized, changing swappiness...");
    let swappiness = Tunable::Swappiness
        .default_value()
        .parse::<u32>()
        .map_err(|_| SwapError::ParseSwappiness(Tunable::Swappiness.default_value().to_string()))?;
    swap.change_swappiness(swappiness).await?;

    for tunable in Tunable::TWEAKS {
        tracing::info!("Reverting {}...", tunable.label());
        tweaks.revert(tunable).await?;
    }

    tracing::info!("All settings reverted to default");
    Ok(())
}
