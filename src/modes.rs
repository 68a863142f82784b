use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

static ASPECT_RATIOS: Lazy<HashMap<&'static str, AspectRatio>> = Lazy::new(|| {
    HashMap::from([
        ("1:1", AspectRatio { width: 1024, height: 1024 }),
        ("9:16", AspectRatio { width: 768, height: 1344 }),
    ])
});

pub fn aspect_ratio(label: &str) -> Option<AspectRatio> {
    ASPECT_RATIOS.get(label).copied()
}

pub const PROFILE_PICTURE_TOKEN: &str = "pfp";
pub const WALLPAPER_TOKEN: &str = "mobile";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    ProfilePicture,
    Wallpaper,
}

/// Selects which worker pool serves a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolId {
    ProfilePicture,
    Wallpaper,
}

/// Framing section of the variant instruction template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptFormat {
    CircularPortrait,
    TallWallpaper,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMode {
    pub mode: OutputMode,
    pub aspect_ratio: AspectRatio,
    pub pool: PoolId,
    pub display_name: &'static str,
    pub prompt_format: PromptFormat,
}

/// Maps a requested mode onto its geometry and pool.
///
/// Only `pfp` selects the profile-picture configuration; `mobile` and every
/// unrecognised value fall back to the wallpaper configuration.
pub fn resolve(mode: &str) -> ResolvedMode {
    if mode.trim().eq_ignore_ascii_case(PROFILE_PICTURE_TOKEN) {
        ResolvedMode {
            mode: OutputMode::ProfilePicture,
            aspect_ratio: ratio("1:1"),
            pool: PoolId::ProfilePicture,
            display_name: "Qwen (PFP)",
            prompt_format: PromptFormat::CircularPortrait,
        }
    } else {
        ResolvedMode {
            mode: OutputMode::Wallpaper,
            aspect_ratio: ratio("9:16"),
            pool: PoolId::Wallpaper,
            display_name: "SDXL (Mobile Wallpaper)",
            prompt_format: PromptFormat::TallWallpaper,
        }
    }
}

fn ratio(label: &str) -> AspectRatio {
    // Labels used here are all present in ASPECT_RATIOS.
    aspect_ratio(label).unwrap_or(AspectRatio {
        width: 1024,
        height: 1024,
    })
}
