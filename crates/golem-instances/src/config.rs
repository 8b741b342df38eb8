//! Tuning knobs for the instance manager, loadable from TOML with every
//! field optional.

use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest instance scale at or above which quads stay at full
    /// resolution (quad size 1).
    pub lod_scale_fine: f32,
    /// Scale at or above which quad size 2 is used; below it, 4.
    pub lod_scale_mid: f32,
    /// Shape regeneration delay after an edit or scale change, in ticks
    /// (45 ticks is roughly 750 ms at 60 Hz). Retriggering reschedules.
    pub shape_debounce_ticks: u64,
    /// An instance counts as on-screen if the culling pass reported it
    /// within this many ticks.
    pub visibility_ticks: u64,
    /// Quad sizes below this mark the entry's collision shape
    /// environmental rather than a convex hull.
    pub env_quad_threshold: u8,
    /// Writeback coalescing window, seconds per document.
    pub writeback_interval_secs: u64,
    /// Cube edge for a model created by an edit that arrives before any
    /// stored content.
    pub default_model_size: usize,
    /// Greedy-mesher quad extent cap, in cells.
    pub max_quad: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lod_scale_fine: 3.0,
            lod_scale_mid: 0.75,
            shape_debounce_ticks: 45,
            visibility_ticks: 30,
            env_quad_threshold: 2,
            writeback_interval_secs: 10,
            default_model_size: 32,
            max_quad: 32,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, Box<dyn Error>> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// Step table from the largest world-space instance scale to the
    /// mesher quad size: bigger on screen means finer quads.
    pub fn quad_size_for_scale(&self, max_scale: f32) -> u8 {
        if max_scale >= self.lod_scale_fine {
            1
        } else if max_scale >= self.lod_scale_mid {
            2
        } else {
            4
        }
    }
}
