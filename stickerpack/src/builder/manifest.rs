//! Sticker grid manifest for the scaled platform.
//!
//! The manifest flattens the normalized layout, renames fields to the
//! client's vocabulary, sorts by landscape then portrait position and
//! renumbers both positions from 1:
//!
//! ```text
//! (ps_landscape, ps_portrait): (5,1) (5,0) (3,9)
//! sorted:                      (3,9) (5,0) (5,1)
//! renumbered:                  (1,1) (2,2) (3,3)
//! ```

use serde::{Deserialize, Serialize};

use crate::layout::NormalizedLayout;

/// Manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Columns of the sticker grid in portrait orientation.
pub const PORTRAIT_COLUMNS: u32 = 4;

/// Columns of the sticker grid in landscape orientation.
pub const LANDSCAPE_COLUMNS: u32 = 6;

/// File names the manifest is written under; both carry the same content.
pub const MANIFEST_FILES: [&str; 2] = ["settings.json", "settings_ipad.json"];

/// One sticker entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub sticker_id: String,
    pub ps_portrait: i64,
    pub ps_landscape: i64,
    pub used_columns: String,
    pub used_rows: String,
}

/// Per-package settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerManifest {
    pub version: u32,
    pub package_number: String,
    pub portrait_columns: u32,
    pub landscape_columns: u32,
    pub stickers: Vec<ManifestEntry>,
}

impl StickerManifest {
    pub fn from_layout(package_number: &str, layout: &NormalizedLayout) -> Self {
        let mut positioned: Vec<(i64, i64, &str, i64, i64)> = layout
            .placements()
            .map(|p| (p.start_y, p.start_x, p.name.as_str(), p.x_count, p.y_count))
            .collect();

        // stable: equal positions keep layout order
        positioned.sort_by_key(|&(landscape, portrait, ..)| (landscape, portrait));

        let stickers = positioned
            .into_iter()
            .enumerate()
            .map(|(index, (_, _, name, columns, rows))| {
                let position = index as i64 + 1;
                ManifestEntry {
                    sticker_id: name.to_string(),
                    ps_portrait: position,
                    ps_landscape: position,
                    used_columns: columns.to_string(),
                    used_rows: rows.to_string(),
                }
            })
            .collect();

        Self {
            version: MANIFEST_VERSION,
            package_number: package_number.to_string(),
            portrait_columns: PORTRAIT_COLUMNS,
            landscape_columns: LANDSCAPE_COLUMNS,
            stickers,
        }
    }
}
