//! Sticker layout model and coordinate normalization.
//!
//! A layout is authored as an ordered list of box groups. Each group is one
//! vertically stacked editing region whose coordinates include a fixed
//! header of [`GROUP_HEADER_ROWS`] rows, so group `i` must be shifted up by
//! `GROUP_HEADER_ROWS * i` to land on one continuous grid.
//!
//! Normalization is expressed in the type system: [`Layout::normalize`]
//! produces a [`NormalizedLayout`], which cannot be normalized again. A
//! serialized normalized layout is tagged with `"normalized": true` and is
//! rejected if fed back in as a raw layout.
//!
//! # Example
//!
//! ```
//! use stickerpack::layout::Layout;
//!
//! let layout = Layout::from_json(r#"[
//!     {"name": "top", "stickers": [{"name": "cat", "startX": 0, "startY": 4, "xCount": 1, "yCount": 1}]},
//!     {"name": "bottom", "stickers": [{"name": "dog", "startX": 1, "startY": "9", "xCount": 2, "yCount": 1}]}
//! ]"#).unwrap();
//!
//! let normalized = layout.normalize();
//! let ys: Vec<i64> = normalized.placements().map(|p| p.start_y).collect();
//! assert_eq!(ys, vec![4, 5]);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Rows of header baked into every box group's authored coordinates.
pub const GROUP_HEADER_ROWS: i64 = 4;

/// Asset stems every package must provide in addition to its stickers.
pub const FIXED_ASSETS: [&str; 5] = ["icon", "unavailable_icon", "avatar", "preview", "banner"];

/// File stems the scaled platform gives the avatar and the icon.
pub const RESERVED_STICKER_NAMES: [&str; 2] = ["bucket_icon", "avatar_small"];

/// Why a layout was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// A placement has a blank name.
    UnnamedSticker { group: usize },
    /// A name contains a path separator.
    PathInName { name: String },
    /// A footprint is smaller than one cell.
    EmptyFootprint { name: String, x_count: i64, y_count: i64 },
    /// A sticker would overwrite files generated for a fixed asset.
    ReservedName { name: String },
    /// The document carries the normalized marker.
    AlreadyNormalized,
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::UnnamedSticker { group } => {
                write!(f, "box group {} has a sticker without a name", group)
            }
            LayoutError::PathInName { name } => {
                write!(f, "sticker name '{}' contains a path separator", name)
            }
            LayoutError::EmptyFootprint {
                name,
                x_count,
                y_count,
            } => write!(f, "sticker '{}' has an empty footprint {}x{}", name, x_count, y_count),
            LayoutError::ReservedName { name } => write!(
                f,
                "sticker name '{}' collides with generated banner, preview or icon files",
                name
            ),
            LayoutError::AlreadyNormalized => f.write_str("layout has already been normalized"),
        }
    }
}

impl std::error::Error for LayoutError {}

impl From<LayoutError> for PipelineError {
    fn from(e: LayoutError) -> Self {
        PipelineError::invalid_layout(e.to_string())
    }
}

/// Whether a sticker with this name would be written over another asset's
/// output.
///
/// Names containing `banner` or `preview` are rendered under the fixed
/// banner and preview file names; the reserved stems are the avatar and
/// icon renames. The fixed assets themselves are the same source file and
/// stay allowed.
fn is_reserved_sticker_name(name: &str) -> bool {
    if FIXED_ASSETS.contains(&name) {
        return false;
    }
    RESERVED_STICKER_NAMES.contains(&name) || name.contains("banner") || name.contains("preview")
}

/// One sticker's placement on the layout grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickerPlacement {
    /// Source file stem.
    pub name: String,
    #[serde(deserialize_with = "int_or_string")]
    pub start_x: i64,
    #[serde(deserialize_with = "int_or_string")]
    pub start_y: i64,
    /// Footprint width in grid cells.
    #[serde(deserialize_with = "int_or_string")]
    pub x_count: i64,
    /// Footprint height in grid cells.
    #[serde(deserialize_with = "int_or_string")]
    pub y_count: i64,
}

impl StickerPlacement {
    pub fn new(name: impl Into<String>, start_x: i64, start_y: i64, x_count: i64, y_count: i64) -> Self {
        Self {
            name: name.into(),
            start_x,
            start_y,
            x_count,
            y_count,
        }
    }
}

/// One authored layout region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxGroup {
    pub name: String,
    #[serde(alias = "boxes")]
    pub stickers: Vec<StickerPlacement>,
}

impl BoxGroup {
    pub fn new(name: impl Into<String>, stickers: Vec<StickerPlacement>) -> Self {
        Self {
            name: name.into(),
            stickers,
        }
    }
}

/// Raw, authoritative layout as authored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LayoutDocument", into = "Vec<BoxGroup>")]
pub struct Layout {
    groups: Vec<BoxGroup>,
}

/// Layout after the per-group vertical offset correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedLayout {
    normalized: bool,
    groups: Vec<BoxGroup>,
}

/// Accepted wire shapes for a raw layout.
#[derive(Deserialize)]
#[serde(untagged)]
enum LayoutDocument {
    Groups(Vec<BoxGroup>),
    Tagged {
        #[serde(default)]
        normalized: bool,
        groups: Vec<BoxGroup>,
    },
}

impl TryFrom<LayoutDocument> for Layout {
    type Error = LayoutError;

    fn try_from(doc: LayoutDocument) -> Result<Self, Self::Error> {
        let groups = match doc {
            LayoutDocument::Groups(groups) => groups,
            LayoutDocument::Tagged {
                normalized: true, ..
            } => {
                return Err(LayoutError::AlreadyNormalized);
            }
            LayoutDocument::Tagged { groups, .. } => groups,
        };
        Layout::new(groups)
    }
}

impl From<Layout> for Vec<BoxGroup> {
    fn from(layout: Layout) -> Self {
        layout.groups
    }
}

impl Layout {
    /// Build a layout, validating every placement.
    pub fn new(groups: Vec<BoxGroup>) -> Result<Self, LayoutError> {
        for (index, group) in groups.iter().enumerate() {
            for placement in &group.stickers {
                let name = &placement.name;
                if name.trim().is_empty() {
                    return Err(LayoutError::UnnamedSticker { group: index });
                }
                if name.contains('/') || name.contains('\\') {
                    return Err(LayoutError::PathInName { name: name.clone() });
                }
                if placement.x_count < 1 || placement.y_count < 1 {
                    return Err(LayoutError::EmptyFootprint {
                        name: name.clone(),
                        x_count: placement.x_count,
                        y_count: placement.y_count,
                    });
                }
                if is_reserved_sticker_name(name) {
                    return Err(LayoutError::ReservedName { name: name.clone() });
                }
            }
        }
        Ok(Self { groups })
    }

    /// Parse a raw layout from its JSON document.
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        serde_json::from_str(json).map_err(|e| PipelineError::invalid_layout(e.to_string()))
    }

    pub fn groups(&self) -> &[BoxGroup] {
        &self.groups
    }

    /// Apply the per-group vertical offset correction.
    ///
    /// Placement `p` in group `i` gets `start_y = p.start_y - 4 * i`.
    pub fn normalize(&self) -> NormalizedLayout {
        let groups = self
            .groups
            .iter()
            .enumerate()
            .map(|(index, group)| {
                let offset = GROUP_HEADER_ROWS * index as i64;
                BoxGroup {
                    name: group.name.clone(),
                    stickers: group
                        .stickers
                        .iter()
                        .map(|p| StickerPlacement {
                            start_y: p.start_y - offset,
                            ..p.clone()
                        })
                        .collect(),
                }
            })
            .collect();

        NormalizedLayout {
            normalized: true,
            groups,
        }
    }

    /// Every asset stem a build of this layout needs.
    pub fn required_manifest(&self) -> AssetManifest {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        let stickers = self
            .groups
            .iter()
            .flat_map(|g| g.stickers.iter().map(|p| p.name.as_str()));

        for name in FIXED_ASSETS.into_iter().chain(stickers) {
            if seen.insert(name) {
                names.push(name.to_string());
            }
        }
        AssetManifest { names }
    }
}

impl NormalizedLayout {
    pub fn groups(&self) -> &[BoxGroup] {
        &self.groups
    }

    /// All placements in group order.
    pub fn placements(&self) -> impl Iterator<Item = &StickerPlacement> {
        self.groups.iter().flat_map(|g| g.stickers.iter())
    }

    pub fn sticker_count(&self) -> usize {
        self.groups.iter().map(|g| g.stickers.len()).sum()
    }

    /// Serialize with the `normalized` marker.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// The de-duplicated checklist of asset stems a build requires.
///
/// Fixed assets come first in canonical order, then sticker names in
/// first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    names: Vec<String>,
}

impl AssetManifest {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Names absent from `assets`, in manifest order.
    pub fn missing_from<V>(&self, assets: &HashMap<String, V>) -> Vec<String> {
        self.names
            .iter()
            .filter(|name| !assets.contains_key(name.as_str()))
            .cloned()
            .collect()
    }
}

fn int_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Str(String),
    }

    match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(v) => Ok(v),
        IntOrString::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected integer, got '{}'", s))),
    }
}
