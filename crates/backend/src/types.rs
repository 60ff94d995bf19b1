//! Request and asset types shared by all backends

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Output aspect ratios supported by every tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "16:9")]
    Wide,
}

impl AspectRatio {
    /// Ratio string as the generation APIs expect it.
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Tall => "9:16",
            AspectRatio::Wide => "16:9",
        }
    }

    /// Pixel dimensions (width, height) for backends that take explicit sizes.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            AspectRatio::Square => (1024, 1024),
            AspectRatio::Portrait => (768, 1024),
            AspectRatio::Landscape => (1024, 768),
            AspectRatio::Tall => (720, 1280),
            AspectRatio::Wide => (1280, 720),
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "1:1" => Ok(AspectRatio::Square),
            "3:4" => Ok(AspectRatio::Portrait),
            "4:3" => Ok(AspectRatio::Landscape),
            "9:16" => Ok(AspectRatio::Tall),
            "16:9" => Ok(AspectRatio::Wide),
            other => Err(format!("unsupported aspect ratio: {other}")),
        }
    }
}

/// Image bytes passed inline to a backend (e.g. the photo being adjusted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 (standard alphabet) encoded image bytes
    pub data: String,
}

/// Optional knobs for image generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageOptions {
    /// Source photo to edit instead of generating from scratch
    #[serde(default)]
    pub source_image: Option<InlineImage>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// What kind of output a request wants.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Image {
        aspect_ratio: AspectRatio,
        options: ImageOptions,
    },
    /// Text output; with a JSON schema the answer is parsed into a JSON value.
    Text { schema: Option<serde_json::Value> },
}

/// A single generation request, backend-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub kind: RequestKind,
}

impl GenerationRequest {
    pub fn image(prompt: impl Into<String>, aspect_ratio: AspectRatio, options: ImageOptions) -> Self {
        Self {
            prompt: prompt.into(),
            kind: RequestKind::Image {
                aspect_ratio,
                options,
            },
        }
    }

    pub fn text(prompt: impl Into<String>, schema: Option<serde_json::Value>) -> Self {
        Self {
            prompt: prompt.into(),
            kind: RequestKind::Text { schema },
        }
    }

    /// "image" or "text", for logs and metrics.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            RequestKind::Image { .. } => "image",
            RequestKind::Text { .. } => "text",
        }
    }
}

/// A fully materialized generation result.
#[derive(Debug, Clone, PartialEq)]
pub enum Asset {
    Image { mime_type: String, data: Vec<u8> },
    Text(String),
    Json(serde_json::Value),
}
