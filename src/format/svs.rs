//! Aperio SVS metadata.
//!
//! SVS files are pyramidal TIFFs whose first ImageDescription carries a
//! vendor header line followed by `|`-separated `key = value` pairs:
//!
//! ```text
//! Aperio Image Library v10.0.51
//! 46920x33014 [0,100 46000x32914] (256x256) JPEG/RGB Q=30|AppMag = 20|MPP = 0.4990
//! ```

use std::collections::HashMap;

/// Metadata parsed from an SVS ImageDescription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SvsMetadata {
    /// Microns per pixel at level 0
    pub mpp: Option<f64>,

    /// Objective magnification (e.g. 20, 40)
    pub magnification: Option<f64>,

    pub vendor: Option<String>,

    /// Every `key = value` pair, verbatim
    pub properties: HashMap<String, String>,
}

impl SvsMetadata {
    pub fn parse(description: &str) -> Self {
        let mut metadata = SvsMetadata::default();

        if description.contains("Aperio") {
            metadata.vendor = Some("Aperio".to_string());
        }

        for part in description.split('|') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "MPP" => metadata.mpp = value.parse::<f64>().ok().filter(|v| *v > 0.0),
                "AppMag" => metadata.magnification = value.parse::<f64>().ok(),
                _ => {}
            }

            metadata
                .properties
                .insert(key.to_string(), value.to_string());
        }

        metadata
    }
}
