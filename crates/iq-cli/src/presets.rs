//! Preset loading
//!
//! A presets file is a JSON map of preset name to a partial option set.
//! Explicit command-line flags always win over preset values; preset
//! values win over built-in defaults.
//!
//! ```json
//! {
//!   "fm-wide": {
//!     "output_rate": 250000.0,
//!     "lowpass": [100000.0],
//!     "dc_block": true
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use iq_core::config::AgcProfile;
use iq_core::formats::SampleFormat;

/// Partial option set a preset can carry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Preset {
    pub input_rate: Option<f64>,
    pub output_rate: Option<f64>,
    pub input_format: Option<SampleFormat>,
    pub output_format: Option<SampleFormat>,
    pub freq_shift: Option<f64>,
    pub post_freq_shift: Option<f64>,
    #[serde(default)]
    pub lowpass: Vec<f64>,
    #[serde(default)]
    pub highpass: Vec<f64>,
    #[serde(default)]
    pub passband: Vec<(f64, f64)>,
    #[serde(default)]
    pub stopband: Vec<(f64, f64)>,
    #[serde(default)]
    pub post_lowpass: Vec<f64>,
    #[serde(default)]
    pub post_highpass: Vec<f64>,
    #[serde(default)]
    pub post_passband: Vec<(f64, f64)>,
    #[serde(default)]
    pub post_stopband: Vec<(f64, f64)>,
    pub agc: Option<AgcProfile>,
    pub dc_block: Option<bool>,
    pub iq_correction: Option<bool>,
    pub attenuation_db: Option<f64>,
    pub transition_width: Option<f64>,
}

/// Load one named preset from a JSON presets file.
pub fn load_preset(path: &Path, name: &str) -> Result<Preset> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading presets file {}", path.display()))?;
    let mut presets: HashMap<String, Preset> = serde_json::from_str(&text)
        .with_context(|| format!("parsing presets file {}", path.display()))?;
    match presets.remove(name) {
        Some(preset) => Ok(preset),
        None => {
            let mut known: Vec<&str> = presets.keys().map(|k| k.as_str()).collect();
            known.sort_unstable();
            bail!(
                "preset '{name}' not found in {} (available: {})",
                path.display(),
                known.join(", ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn presets_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_named_preset() {
        let file = presets_file(
            r#"{
                "fm": {
                    "output_rate": 250000.0,
                    "lowpass": [100000.0],
                    "dc_block": true,
                    "agc": "local"
                },
                "bare": {}
            }"#,
        );
        let preset = load_preset(file.path(), "fm").unwrap();
        assert_eq!(preset.output_rate, Some(250_000.0));
        assert_eq!(preset.lowpass, vec![100_000.0]);
        assert_eq!(preset.dc_block, Some(true));
        assert_eq!(preset.agc, Some(AgcProfile::Local));
        assert!(preset.input_format.is_none());
    }

    #[test]
    fn test_missing_preset_lists_available() {
        let file = presets_file(r#"{"alpha": {}, "beta": {}}"#);
        let err = load_preset(file.path(), "gamma").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("gamma"));
        assert!(message.contains("alpha, beta"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let file = presets_file(r#"{"p": {"massive_gain": 11}}"#);
        assert!(load_preset(file.path(), "p").is_err());
    }
}
