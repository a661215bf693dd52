//! Configuration file format detection.

use std::path::Path;

/// Supported configuration formats.
///
/// The format is detected from the file extension when registering a
/// watch or loading a file. An explicit format name overrides detection;
/// the literal `"auto"` means "detect from the path".
///
/// # Example
///
/// ```
/// use argus::ConfigFormat;
/// use std::path::Path;
///
/// assert_eq!(ConfigFormat::from_path(Path::new("app.json")), ConfigFormat::Json);
/// assert_eq!(ConfigFormat::from_path(Path::new("app.yml")), ConfigFormat::Yaml);
/// assert_eq!(ConfigFormat::from_path(Path::new("app.data")), ConfigFormat::Unknown);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConfigFormat {
    /// JSON (`.json`).
    Json,
    /// YAML (`.yaml`, `.yml`).
    Yaml,
    /// TOML (`.toml`).
    Toml,
    /// HCL (`.hcl`, `.tf`).
    Hcl,
    /// INI (`.ini`, `.conf`, `.cfg`).
    Ini,
    /// Java-style properties (`.properties`).
    Properties,
    /// Unrecognized extension.
    Unknown,
}

impl ConfigFormat {
    /// Detects the format from the lowercased final extension.
    ///
    /// Detection is O(extension length) and does not allocate.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return ConfigFormat::Unknown;
        };

        if ext.eq_ignore_ascii_case("json") {
            ConfigFormat::Json
        } else if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") {
            ConfigFormat::Yaml
        } else if ext.eq_ignore_ascii_case("toml") {
            ConfigFormat::Toml
        } else if ext.eq_ignore_ascii_case("hcl") || ext.eq_ignore_ascii_case("tf") {
            ConfigFormat::Hcl
        } else if ext.eq_ignore_ascii_case("ini")
            || ext.eq_ignore_ascii_case("conf")
            || ext.eq_ignore_ascii_case("cfg")
        {
            ConfigFormat::Ini
        } else if ext.eq_ignore_ascii_case("properties") {
            ConfigFormat::Properties
        } else {
            ConfigFormat::Unknown
        }
    }

    /// Maps an explicit format name to a tag.
    ///
    /// Returns `None` for the literal `"auto"`, which means "detect from
    /// the path"; unrecognized names map to [`ConfigFormat::Unknown`].
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let trimmed = name.trim();
        if trimmed.eq_ignore_ascii_case("auto") {
            return None;
        }

        Some(match trimmed.to_ascii_lowercase().as_str() {
            "json" => ConfigFormat::Json,
            "yaml" | "yml" => ConfigFormat::Yaml,
            "toml" => ConfigFormat::Toml,
            "hcl" | "tf" => ConfigFormat::Hcl,
            "ini" | "conf" | "cfg" => ConfigFormat::Ini,
            "properties" => ConfigFormat::Properties,
            _ => ConfigFormat::Unknown,
        })
    }

    /// Resolves an explicit name against a path, honoring `"auto"`.
    #[must_use]
    pub fn resolve(name: &str, path: &Path) -> Self {
        ConfigFormat::from_name(name).unwrap_or_else(|| ConfigFormat::from_path(path))
    }

    /// Format name for error messages and audit records.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "JSON",
            ConfigFormat::Yaml => "YAML",
            ConfigFormat::Toml => "TOML",
            ConfigFormat::Hcl => "HCL",
            ConfigFormat::Ini => "INI",
            ConfigFormat::Properties => "Properties",
            ConfigFormat::Unknown => "unknown",
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
