use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer};
use serde::Deserialize;

/// Elements a composite scene may hold (one texture unit each).
pub const MAX_ELEMENTS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSetting {
    #[default]
    Auto,
    Primary,
    Gl,
    Headless,
}

impl BackendSetting {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "primary" | "vulkan" | "metal" | "dx12" | "webgpu" => Ok(Self::Primary),
            "gl" | "gles" | "webgl" | "webgl2" => Ok(Self::Gl),
            "headless" | "none" => Ok(Self::Headless),
            other => Err(format!(
                "invalid backend '{other}'; expected auto, primary, gl or headless"
            )),
        }
    }
}

/// MSAA policy as written in a scene or passed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntialiasSetting {
    Auto,
    Off,
    Samples2,
    Samples4,
    Samples8,
    Samples16,
}

impl AntialiasSetting {
    /// MSAA sample count, or `None` for `Auto`.
    pub fn samples(self) -> Option<u32> {
        match self {
            Self::Auto => None,
            Self::Off => Some(1),
            Self::Samples2 => Some(2),
            Self::Samples4 => Some(4),
            Self::Samples8 => Some(8),
            Self::Samples16 => Some(16),
        }
    }

    /// Accepts `auto`, `off`, a sample count (`0`/`1` mean off) or `samplesN`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "auto" | "max" | "default" => Ok(Self::Auto),
            "off" | "none" | "disable" | "disabled" | "0" | "1" => Ok(Self::Off),
            "2" | "samples2" => Ok(Self::Samples2),
            "4" | "samples4" => Ok(Self::Samples4),
            "8" | "samples8" => Ok(Self::Samples8),
            "16" | "samples16" => Ok(Self::Samples16),
            "" => Err("anti-alias mode must not be empty".to_string()),
            other => Err(format!(
                "invalid antialias setting '{other}'; use auto, off, 2, 4, 8 or 16"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlowEffectSetting {
    Cross,
    Ember,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneConfig {
    pub version: u32,
    #[serde(default)]
    pub backend: BackendSetting,
    #[serde(default, deserialize_with = "deserialize_antialias_opt")]
    pub antialias: Option<AntialiasSetting>,
    #[serde(default)]
    pub window: WindowSection,
    #[serde(default)]
    pub glow: Option<GlowSection>,
    #[serde(default)]
    pub composite: Option<CompositeSection>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WindowSection {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for WindowSection {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

/// Rectangle in logical window pixels, y measured from the top.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Region {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub centered: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GlowSection {
    pub effect: GlowEffectSetting,
    pub anchor: Region,
    #[serde(default)]
    pub offset: Option<[f32; 2]>,
    #[serde(default)]
    pub mouse: bool,
    #[serde(default)]
    pub vertex: Option<PathBuf>,
    #[serde(default)]
    pub fragment: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompositeSection {
    #[serde(default)]
    pub vertex: Option<PathBuf>,
    #[serde(default)]
    pub fragment: Option<PathBuf>,
    #[serde(default)]
    pub elements: Vec<CompositeElement>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompositeElement {
    pub image: PathBuf,
    #[serde(flatten)]
    pub region: Region,
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    800
}

fn default_title() -> String {
    "afterglow".to_string()
}

fn deserialize_antialias_opt<'de, D>(deserializer: D) -> Result<Option<AntialiasSetting>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Str(String),
        Num(i64),
    }

    let helper: Option<Helper> = Option::deserialize(deserializer)?;
    let result = match helper {
        None => None,
        Some(Helper::Str(raw)) => Some(AntialiasSetting::parse(&raw).map_err(de::Error::custom)?),
        Some(Helper::Num(value)) => {
            if value < 0 {
                return Err(de::Error::custom("antialias value must be non-negative"));
            }
            let raw = value.to_string();
            Some(AntialiasSetting::parse(&raw).map_err(de::Error::custom)?)
        }
    };
    Ok(result)
}

impl SceneConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: SceneConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads and validates a scene file, resolving relative paths against
    /// the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&input)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.resolve_paths(base);
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };

        if let Some(glow) = &mut self.glow {
            glow.vertex.iter_mut().for_each(resolve);
            glow.fragment.iter_mut().for_each(resolve);
        }
        if let Some(composite) = &mut self.composite {
            composite.vertex.iter_mut().for_each(resolve);
            composite.fragment.iter_mut().for_each(resolve);
            for element in &mut composite.elements {
                resolve(&mut element.image);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(
                "window width and height must be greater than zero".into(),
            ));
        }

        match (&self.glow, &self.composite) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "scene must define exactly one of [glow] or [composite], not both".into(),
                ));
            }
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "scene must define a [glow] or [composite] section".into(),
                ));
            }
            _ => {}
        }

        if let Some(glow) = &self.glow {
            validate_region("glow.anchor", &glow.anchor)?;
            if let Some([x, y]) = glow.offset {
                if !x.is_finite() || !y.is_finite() {
                    return Err(ConfigError::Invalid("glow.offset must be finite".into()));
                }
            }
        }

        if let Some(composite) = &self.composite {
            if composite.elements.is_empty() {
                return Err(ConfigError::Invalid(
                    "composite must contain at least one element".into(),
                ));
            }
            if composite.elements.len() > MAX_ELEMENTS {
                return Err(ConfigError::Invalid(format!(
                    "composite has {} elements; at most {MAX_ELEMENTS} are supported",
                    composite.elements.len()
                )));
            }
            for (index, element) in composite.elements.iter().enumerate() {
                if element.image.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "composite element {index} has an empty image path"
                    )));
                }
                validate_region(&format!("composite element {index}"), &element.region)?;
            }
        }

        Ok(())
    }
}

fn validate_region(name: &str, region: &Region) -> Result<(), ConfigError> {
    let values = [region.x, region.y, region.width, region.height];
    if values.iter().any(|value| !value.is_finite()) {
        return Err(ConfigError::Invalid(format!("{name} must use finite numbers")));
    }
    if region.width <= 0.0 || region.height <= 0.0 {
        return Err(ConfigError::Invalid(format!(
            "{name} width and height must be greater than zero"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GLOW: &str = r#"
version = 1
backend = "gl"
antialias = 4

[window]
width = 1600
title = "blog header"

[glow]
effect = "ember"
offset = [-30, 10]
mouse = true

[glow.anchor]
y = 120
width = 720
height = 400
centered = true
"#;

    #[test]
    fn parses_glow_scene() {
        let config = SceneConfig::from_toml_str(GLOW).expect("parse scene");
        assert_eq!(config.backend, BackendSetting::Gl);
        assert_eq!(config.antialias, Some(AntialiasSetting::Samples4));
        assert_eq!(config.window.width, 1600);
        assert_eq!(config.window.height, 800);
        let glow = config.glow.expect("glow section");
        assert_eq!(glow.effect, GlowEffectSetting::Ember);
        assert_eq!(glow.offset, Some([-30.0, 10.0]));
        assert!(glow.mouse);
        assert!(glow.anchor.centered);
        assert_eq!(glow.anchor.x, 0.0);
    }

    #[test]
    fn rejects_both_effects() {
        let scene = r#"
version = 1

[glow]
effect = "cross"
anchor = { width = 10, height = 10 }

[composite]
elements = [{ image = "a.png", width = 10, height = 10 }]
"#;
        let err = SceneConfig::from_toml_str(scene).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_missing_effect_and_bad_version() {
        let err = SceneConfig::from_toml_str("version = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SceneConfig::from_toml_str(
            "version = 2\n[glow]\neffect = \"cross\"\nanchor = { width = 1, height = 1 }\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("version 2"));
    }

    #[test]
    fn rejects_too_many_elements() {
        let mut scene = String::from("version = 1\n");
        for index in 0..=MAX_ELEMENTS {
            scene.push_str(&format!(
                "[[composite.elements]]\nimage = \"{index}.png\"\nwidth = 10\nheight = 10\n"
            ));
        }
        let err = SceneConfig::from_toml_str(&scene).unwrap_err();
        assert!(err.to_string().contains("at most 8"));
    }

    #[test]
    fn rejects_unknown_antialias() {
        let scene = "version = 1\nantialias = \"3\"\n[glow]\neffect = \"cross\"\nanchor = { width = 1, height = 1 }\n";
        let err = SceneConfig::from_toml_str(scene).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_resolves_relative_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scene.toml");
        std::fs::write(
            &path,
            r#"
version = 1

[composite]
fragment = "shaders/tint.frag"

[[composite.elements]]
image = "images/header.png"
x = 10
y = 20
width = 300
height = 120

[[composite.elements]]
image = "/abs/logo.png"
width = 64
height = 64
"#,
        )
        .expect("write scene");

        let config = SceneConfig::load(&path).expect("load scene");
        let composite = config.composite.expect("composite section");
        assert_eq!(
            composite.fragment.as_deref(),
            Some(dir.path().join("shaders/tint.frag").as_path())
        );
        assert_eq!(composite.elements[0].image, dir.path().join("images/header.png"));
        assert_eq!(composite.elements[0].region.x, 10.0);
        assert_eq!(composite.elements[1].image, PathBuf::from("/abs/logo.png"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = SceneConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("here.toml"));
    }

    #[test]
    fn backend_setting_parses_aliases() {
        assert_eq!(BackendSetting::parse("WebGL2"), Ok(BackendSetting::Gl));
        assert_eq!(BackendSetting::parse("vulkan"), Ok(BackendSetting::Primary));
        assert!(BackendSetting::parse("dx9").is_err());
    }

    #[test]
    fn antialias_words_match_scene_values() {
        let scene = "version = 1\nantialias = \"Samples8\"\n[glow]\neffect = \"cross\"\nanchor = { width = 1, height = 1 }\n";
        let config = SceneConfig::from_toml_str(scene).expect("parse scene");
        assert_eq!(config.antialias, Some(AntialiasSetting::Samples8));
        assert_eq!(AntialiasSetting::parse(" samples4 "), Ok(AntialiasSetting::Samples4));
        assert_eq!(AntialiasSetting::parse("1"), Ok(AntialiasSetting::Off));
        assert!(AntialiasSetting::parse("").is_err());
    }
}
