use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use renderer::{Antialiasing, BackendPreference};

#[derive(Parser, Debug)]
#[command(
    name = "afterglow",
    author,
    version,
    about = "Animated glow shaders and texture compositing on wgpu"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a window and render the scene until it is closed.
    Run(SceneArgs),
    /// Build the scene against the headless backend and tick a few frames.
    Check(CheckArgs),
    /// Report which GPU backends can create a device.
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
pub struct SceneArgs {
    /// Scene description (TOML).
    #[arg(value_name = "SCENE")]
    pub scene: PathBuf,

    /// Backend preference: `auto`, `primary`, `gl`, or `headless` (overrides the scene).
    #[arg(long, value_name = "BACKEND", value_parser = parse_backend)]
    pub backend: Option<BackendPreference>,

    /// Anti-aliasing policy: `auto`, `off`, or an MSAA sample count (`4` or `samples4`).
    #[arg(long, value_name = "MODE", value_parser = parse_antialias)]
    pub antialias: Option<Antialiasing>,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub scene: SceneArgs,

    /// Number of frames to tick.
    #[arg(long, value_name = "N", default_value_t = 60)]
    pub frames: u32,

    /// Evaluate every frame at this time (seconds) instead of stepping at 60 Hz.
    #[arg(long, value_name = "SECONDS")]
    pub time: Option<f32>,

    /// Device pixel ratio used to size the canvas.
    #[arg(long, value_name = "RATIO", default_value_t = 1.0)]
    pub scale: f64,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Emit the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Only walk the fallback chain from this preference.
    #[arg(long, value_name = "BACKEND", value_parser = parse_backend, default_value = "auto")]
    pub backend: BackendPreference,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_antialias(value: &str) -> Result<Antialiasing, String> {
    let setting = sceneconfig::AntialiasSetting::parse(value)?;
    Ok(crate::run::antialiasing(setting))
}

pub fn parse_backend(value: &str) -> Result<BackendPreference, String> {
    let setting = sceneconfig::BackendSetting::parse(value)?;
    Ok(crate::run::backend_preference(setting))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_antialias_modes() {
        assert_eq!(parse_antialias("AUTO").unwrap(), Antialiasing::Auto);
        assert_eq!(parse_antialias("1").unwrap(), Antialiasing::Off);
        assert_eq!(parse_antialias("8").unwrap(), Antialiasing::Samples(8));
        assert!(parse_antialias("3").is_err());
        assert!(parse_antialias(" ").is_err());
    }

    #[test]
    fn antialias_flag_accepts_scene_words() {
        for word in ["auto", "off", "none", "0", "1", "2", "samples2", "4", "samples4", "8", "samples16"] {
            let scene = sceneconfig::SceneConfig::from_toml_str(&format!(
                "version = 1\nantialias = \"{word}\"\n[glow]\neffect = \"cross\"\nanchor = {{ width = 1, height = 1 }}\n"
            ))
            .expect("scene accepts word");
            let from_scene = crate::run::renderer_config(&scene).expect("config").antialiasing;
            assert_eq!(parse_antialias(word), Ok(from_scene), "word {word}");
        }
        assert_eq!(parse_antialias("samples4"), Ok(Antialiasing::Samples(4)));
    }

    #[test]
    fn parses_backend_names() {
        assert_eq!(parse_backend("gl").unwrap(), BackendPreference::Gl);
        assert_eq!(parse_backend("headless").unwrap(), BackendPreference::Headless);
        assert!(parse_backend("software").is_err());
    }

    #[test]
    fn check_defaults() {
        let cli = Cli::try_parse_from(["afterglow", "check", "scene.toml"]).expect("parse");
        match cli.command {
            Command::Check(args) => {
                assert_eq!(args.frames, 60);
                assert_eq!(args.scale, 1.0);
                assert!(args.time.is_none());
                assert!(args.scene.backend.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
