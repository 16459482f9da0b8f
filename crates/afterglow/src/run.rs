use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use renderer::{
    probe_backend, select_backend, Antialiasing, BackendPreference, BoxedTimeSource, CanvasMetrics,
    CompositeConfig, CompositeElement, EffectConfig, EffectHost, FixedTimeSource, FrameStatus,
    GlowConfig, GlowEffect, HeadlessBackend, Rect, RegionSpec, RenderBackend, Renderer,
    RendererConfig, ShaderOverrides, SteppedTimeSource,
};
use sceneconfig::{AntialiasSetting, BackendSetting, GlowEffectSetting, Region, SceneConfig};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::cli::{CheckArgs, ProbeArgs, SceneArgs};

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run(args: SceneArgs) -> Result<()> {
    let config = load_renderer_config(&args)?;
    tracing::info!(
        scene = %args.scene.display(),
        title = %config.title,
        "starting afterglow"
    );
    let mut renderer = Renderer::new(config);
    renderer.run()
}

pub fn check(args: CheckArgs) -> Result<()> {
    let config = load_renderer_config(&args.scene)?;
    let (width, height) = config.window_size;
    let metrics = CanvasMetrics::new(
        Rect::new(0.0, 0.0, f64::from(width), f64::from(height)),
        args.scale,
    );
    let clock: BoxedTimeSource = match args.time {
        Some(seconds) => Box::new(FixedTimeSource::new(seconds)),
        None => Box::new(SteppedTimeSource::new(1.0 / 60.0)),
    };

    let mut host = EffectHost::build(&config.effect, HeadlessBackend::default(), &metrics, clock)
        .context("failed to build scene")?;
    if host.is_degraded() {
        bail!("scene shaders failed to build; see the log for the compiler output");
    }
    if host.skipped_elements() > 0 {
        bail!(
            "{} composite element(s) could not be loaded",
            host.skipped_elements()
        );
    }

    host.start();
    let mut drawn = 0u32;
    for _ in 0..args.frames {
        match host.frame().context("frame failed")? {
            FrameStatus::Drawn(_) => drawn += 1,
            FrameStatus::Skipped => {}
            FrameStatus::Cancelled => break,
        }
    }

    let size = host.backend().surface_size();
    let instances = host
        .backend()
        .draws()
        .last()
        .map_or(0, |call| call.instances);
    host.teardown();

    println!(
        "{}: {} effect ok, drew {drawn}/{} frames at {}x{} ({instances} instance(s) per frame)",
        args.scene.scene.display(),
        effect_name(&config.effect),
        args.frames,
        size.width,
        size.height,
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct ProbeEntry {
    backend: &'static str,
    supported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    adapter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    api: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProbeOutput {
    backends: Vec<ProbeEntry>,
    selected: &'static str,
}

pub fn probe(args: ProbeArgs) -> Result<()> {
    let mut backends = Vec::new();
    let selected = select_backend(args.backend, |kind| {
        let report = probe_backend(kind);
        let supported = report.is_some();
        backends.push(ProbeEntry {
            backend: kind.as_str(),
            supported,
            adapter: report.as_ref().map(|report| report.adapter_name.clone()),
            api: report.as_ref().map(|report| report.adapter_backend.clone()),
            device_type: report.as_ref().map(|report| report.device_type.clone()),
        });
        supported
    });

    let output = ProbeOutput {
        backends,
        selected: selected.as_str(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for entry in &output.backends {
        match &entry.adapter {
            Some(adapter) => println!(
                "{:<8} supported  {adapter} ({}, {})",
                entry.backend,
                entry.api.as_deref().unwrap_or("?"),
                entry.device_type.as_deref().unwrap_or("?"),
            ),
            None => println!("{:<8} unavailable", entry.backend),
        }
    }
    println!("selected: {}", output.selected);
    Ok(())
}

fn load_renderer_config(args: &SceneArgs) -> Result<RendererConfig> {
    let scene = SceneConfig::load(&args.scene)
        .with_context(|| format!("failed to load scene {}", args.scene.display()))?;
    let mut config = renderer_config(&scene)?;
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(antialiasing) = args.antialias {
        config.antialiasing = antialiasing;
    }
    Ok(config)
}

/// Maps a validated scene onto the renderer's configuration, reading any
/// shader override files.
pub fn renderer_config(scene: &SceneConfig) -> Result<RendererConfig> {
    let effect = match (&scene.glow, &scene.composite) {
        (Some(glow), _) => EffectConfig::Glow(GlowConfig {
            effect: match glow.effect {
                GlowEffectSetting::Cross => GlowEffect::Cross,
                GlowEffectSetting::Ember => GlowEffect::Ember,
            },
            anchor: region_spec(&glow.anchor),
            offset: glow.offset,
            track_mouse: glow.mouse,
            shaders: read_overrides(glow.vertex.as_deref(), glow.fragment.as_deref())?,
        }),
        (None, Some(composite)) => EffectConfig::Composite(CompositeConfig {
            elements: composite
                .elements
                .iter()
                .map(|element| CompositeElement {
                    image: element.image.clone(),
                    region: region_spec(&element.region),
                })
                .collect(),
            shaders: read_overrides(composite.vertex.as_deref(), composite.fragment.as_deref())?,
        }),
        (None, None) => bail!("scene defines no effect"),
    };

    Ok(RendererConfig {
        window_size: (scene.window.width, scene.window.height),
        title: scene.window.title.clone(),
        antialiasing: scene.antialias.map_or(Antialiasing::Auto, antialiasing),
        backend: backend_preference(scene.backend),
        effect,
    })
}

pub fn backend_preference(setting: BackendSetting) -> BackendPreference {
    match setting {
        BackendSetting::Auto => BackendPreference::Auto,
        BackendSetting::Primary => BackendPreference::Primary,
        BackendSetting::Gl => BackendPreference::Gl,
        BackendSetting::Headless => BackendPreference::Headless,
    }
}

pub fn antialiasing(setting: AntialiasSetting) -> Antialiasing {
    match setting.samples() {
        None => Antialiasing::Auto,
        Some(1) => Antialiasing::Off,
        Some(samples) => Antialiasing::Samples(samples),
    }
}

fn region_spec(region: &Region) -> RegionSpec {
    RegionSpec {
        x: region.x,
        y: region.y,
        width: region.width,
        height: region.height,
        centered: region.centered,
    }
}

fn read_overrides(vertex: Option<&Path>, fragment: Option<&Path>) -> Result<ShaderOverrides> {
    let read = |path: Option<&Path>| -> Result<Option<String>> {
        path.map(|path| {
            fs::read_to_string(path)
                .with_context(|| format!("failed to read shader at {}", path.display()))
        })
        .transpose()
    };
    Ok(ShaderOverrides {
        vertex: read(vertex)?,
        fragment: read(fragment)?,
    })
}

fn effect_name(effect: &EffectConfig) -> &'static str {
    match effect {
        EffectConfig::Glow(glow) => match glow.effect {
            GlowEffect::Cross => "glow/cross",
            GlowEffect::Ember => "glow/ember",
        },
        EffectConfig::Composite(_) => "composite",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_glow_scene() {
        let scene = SceneConfig::from_toml_str(
            r#"
version = 1
backend = "headless"
antialias = "off"

[glow]
effect = "cross"
mouse = true
anchor = { x = 10, y = 20, width = 300, height = 200 }
"#,
        )
        .expect("scene");
        let config = renderer_config(&scene).expect("config");
        assert_eq!(config.backend, BackendPreference::Headless);
        assert_eq!(config.antialiasing, Antialiasing::Off);
        assert_eq!(config.window_size, (1280, 800));
        match config.effect {
            EffectConfig::Glow(glow) => {
                assert_eq!(glow.effect, GlowEffect::Cross);
                assert!(glow.track_mouse);
                assert_eq!(glow.anchor.width, 300.0);
                assert_eq!(glow.shaders, ShaderOverrides::default());
            }
            EffectConfig::Composite(_) => panic!("expected glow"),
        }
    }

    #[test]
    fn missing_override_is_an_error() {
        let mut scene = SceneConfig::from_toml_str(
            "version = 1\n[glow]\neffect = \"ember\"\nfragment = \"nope.frag\"\nanchor = { width = 1, height = 1 }\n",
        )
        .expect("scene");
        scene.resolve_paths(Path::new("/nonexistent"));
        let err = renderer_config(&scene).unwrap_err();
        assert!(format!("{err:#}").contains("nope.frag"));
    }

    #[test]
    fn sample_counts_map_to_antialiasing() {
        assert_eq!(antialiasing(AntialiasSetting::Auto), Antialiasing::Auto);
        assert_eq!(antialiasing(AntialiasSetting::Samples4), Antialiasing::Samples(4));
        assert_eq!(backend_preference(BackendSetting::Primary), BackendPreference::Primary);
        assert_eq!(renderer::BackendKind::Gl.as_str(), "gl");
    }
}
