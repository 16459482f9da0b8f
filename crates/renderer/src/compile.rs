//! GLSL program builder.
//!
//! Sources are parsed and validated with naga (the same front end `wgpu` uses
//! for `ShaderSource::Glsl`), so compile errors surface before any GPU object
//! exists and can be checked without a device. Linking pairs a vertex and a
//! fragment stage, checks that every fragment input is fed by the vertex stage,
//! and reflects the shared `std140` uniform block so uniforms can be written by
//! name.

use std::fmt;

use wgpu::naga;
use wgpu::naga::{AddressSpace, ArraySize, Binding, Handle, Module, ScalarKind, ShaderStage};
use wgpu::naga::{Type, TypeInner, VectorSize};

use crate::diagnostics::{self, LogKind};
use crate::error::RenderError;

/// Pipeline stage a shader source is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    fn naga(self) -> ShaderStage {
        match self {
            Self::Vertex => ShaderStage::Vertex,
            Self::Fragment => ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}

/// Shape of one uniform block member as far as the host needs to write it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    FloatArray { len: u32, stride: u32 },
    IntArray { len: u32, stride: u32 },
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformField {
    pub name: String,
    pub offset: u32,
    pub kind: UniformKind,
}

/// Reflected layout of the program's uniform block (set 0, binding 0).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UniformLayout {
    pub fields: Vec<UniformField>,
    pub size: u32,
}

impl UniformLayout {
    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InterfaceSlot {
    location: u32,
    ty: String,
}

/// A single parsed and validated stage.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    stage: Stage,
    source: String,
    inputs: Vec<InterfaceSlot>,
    outputs: Vec<InterfaceSlot>,
    uniforms: Option<UniformLayout>,
}

impl CompiledShader {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Linked vertex + fragment pair. Built once per effect and never relinked.
#[derive(Debug, Clone)]
pub struct Program {
    vertex: CompiledShader,
    fragment: CompiledShader,
    uniforms: UniformLayout,
}

impl Program {
    pub fn vertex_source(&self) -> &str {
        self.vertex.source()
    }

    pub fn fragment_source(&self) -> &str {
        self.fragment.source()
    }

    pub fn uniform_layout(&self) -> &UniformLayout {
        &self.uniforms
    }
}

pub fn compile(source: &str, stage: Stage) -> Result<CompiledShader, RenderError> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options::from(stage.naga());
    let module = frontend
        .parse(&options, source)
        .map_err(|errors| RenderError::Compile {
            stage,
            log: errors.emit_to_string(source),
        })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|error| RenderError::Compile {
            stage,
            log: error.emit_to_string(source),
        })?;

    let entry = module
        .entry_points
        .iter()
        .find(|entry| entry.name == "main" && entry.stage == stage.naga())
        .ok_or_else(|| RenderError::Compile {
            stage,
            log: format!("no `main` entry point for the {stage} stage"),
        })?;

    let mut inputs = Vec::new();
    for argument in &entry.function.arguments {
        collect_locations(&module, argument.ty, argument.binding.as_ref(), &mut inputs);
    }
    let mut outputs = Vec::new();
    if let Some(result) = &entry.function.result {
        collect_locations(&module, result.ty, result.binding.as_ref(), &mut outputs);
    }

    let uniforms = reflect_uniform_block(&module).map_err(|log| RenderError::Compile { stage, log })?;

    Ok(CompiledShader {
        stage,
        source: source.to_owned(),
        inputs,
        outputs,
        uniforms,
    })
}

pub fn link(vertex: &CompiledShader, fragment: &CompiledShader) -> Result<Program, RenderError> {
    if vertex.stage != Stage::Vertex || fragment.stage != Stage::Fragment {
        return Err(RenderError::Link(format!(
            "expected a vertex and a fragment stage, got {} and {}",
            vertex.stage, fragment.stage
        )));
    }

    for input in &fragment.inputs {
        match vertex.outputs.iter().find(|out| out.location == input.location) {
            None => {
                return Err(RenderError::Link(format!(
                    "fragment input at location {} is not written by the vertex stage",
                    input.location
                )))
            }
            Some(output) if output.ty != input.ty => {
                return Err(RenderError::Link(format!(
                    "location {} is {} in the vertex stage but {} in the fragment stage",
                    input.location, output.ty, input.ty
                )))
            }
            Some(_) => {}
        }
    }

    let uniforms = match (&vertex.uniforms, &fragment.uniforms) {
        (Some(a), Some(b)) if a != b => {
            return Err(RenderError::Link(
                "uniform block layout differs between the vertex and fragment stages".into(),
            ))
        }
        (Some(layout), _) | (None, Some(layout)) => layout.clone(),
        (None, None) => UniformLayout::default(),
    };

    Ok(Program {
        vertex: vertex.clone(),
        fragment: fragment.clone(),
        uniforms,
    })
}

/// Compiles and links a program, logging one ERROR entry on failure.
///
/// Failure is terminal for the effect that asked for the program: callers
/// treat `None` as "draw nothing".
pub fn build_program(vertex_source: &str, fragment_source: &str) -> Option<Program> {
    let result = compile(vertex_source, Stage::Vertex).and_then(|vertex| {
        compile(fragment_source, Stage::Fragment).and_then(|fragment| link(&vertex, &fragment))
    });
    match result {
        Ok(program) => {
            tracing::debug!(
                uniforms = program.uniforms.fields.len(),
                block_size = program.uniforms.size,
                "shader program linked"
            );
            Some(program)
        }
        Err(err) => {
            diagnostics::log(LogKind::Error, &err);
            None
        }
    }
}

fn collect_locations(
    module: &Module,
    ty: Handle<Type>,
    binding: Option<&Binding>,
    out: &mut Vec<InterfaceSlot>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => out.push(InterfaceSlot {
            location: *location,
            ty: format!("{:?}", module.types[ty].inner),
        }),
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

fn reflect_uniform_block(module: &Module) -> Result<Option<UniformLayout>, String> {
    let mut blocks = module
        .global_variables
        .iter()
        .filter(|(_, global)| global.space == AddressSpace::Uniform);

    let Some((_, global)) = blocks.next() else {
        return Ok(None);
    };
    if blocks.next().is_some() {
        return Err("only one uniform block is supported".into());
    }
    match &global.binding {
        Some(binding) if binding.group == 0 && binding.binding == 0 => {}
        _ => return Err("the uniform block must use set = 0, binding = 0".into()),
    }

    let TypeInner::Struct { members, span } = &module.types[global.ty].inner else {
        return Err("uniform must be declared as a block".into());
    };
    let fields = members
        .iter()
        .filter_map(|member| {
            member.name.as_ref().map(|name| UniformField {
                name: name.clone(),
                offset: member.offset,
                kind: uniform_kind(module, member.ty),
            })
        })
        .collect();

    Ok(Some(UniformLayout {
        fields,
        size: *span,
    }))
}

fn uniform_kind(module: &Module, ty: Handle<Type>) -> UniformKind {
    match &module.types[ty].inner {
        TypeInner::Scalar(scalar) => match scalar.kind {
            ScalarKind::Float => UniformKind::Float,
            ScalarKind::Sint | ScalarKind::Uint => UniformKind::Int,
            _ => UniformKind::Other,
        },
        TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => match size {
            VectorSize::Bi => UniformKind::Vec2,
            VectorSize::Tri => UniformKind::Vec3,
            VectorSize::Quad => UniformKind::Vec4,
        },
        TypeInner::Array {
            base,
            size: ArraySize::Constant(len),
            stride,
        } => match uniform_kind(module, *base) {
            UniformKind::Float => UniformKind::FloatArray {
                len: len.get(),
                stride: *stride,
            },
            UniformKind::Int => UniformKind::IntArray {
                len: len.get(),
                stride: *stride,
            },
            _ => UniformKind::Other,
        },
        _ => UniformKind::Other,
    }
}

/// Uniform names shared between the host and the shaders.
pub const U_RESOLUTION: &str = "uResolution";
pub const U_POS: &str = "uPos";
pub const U_TIME: &str = "uTime";
pub const U_MOUSE: &str = "uMouse";
pub const U_SAMPLERS: &str = "uSamplers";

macro_rules! glow_params {
    () => {
        r"layout(std140, set = 0, binding = 0) uniform GlowParams {
    vec2 uResolution;
    vec2 uPos;
    float uTime;
    vec2 uMouse;
} params;
"
    };
}

macro_rules! compositor_params {
    () => {
        r"layout(std140, set = 0, binding = 0) uniform CompositorParams {
    vec2 uResolution;
    vec2 uMouse;
    int uSamplers[8];
} params;
"
    };
}

/// Pass-through vertex stage for the full-screen triangle.
pub const FULLSCREEN_VERTEX: &str = r"#version 450
layout(location = 0) in vec2 aPos;

void main() {
    gl_Position = vec4(aPos, 0.0, 1.0);
}
";

/// Twin turbulence crosses anchored at `uPos` and its mirror image.
pub const CROSS_FRAGMENT: &str = concat!(
    r"#version 450
layout(location = 0) out vec4 fragColor;

",
    glow_params!(),
    r"
float ccross(vec2 fragCoord, vec2 offsetPos, vec4 sideLimits) {
    vec2 p = (fragCoord - offsetPos) / params.uResolution.y * 2.0;
    mat2 turn = mat2(6.0, -8.0, 5.0, 5.0) * (1.0 / 7.5);
    for (float i = 0.0; i < 11.0; i += 1.0) {
        p = vec2(p.x + sin(p.y + i + params.uTime * 0.09), p.y) * turn;
    }

    float pattern = sin(p.x * 0.9 + p.y * 0.1 + params.uTime * 0.01) * 0.1 + 0.16;
    vec2 rel = (fragCoord - offsetPos) / params.uResolution.y;
    float blend = 0.2 / (abs(rel.y) * abs(rel.x) * 90.0 + 0.001);
    blend *= pattern;

    blend *= smoothstep(sideLimits.x, 0.0, rel.x);
    blend *= 1.0 - smoothstep(0.0, sideLimits.y, rel.x);
    blend *= smoothstep(sideLimits.z, 0.0, rel.y);
    blend *= 1.0 - smoothstep(0.0, sideLimits.w, rel.y);
    return blend;
}

void main() {
    // Bottom-left origin so uPos keeps the y-up canvas convention.
    vec2 fragCoord = vec2(gl_FragCoord.x, params.uResolution.y - gl_FragCoord.y);
    vec2 oppositePos = params.uResolution - params.uPos;

    float blend1 = ccross(fragCoord, params.uPos, vec4(-0.4, 0.7, -0.7, 0.15));
    float blend2 = ccross(fragCoord, oppositePos, vec4(-0.7, 0.4, -0.15, 0.7));

    fragColor = vec4(vec3(max(blend1, blend2)), 1.0);
}
"
);

/// Warm noise-textured crosses; brightens slightly around the pointer.
pub const EMBER_FRAGMENT: &str = concat!(
    r"#version 450
layout(location = 0) out vec4 fragColor;

",
    glow_params!(),
    r"
float hash(vec2 n) {
    return fract(cos(dot(n, vec2(36.26, 73.12))) * 354.63);
}

float noise(vec2 n) {
    vec2 cell = floor(n);
    vec2 s = smoothstep(vec2(0.0), vec2(1.0), fract(n));
    float lower = mix(hash(cell), hash(cell + vec2(1.0, 0.0)), s.x);
    float upper = mix(hash(cell + vec2(0.0, 1.0)), hash(cell + vec2(1.0)), s.x);
    return mix(lower, upper, s.y);
}

float vnoise(vec2 n) {
    return noise(n / 32.0) * 0.5875 + noise(n / 16.0) * 0.2 + noise(n / 8.0) * 0.1
        + noise(n / 4.0) * 0.05 + noise(n / 2.0) * 0.025 + noise(n) * 0.0125;
}

void main() {
    vec2 fragCoord = vec2(gl_FragCoord.x, params.uResolution.y - gl_FragCoord.y);
    vec2 p = (fragCoord - params.uPos) / params.uResolution.y * 2.0;
    mat2 turn = mat2(9.0, -8.0, 0.6, 8.0) * (1.0 / 7.3);
    for (float i = 0.0; i < 11.0; i += 1.0) {
        p = vec2(p.x + sin(p.y + i + params.uTime * 0.02), p.y) * turn;
    }
    float pat = smoothstep(0.2, 0.6, vnoise(p * 23.5 + vec2(params.uTime * 0.005)) * 0.25 + 0.09);

    vec2 a = (fragCoord - params.uPos) / params.uResolution.y;
    vec2 b = (fragCoord - (params.uResolution - params.uPos)) / params.uResolution.y;
    float m = abs(a.x) * abs(b.x) * abs(a.y) * abs(b.y) * 90.0 + 0.001;
    float ma = 0.09 / m * pat
        * smoothstep(-0.4, 0.0, a.x) * (1.0 - smoothstep(0.0, 1.1, a.x))
        * smoothstep(-0.7, 0.0, a.y) * (1.0 - smoothstep(0.0, 0.19, a.y));
    float mb = 0.09 / m * pat
        * smoothstep(-1.1, 0.0, b.x) * (1.0 - smoothstep(0.0, 0.4, b.x))
        * smoothstep(-0.19, 0.0, b.y) * (1.0 - smoothstep(0.0, 0.7, b.y));

    vec2 ndc = fragCoord / params.uResolution * 2.0 - vec2(1.0);
    float warmth = 1.0 + 0.15 * (1.0 - smoothstep(0.0, 0.6, distance(ndc, params.uMouse)));

    vec3 tint = vec3(1.0, 0.85, 0.6) * warmth;
    fragColor = vec4(tint * ma + tint * mb, max(ma, mb));
}
"
);

/// Places each instance's unit quad at its canvas-space rectangle.
pub const COMPOSITOR_VERTEX: &str = concat!(
    r"#version 450
layout(location = 0) in vec2 aQuad;
layout(location = 1) in vec2 aSize;
layout(location = 2) in vec2 aPos;
layout(location = 3) in float aTexUnit;

layout(location = 0) out vec2 vUv;
layout(location = 1) flat out float vTexUnit;

",
    compositor_params!(),
    r"
void main() {
    // aPos is the top-left corner measured from the canvas bottom.
    vec2 pixel = vec2(aPos.x + aQuad.x * aSize.x, aPos.y - aSize.y + aQuad.y * aSize.y);
    vec2 clip = pixel / params.uResolution * 2.0 - vec2(1.0);
    vUv = aQuad;
    vTexUnit = aTexUnit;
    gl_Position = vec4(clip, 0.0, 1.0);
}
"
);

/// Samples the texture unit selected through `uSamplers`.
pub const COMPOSITOR_FRAGMENT: &str = concat!(
    r"#version 450
layout(location = 0) in vec2 vUv;
layout(location = 1) flat in float vTexUnit;
layout(location = 0) out vec4 fragColor;

",
    compositor_params!(),
    r"
layout(set = 1, binding = 0) uniform texture2D uTexture0;
layout(set = 1, binding = 1) uniform texture2D uTexture1;
layout(set = 1, binding = 2) uniform texture2D uTexture2;
layout(set = 1, binding = 3) uniform texture2D uTexture3;
layout(set = 1, binding = 4) uniform texture2D uTexture4;
layout(set = 1, binding = 5) uniform texture2D uTexture5;
layout(set = 1, binding = 6) uniform texture2D uTexture6;
layout(set = 1, binding = 7) uniform texture2D uTexture7;
layout(set = 1, binding = 8) uniform sampler uSampler;

// Explicit LOD keeps sampling legal inside the per-unit branches.
vec4 sampleUnit(int unit, vec2 uv) {
    if (unit == 0) { return textureLod(sampler2D(uTexture0, uSampler), uv, 0.0); }
    if (unit == 1) { return textureLod(sampler2D(uTexture1, uSampler), uv, 0.0); }
    if (unit == 2) { return textureLod(sampler2D(uTexture2, uSampler), uv, 0.0); }
    if (unit == 3) { return textureLod(sampler2D(uTexture3, uSampler), uv, 0.0); }
    if (unit == 4) { return textureLod(sampler2D(uTexture4, uSampler), uv, 0.0); }
    if (unit == 5) { return textureLod(sampler2D(uTexture5, uSampler), uv, 0.0); }
    if (unit == 6) { return textureLod(sampler2D(uTexture6, uSampler), uv, 0.0); }
    if (unit == 7) { return textureLod(sampler2D(uTexture7, uSampler), uv, 0.0); }
    return vec4(0.0);
}

void main() {
    int unit = params.uSamplers[int(vTexUnit + 0.5)];
    fragColor = sampleUnit(unit, vUv);
}
"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::capture::{errors, with_captured};

    const BROKEN_FRAGMENT: &str = r"#version 450
layout(location = 0) out vec4 fragColor;

void main() {
    fragColor = vec4(1.0, 0.0, 0.0, 1.0)
}
";

    #[test]
    fn builtin_glow_programs_link() {
        for fragment in [CROSS_FRAGMENT, EMBER_FRAGMENT] {
            let program = build_program(FULLSCREEN_VERTEX, fragment).expect("glow program");
            let layout = program.uniform_layout();
            assert_eq!(layout.field(U_RESOLUTION).map(|f| f.offset), Some(0));
            assert_eq!(layout.field(U_POS).map(|f| f.offset), Some(8));
            assert_eq!(layout.field(U_TIME).map(|f| f.kind), Some(UniformKind::Float));
            assert_eq!(layout.field(U_MOUSE).map(|f| f.kind), Some(UniformKind::Vec2));
        }
    }

    #[test]
    fn compositor_program_reflects_sampler_array() {
        let program = build_program(COMPOSITOR_VERTEX, COMPOSITOR_FRAGMENT).expect("compositor");
        let samplers = program.uniform_layout().field(U_SAMPLERS).expect("uSamplers");
        match samplers.kind {
            UniformKind::IntArray { len, stride } => {
                assert_eq!(len, 8);
                assert_eq!(stride % 16, 0, "std140 arrays use vec4 strides");
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert!(program.uniform_layout().size >= samplers.offset + 8 * 16);
    }

    #[test]
    fn syntax_error_logs_once_with_diagnostic() {
        let diagnostic = match compile(BROKEN_FRAGMENT, Stage::Fragment) {
            Err(RenderError::Compile { log, .. }) => log,
            other => panic!("expected a compile error, got {other:?}"),
        };
        assert!(!diagnostic.is_empty());

        let (program, events) = with_captured(|| build_program(FULLSCREEN_VERTEX, BROKEN_FRAGMENT));
        assert!(program.is_none());
        let errors = errors(&events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains(&diagnostic));
    }

    #[test]
    fn link_rejects_unfed_fragment_input() {
        let fragment = r"#version 450
layout(location = 0) in vec2 vUv;
layout(location = 0) out vec4 fragColor;

void main() {
    fragColor = vec4(vUv, 0.0, 1.0);
}
";
        let vertex = compile(FULLSCREEN_VERTEX, Stage::Vertex).expect("vertex");
        let fragment = compile(fragment, Stage::Fragment).expect("fragment");
        assert!(matches!(link(&vertex, &fragment), Err(RenderError::Link(_))));
    }

    #[test]
    fn link_rejects_mismatched_blocks() {
        let vertex = r"#version 450
layout(location = 0) in vec2 aPos;
layout(std140, set = 0, binding = 0) uniform Params {
    vec2 uResolution;
} params;

void main() {
    gl_Position = vec4(aPos / params.uResolution, 0.0, 1.0);
}
";
        let vertex = compile(vertex, Stage::Vertex).expect("vertex");
        let fragment = compile(CROSS_FRAGMENT, Stage::Fragment).expect("fragment");
        assert!(matches!(link(&vertex, &fragment), Err(RenderError::Link(_))));
    }

    #[test]
    fn block_outside_set_zero_is_rejected() {
        let fragment = r"#version 450
layout(location = 0) out vec4 fragColor;
layout(std140, set = 2, binding = 0) uniform Params {
    float uTime;
} params;

void main() {
    fragColor = vec4(params.uTime);
}
";
        assert!(matches!(
            compile(fragment, Stage::Fragment),
            Err(RenderError::Compile { .. })
        ));
    }
}
