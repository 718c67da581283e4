//! Built-in effect catalog.
//!
//! Fragment programs are WGSL bodies compiled against a shared prelude that
//! the GPU backend prepends. The prelude provides:
//!
//! - `VsOut { pos, uv }` where `uv` spans the output surface in `[0, 1]`
//! - `u.resolution` (surface size in pixels) and `u.time` (seconds)
//! - `u.params[i]`, one `vec4<f32>` slot per declared parameter, in order
//! - `sample_input(uv)`, which samples the pass input through the crop rect
//!
//! Each program must keep the input alpha.

use crate::effect::{
    EffectCategory, EffectDescriptor, ParameterDescriptor, ParameterKind, ParameterValue,
    ShaderProgram,
};

/// Copies its input unchanged.
pub const PASS_THROUGH: ShaderProgram = ShaderProgram {
    entry: "pass-through",
    wgsl: r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return sample_input(in.uv);
}
"#,
};

const fn float(
    name: &'static str,
    label: &'static str,
    default: f32,
    min: f32,
    max: f32,
    step: f32,
) -> ParameterDescriptor {
    ParameterDescriptor {
        name,
        label,
        kind: ParameterKind::Float,
        default: ParameterValue::Float(default),
        min: Some(min),
        max: Some(max),
        step: Some(step),
    }
}

const GRAYSCALE_PARAMS: &[ParameterDescriptor] =
    &[float("intensity", "Intensity", 1.0, 0.0, 1.0, 0.01)];

const INVERT_PARAMS: &[ParameterDescriptor] = &[float("amount", "Amount", 1.0, 0.0, 1.0, 0.01)];

const SEPIA_PARAMS: &[ParameterDescriptor] = &[float("amount", "Amount", 1.0, 0.0, 1.0, 0.01)];

const BRIGHTNESS_CONTRAST_PARAMS: &[ParameterDescriptor] = &[
    float("brightness", "Brightness", 0.0, -1.0, 1.0, 0.01),
    float("contrast", "Contrast", 1.0, 0.0, 3.0, 0.01),
];

const BLUR_PARAMS: &[ParameterDescriptor] = &[float("radius", "Radius", 4.0, 0.0, 20.0, 1.0)];

const PIXELATE_PARAMS: &[ParameterDescriptor] = &[ParameterDescriptor {
    name: "size",
    label: "Block size",
    kind: ParameterKind::Int,
    default: ParameterValue::Int(8),
    min: Some(1.0),
    max: Some(64.0),
    step: Some(1.0),
}];

const VIGNETTE_PARAMS: &[ParameterDescriptor] = &[
    float("strength", "Strength", 0.5, 0.0, 1.0, 0.01),
    float("radius", "Radius", 0.75, 0.1, 1.5, 0.01),
];

const CHROMATIC_PARAMS: &[ParameterDescriptor] =
    &[float("offset", "Offset (px)", 4.0, 0.0, 20.0, 0.5)];

const WAVE_PARAMS: &[ParameterDescriptor] = &[
    float("amplitude", "Amplitude", 0.02, 0.0, 0.1, 0.001),
    float("frequency", "Frequency", 10.0, 0.0, 50.0, 0.5),
    float("speed", "Speed", 2.0, 0.0, 10.0, 0.1),
];

const TINT_PARAMS: &[ParameterDescriptor] = &[
    ParameterDescriptor {
        name: "color",
        label: "Color",
        kind: ParameterKind::Color,
        default: ParameterValue::Color([1.0, 0.8, 0.6]),
        min: None,
        max: None,
        step: None,
    },
    float("mix", "Mix", 0.5, 0.0, 1.0, 0.01),
    ParameterDescriptor {
        name: "preserve_luma",
        label: "Preserve luminance",
        kind: ParameterKind::Boolean,
        default: ParameterValue::Bool(false),
        min: None,
        max: None,
        step: None,
    },
];

const ENHANCE_PARAMS: &[ParameterDescriptor] =
    &[float("strength", "Strength", 0.5, 0.0, 1.0, 0.01)];

static EFFECTS: &[EffectDescriptor] = &[
    EffectDescriptor {
        id: "grayscale",
        name: "Grayscale",
        description: "Desaturate toward Rec. 601 luma.",
        category: EffectCategory::Simple,
        parameters: GRAYSCALE_PARAMS,
        shader: Some(ShaderProgram {
            entry: "grayscale",
            wgsl: r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let c = sample_input(in.uv);
    let luma = dot(c.rgb, vec3<f32>(0.299, 0.587, 0.114));
    return vec4<f32>(mix(c.rgb, vec3<f32>(luma), u.params[0].x), c.a);
}
"#,
        }),
    },
    EffectDescriptor {
        id: "invert",
        name: "Invert",
        description: "Invert colors.",
        category: EffectCategory::Simple,
        parameters: INVERT_PARAMS,
        shader: Some(ShaderProgram {
            entry: "invert",
            wgsl: r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let c = sample_input(in.uv);
    return vec4<f32>(mix(c.rgb, vec3<f32>(1.0) - c.rgb, u.params[0].x), c.a);
}
"#,
        }),
    },
    EffectDescriptor {
        id: "sepia",
        name: "Sepia",
        description: "Warm brown film tone.",
        category: EffectCategory::Simple,
        parameters: SEPIA_PARAMS,
        shader: Some(ShaderProgram {
            entry: "sepia",
            wgsl: r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let c = sample_input(in.uv);
    let toned = clamp(vec3<f32>(
        dot(c.rgb, vec3<f32>(0.393, 0.769, 0.189)),
        dot(c.rgb, vec3<f32>(0.349, 0.686, 0.168)),
        dot(c.rgb, vec3<f32>(0.272, 0.534, 0.131)),
    ), vec3<f32>(0.0), vec3<f32>(1.0));
    return vec4<f32>(mix(c.rgb, toned, u.params[0].x), c.a);
}
"#,
        }),
    },
    EffectDescriptor {
        id: "brightness-contrast",
        name: "Brightness / Contrast",
        description: "Linear brightness offset and contrast around mid-gray.",
        category: EffectCategory::Simple,
        parameters: BRIGHTNESS_CONTRAST_PARAMS,
        shader: Some(ShaderProgram {
            entry: "brightness-contrast",
            wgsl: r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let c = sample_input(in.uv);
    let adjusted = (c.rgb - vec3<f32>(0.5)) * u.params[1].x + vec3<f32>(0.5) + vec3<f32>(u.params[0].x);
    return vec4<f32>(clamp(adjusted, vec3<f32>(0.0), vec3<f32>(1.0)), c.a);
}
"#,
        }),
    },
    EffectDescriptor {
        id: "blur",
        name: "Box Blur",
        description: "Box blur; radius in pixels, 0 disables.",
        category: EffectCategory::Math,
        parameters: BLUR_PARAMS,
        shader: Some(ShaderProgram {
            entry: "blur",
            wgsl: r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let r = i32(round(u.params[0].x));
    let center = sample_input(in.uv);
    if (r <= 0) {
        return center;
    }
    let texel = vec2<f32>(1.0) / u.resolution;
    var acc = vec3<f32>(0.0);
    for (var dy = -r; dy <= r; dy = dy + 1) {
        for (var dx = -r; dx <= r; dx = dx + 1) {
            acc = acc + sample_input(in.uv + vec2<f32>(f32(dx), f32(dy)) * texel).rgb;
        }
    }
    let n = f32((2 * r + 1) * (2 * r + 1));
    return vec4<f32>(acc / n, center.a);
}
"#,
        }),
    },
    EffectDescriptor {
        id: "pixelate",
        name: "Pixelate",
        description: "Snap to square blocks.",
        category: EffectCategory::Math,
        parameters: PIXELATE_PARAMS,
        shader: Some(ShaderProgram {
            entry: "pixelate",
            wgsl: r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let block = max(round(u.params[0].x), 1.0);
    let px = floor(in.uv * u.resolution / block) * block + vec2<f32>(block * 0.5);
    return sample_input(min(px, u.resolution - vec2<f32>(0.5)) / u.resolution);
}
"#,
        }),
    },
    EffectDescriptor {
        id: "vignette",
        name: "Vignette",
        description: "Darken toward the corners.",
        category: EffectCategory::Simple,
        parameters: VIGNETTE_PARAMS,
        shader: Some(ShaderProgram {
            entry: "vignette",
            wgsl: r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let c = sample_input(in.uv);
    let radius = u.params[1].x;
    let dist = distance(in.uv, vec2<f32>(0.5)) * 1.41421356;
    let shade = 1.0 - u.params[0].x * smoothstep(radius * 0.5, radius, dist);
    return vec4<f32>(c.rgb * shade, c.a);
}
"#,
        }),
    },
    EffectDescriptor {
        id: "chromatic-aberration",
        name: "Chromatic Aberration",
        description: "Split red and blue channels horizontally.",
        category: EffectCategory::Math,
        parameters: CHROMATIC_PARAMS,
        shader: Some(ShaderProgram {
            entry: "chromatic-aberration",
            wgsl: r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let shift = vec2<f32>(u.params[0].x / u.resolution.x, 0.0);
    let c = sample_input(in.uv);
    let r = sample_input(in.uv + shift).r;
    let b = sample_input(in.uv - shift).b;
    return vec4<f32>(r, c.g, b, c.a);
}
"#,
        }),
    },
    EffectDescriptor {
        id: "wave",
        name: "Wave",
        description: "Animated horizontal sine displacement.",
        category: EffectCategory::Math,
        parameters: WAVE_PARAMS,
        shader: Some(ShaderProgram {
            entry: "wave",
            wgsl: r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let phase = in.uv.y * u.params[1].x + u.time * u.params[2].x;
    let uv = vec2<f32>(in.uv.x + u.params[0].x * sin(phase), in.uv.y);
    return sample_input(clamp(uv, vec2<f32>(0.0), vec2<f32>(1.0)));
}
"#,
        }),
    },
    EffectDescriptor {
        id: "tint",
        name: "Color Tint",
        description: "Multiply toward a tint color.",
        category: EffectCategory::Simple,
        parameters: TINT_PARAMS,
        shader: Some(ShaderProgram {
            entry: "tint",
            wgsl: r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let c = sample_input(in.uv);
    var tinted = c.rgb * u.params[0].xyz;
    if (u.params[2].x > 0.5) {
        let weights = vec3<f32>(0.299, 0.587, 0.114);
        let tl = dot(tinted, weights);
        if (tl > 0.0) {
            tinted = clamp(tinted * (dot(c.rgb, weights) / tl), vec3<f32>(0.0), vec3<f32>(1.0));
        }
    }
    return vec4<f32>(mix(c.rgb, tinted, u.params[1].x), c.a);
}
"#,
        }),
    },
    EffectDescriptor {
        id: "ai-enhance",
        name: "AI Enhance",
        description: "Needs an inference backend; renders as pass-through without one.",
        category: EffectCategory::Ai,
        parameters: ENHANCE_PARAMS,
        shader: None,
    },
];

/// All registered effects, in catalog order.
pub fn all() -> &'static [EffectDescriptor] {
    EFFECTS
}

pub fn find(id: &str) -> Option<&'static EffectDescriptor> {
    EFFECTS.iter().find(|e| e.id == id)
}

pub fn by_category(category: EffectCategory) -> impl Iterator<Item = &'static EffectDescriptor> {
    EFFECTS.iter().filter(move |e| e.category == category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_unique() {
        let ids: HashSet<_> = all().iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), all().len());
    }

    #[test]
    fn test_defaults_within_bounds() {
        for effect in all() {
            for param in effect.parameters {
                assert_eq!(
                    param.default.kind(),
                    param.kind,
                    "{}.{} default kind",
                    effect.id,
                    param.name
                );
                let v = param.default.as_f32();
                if let Some(min) = param.min {
                    assert!(v >= min, "{}.{} below min", effect.id, param.name);
                }
                if let Some(max) = param.max {
                    assert!(v <= max, "{}.{} above max", effect.id, param.name);
                }
            }
        }
    }

    #[test]
    fn test_programs_define_fs_main() {
        for effect in all() {
            if let Some(shader) = effect.shader {
                assert!(shader.wgsl.contains("fn fs_main"), "{}", effect.id);
                assert_eq!(shader.entry, effect.id);
            }
        }
        assert!(PASS_THROUGH.wgsl.contains("fn fs_main"));
    }

    #[test]
    fn test_parameter_slots_fit_uniform_block() {
        for effect in all() {
            assert!(effect.parameters.len() <= 8, "{}", effect.id);
        }
    }

    #[test]
    fn test_catalog_serializes_without_wgsl() {
        let json = serde_json::to_value(find("tint").unwrap()).unwrap();
        assert_eq!(json["category"], "simple");
        assert_eq!(json["parameters"][0]["kind"], "color");
        assert_eq!(json["shader"]["entry"], "tint");
        assert!(json["shader"].get("wgsl").is_none());
    }

    #[test]
    fn test_find_and_category() {
        assert_eq!(find("blur").map(|e| e.name), Some("Box Blur"));
        assert!(find("missing").is_none());
        assert_eq!(by_category(EffectCategory::Ai).count(), 1);
        assert!(by_category(EffectCategory::Math).any(|e| e.id == "wave"));
    }
}
