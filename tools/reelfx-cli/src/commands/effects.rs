//! List the built-in effect registry.

use reelfx_effect_model::{registry, EffectCategory, ParameterValue};

pub fn run(category: Option<String>, json: bool) -> anyhow::Result<()> {
    let filter = category.as_deref().map(parse_category).transpose()?;
    let effects: Vec<_> = registry::all()
        .iter()
        .filter(|e| filter.map_or(true, |c| e.category == c))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&effects)?);
        return Ok(());
    }

    println!("Effects ({})", effects.len());
    println!("{}", "=".repeat(50));
    for effect in effects {
        let gpu = if effect.shader.is_some() {
            ""
        } else {
            " [pass-through]"
        };
        println!("{:<22} {:?}{gpu}", effect.id, effect.category);
        println!("  {}", effect.description);
        for param in effect.parameters {
            let range = match (param.min, param.max) {
                (Some(lo), Some(hi)) => format!(" [{lo}..{hi}]"),
                _ => String::new(),
            };
            println!(
                "    {:<16} {}{range}",
                param.name,
                format_value(&param.default)
            );
        }
    }
    Ok(())
}

fn parse_category(raw: &str) -> anyhow::Result<EffectCategory> {
    match raw.to_ascii_lowercase().as_str() {
        "simple" => Ok(EffectCategory::Simple),
        "math" => Ok(EffectCategory::Math),
        "ai" => Ok(EffectCategory::Ai),
        other => Err(anyhow::anyhow!(
            "Unknown category: {other}. Use: simple, math, ai"
        )),
    }
}

fn format_value(value: &ParameterValue) -> String {
    match value {
        ParameterValue::Float(v) => format!("{v}"),
        ParameterValue::Int(v) => format!("{v}"),
        ParameterValue::Bool(v) => format!("{v}"),
        ParameterValue::Color([r, g, b]) => format!(
            "#{:02x}{:02x}{:02x}",
            (r * 255.0).round() as u8,
            (g * 255.0).round() as u8,
            (b * 255.0).round() as u8
        ),
    }
}
