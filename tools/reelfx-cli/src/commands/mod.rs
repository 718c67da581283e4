pub mod check;
pub mod effects;
pub mod export;
pub mod render;
pub mod resolve;
pub mod transcode;

use anyhow::{anyhow, Context};

use reelfx_effect_model::{registry, EffectChain, ParameterKind, ParameterValue};

/// Build a chain from `id[:name=value,...]` arguments, in order.
pub fn parse_chain(specs: &[String]) -> anyhow::Result<EffectChain> {
    let mut chain = EffectChain::new();
    for spec in specs {
        let (effect_id, params) = match spec.split_once(':') {
            Some((id, params)) => (id.trim(), params),
            None => (spec.trim(), ""),
        };
        let descriptor = registry::find(effect_id)
            .ok_or_else(|| anyhow!("Unknown effect '{effect_id}'. See `reelfx effects`."))?;
        let id = chain.push_effect(descriptor.id)?;

        for assignment in params.split(',').filter(|s| !s.trim().is_empty()) {
            let (name, raw) = assignment
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected name=value in '{assignment}'"))?;
            let name = name.trim();
            let param = descriptor
                .parameter(name)
                .ok_or_else(|| anyhow!("Effect '{effect_id}' has no parameter '{name}'"))?;
            let value = parse_value(param.kind, raw.trim())
                .with_context(|| format!("Invalid value for {effect_id}.{name}"))?;
            chain.set_parameter(id, name, value)?;
        }
    }
    Ok(chain)
}

fn parse_value(kind: ParameterKind, raw: &str) -> anyhow::Result<ParameterValue> {
    Ok(match kind {
        ParameterKind::Float => ParameterValue::Float(raw.parse()?),
        ParameterKind::Int => ParameterValue::Int(raw.parse()?),
        ParameterKind::Boolean => ParameterValue::Bool(raw.parse()?),
        ParameterKind::Color => ParameterValue::Color(parse_hex_color(raw)?),
    })
}

/// `#rrggbb` to linear channels in `[0, 1]`.
fn parse_hex_color(raw: &str) -> anyhow::Result<[f32; 3]> {
    let hex = raw.trim_start_matches('#');
    if hex.len() != 6 {
        return Err(anyhow!("expected #rrggbb, got '{raw}'"));
    }
    let mut rgb = [0.0; 3];
    for (i, channel) in rgb.iter_mut().enumerate() {
        let byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)?;
        *channel = f32::from(byte) / 255.0;
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chain_with_parameters() {
        let chain = parse_chain(&["grayscale".to_string(), "blur:radius=6".to_string()]).unwrap();
        assert_eq!(chain.len(), 2);
        let blur = &chain.as_slice()[1];
        assert_eq!(blur.effect_id, "blur");
        assert!(matches!(
            blur.parameters.get("radius"),
            Some(ParameterValue::Float(r)) if (*r - 6.0).abs() < 1e-6
        ));
    }

    #[test]
    fn test_parse_chain_rejects_unknown() {
        assert!(parse_chain(&["sparkles".to_string()]).is_err());
        assert!(parse_chain(&["blur:depth=2".to_string()]).is_err());
        assert!(parse_chain(&["blur:radius".to_string()]).is_err());
    }

    #[test]
    fn test_hex_color() {
        assert_eq!(parse_hex_color("#ff0000").unwrap(), [1.0, 0.0, 0.0]);
        assert!(parse_hex_color("red").is_err());
    }
}
