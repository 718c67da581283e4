//! Effect descriptors, applied instances, and the effect chain.
//!
//! Descriptors are immutable and live for the whole process (see
//! [`crate::registry`]). The host owns the [`EffectChain`] and edits it in
//! response to user actions; the compositor only ever reads a snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use reelfx_common::error::{ReelError, ReelResult};

use crate::registry;

/// Broad grouping shown in effect browsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectCategory {
    Simple,
    Math,
    Ai,
}

/// The declared type of an effect parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Float,
    Int,
    Boolean,
    Color,
}

/// A concrete parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    /// Linear RGB, each channel in `[0.0, 1.0]`.
    Color([f32; 3]),
}

/// A parameter value lowered to shader-uniform form (32-bit floats).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Scalar(f32),
    Vec3([f32; 3]),
}

impl ParameterValue {
    pub fn kind(&self) -> ParameterKind {
        match self {
            Self::Float(_) => ParameterKind::Float,
            Self::Int(_) => ParameterKind::Int,
            Self::Bool(_) => ParameterKind::Boolean,
            Self::Color(_) => ParameterKind::Color,
        }
    }

    pub fn to_uniform(self) -> UniformValue {
        match self {
            Self::Float(v) => UniformValue::Scalar(v),
            Self::Int(v) => UniformValue::Scalar(v as f32),
            Self::Bool(v) => UniformValue::Scalar(if v { 1.0 } else { 0.0 }),
            Self::Color(rgb) => UniformValue::Vec3(rgb),
        }
    }

    /// Scalar view of the value; colors report their first channel.
    pub fn as_f32(&self) -> f32 {
        match self.to_uniform() {
            UniformValue::Scalar(v) => v,
            UniformValue::Vec3(rgb) => rgb[0],
        }
    }
}

impl UniformValue {
    /// Pack into one vec4 uniform slot.
    pub fn to_vec4(self) -> [f32; 4] {
        match self {
            Self::Scalar(v) => [v, 0.0, 0.0, 0.0],
            Self::Vec3([r, g, b]) => [r, g, b, 0.0],
        }
    }
}

/// Describes one tunable parameter of an effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterDescriptor {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: ParameterKind,
    pub default: ParameterValue,
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub step: Option<f32>,
}

impl ParameterDescriptor {
    /// Coerce a user value to this parameter: the kind must match, numeric
    /// values are clamped to `[min, max]`.
    pub fn clamp(&self, value: ParameterValue) -> ReelResult<ParameterValue> {
        if value.kind() != self.kind {
            return Err(ReelError::config(format!(
                "parameter '{}' expects {:?}, got {:?}",
                self.name,
                self.kind,
                value.kind()
            )));
        }

        let lo = self.min.unwrap_or(f32::MIN);
        let hi = self.max.unwrap_or(f32::MAX);
        Ok(match value {
            ParameterValue::Float(v) => {
                if !v.is_finite() {
                    return Err(ReelError::config(format!(
                        "parameter '{}' must be finite",
                        self.name
                    )));
                }
                ParameterValue::Float(v.clamp(lo, hi))
            }
            ParameterValue::Int(v) => ParameterValue::Int((v as f32).clamp(lo, hi) as i32),
            ParameterValue::Color(rgb) => ParameterValue::Color(rgb.map(|c| c.clamp(0.0, 1.0))),
            other => other,
        })
    }
}

/// A shader program attached to an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShaderProgram {
    /// Stable program name. Backends that do not compile WGSL resolve
    /// programs by this name.
    pub entry: &'static str,

    /// WGSL fragment stage; must define `fs_main`.
    #[serde(skip)]
    pub wgsl: &'static str,
}

/// Static, read-only description of an effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EffectDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: EffectCategory,
    pub parameters: &'static [ParameterDescriptor],
    pub shader: Option<ShaderProgram>,
}

impl EffectDescriptor {
    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn default_parameters(&self) -> BTreeMap<String, ParameterValue> {
        self.parameters
            .iter()
            .map(|p| (p.name.to_string(), p.default))
            .collect()
    }
}

/// Identifier of an applied effect instance, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl InstanceId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fx-{}", self.0)
    }
}

/// One entry of the effect chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedEffectInstance {
    pub id: InstanceId,

    /// Id of the [`EffectDescriptor`] this instance applies.
    pub effect_id: String,

    /// Display name, copied from the descriptor at creation.
    pub name: String,

    /// Values set by the user. Missing keys fall back to descriptor defaults.
    pub parameters: BTreeMap<String, ParameterValue>,

    pub enabled: bool,
}

impl AppliedEffectInstance {
    /// Instantiate a descriptor with its default parameters, enabled.
    pub fn new(descriptor: &EffectDescriptor) -> Self {
        Self {
            id: InstanceId::next(),
            effect_id: descriptor.id.to_string(),
            name: descriptor.name.to_string(),
            parameters: descriptor.default_parameters(),
            enabled: true,
        }
    }

    /// Instance referencing an effect id that may not exist in the registry.
    pub fn unresolved(effect_id: impl Into<String>) -> Self {
        let effect_id = effect_id.into();
        Self {
            id: InstanceId::next(),
            name: effect_id.clone(),
            effect_id,
            parameters: BTreeMap::new(),
            enabled: true,
        }
    }

    /// Builder-style parameter override, bypassing validation.
    pub fn with_parameter(mut self, name: &str, value: ParameterValue) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The value the compositor should use for `param`, clamped to its
    /// range. Missing, mistyped and non-finite values resolve to the default.
    pub fn resolved_value(&self, param: &ParameterDescriptor) -> ParameterValue {
        self.parameters
            .get(param.name)
            .and_then(|value| param.clamp(*value).ok())
            .unwrap_or(param.default)
    }

    pub fn descriptor(&self) -> Option<&'static EffectDescriptor> {
        registry::find(&self.effect_id)
    }
}

/// Ordered sequence of applied effects; order is composition order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectChain {
    instances: Vec<AppliedEffectInstance>,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new instance of the registry effect `effect_id`.
    pub fn push_effect(&mut self, effect_id: &str) -> ReelResult<InstanceId> {
        let descriptor = registry::find(effect_id)
            .ok_or_else(|| ReelError::config(format!("unknown effect '{effect_id}'")))?;
        Ok(self.push(AppliedEffectInstance::new(descriptor)))
    }

    pub fn push(&mut self, instance: AppliedEffectInstance) -> InstanceId {
        let id = instance.id;
        self.instances.push(instance);
        id
    }

    pub fn remove(&mut self, id: InstanceId) -> Option<AppliedEffectInstance> {
        let index = self.position(id)?;
        Some(self.instances.remove(index))
    }

    /// Flip the enabled flag; returns the new state.
    pub fn toggle(&mut self, id: InstanceId) -> Option<bool> {
        let instance = self.get_mut(id)?;
        instance.enabled = !instance.enabled;
        Some(instance.enabled)
    }

    pub fn set_enabled(&mut self, id: InstanceId, enabled: bool) -> bool {
        match self.get_mut(id) {
            Some(instance) => {
                instance.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Set a parameter, validated and clamped against the descriptor.
    pub fn set_parameter(
        &mut self,
        id: InstanceId,
        name: &str,
        value: ParameterValue,
    ) -> ReelResult<ParameterValue> {
        let instance = self
            .get_mut(id)
            .ok_or_else(|| ReelError::config(format!("no effect instance {id}")))?;
        let descriptor = registry::find(&instance.effect_id).ok_or_else(|| {
            ReelError::config(format!("unknown effect '{}'", instance.effect_id))
        })?;
        let param = descriptor.parameter(name).ok_or_else(|| {
            ReelError::config(format!("effect '{}' has no parameter '{name}'", descriptor.id))
        })?;
        let value = param.clamp(value)?;
        instance.parameters.insert(name.to_string(), value);
        Ok(value)
    }

    /// Move an instance to `index` (clamped to the chain length).
    pub fn move_to(&mut self, id: InstanceId, index: usize) -> bool {
        let Some(from) = self.position(id) else {
            return false;
        };
        let instance = self.instances.remove(from);
        let to = index.min(self.instances.len());
        self.instances.insert(to, instance);
        true
    }

    pub fn get(&self, id: InstanceId) -> Option<&AppliedEffectInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    fn get_mut(&mut self, id: InstanceId) -> Option<&mut AppliedEffectInstance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }

    fn position(&self, id: InstanceId) -> Option<usize> {
        self.instances.iter().position(|i| i.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppliedEffectInstance> {
        self.instances.iter()
    }

    /// Enabled instances in composition order.
    pub fn enabled(&self) -> impl Iterator<Item = &AppliedEffectInstance> {
        self.instances.iter().filter(|i| i.enabled)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn as_slice(&self) -> &[AppliedEffectInstance] {
        &self.instances
    }
}

impl FromIterator<AppliedEffectInstance> for EffectChain {
    fn from_iter<T: IntoIterator<Item = AppliedEffectInstance>>(iter: T) -> Self {
        Self {
            instances: iter.into_iter().collect(),
        }
    }
}
