use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::pool::{Color, Mat4, Vec2, Vec3};

/// Value bound to a named shader input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
    Vec2Array(Vec<[f32; 2]>),
    Vec3Array(Vec<[f32; 3]>),
    Vec4Array(Vec<[f32; 4]>),
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec2> for UniformValue {
    fn from(value: Vec2) -> Self {
        Self::Vec2(value.to_array())
    }
}

impl From<Vec3> for UniformValue {
    fn from(value: Vec3) -> Self {
        Self::Vec3(value.to_array())
    }
}

impl From<Color> for UniformValue {
    fn from(value: Color) -> Self {
        Self::Vec3(value.to_array())
    }
}

impl From<Mat4> for UniformValue {
    fn from(value: Mat4) -> Self {
        Self::Mat4(value.elements)
    }
}

/// Ordered set of uniform bindings for one material.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Uniforms {
    values: BTreeMap<String, UniformValue>,
}

impl Uniforms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.values.get(name)
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        match self.values.get(name) {
            Some(UniformValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// Overwrites every binding present in `overrides`.
    pub fn merge(&mut self, overrides: &Uniforms) {
        for (name, value) in &overrides.values {
            self.values.insert(name.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overrides_only_named_bindings() {
        let mut base = Uniforms::new()
            .with("uTime", 0.0_f32)
            .with("uColor", Color::new(1.0, 0.0, 0.0));
        let overrides = Uniforms::new().with("uColor", Color::new(0.0, 1.0, 0.0));

        base.merge(&overrides);

        assert_eq!(base.float("uTime"), Some(0.0));
        assert_eq!(base.get("uColor"), Some(&UniformValue::Vec3([0.0, 1.0, 0.0])));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn iterates_in_name_order() {
        let uniforms = Uniforms::new().with("b", 1_i32).with("a", true);
        let names: Vec<_> = uniforms.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
