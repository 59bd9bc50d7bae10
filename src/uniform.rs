//! Uniform values and texture unit allocation.

use std::fmt;

use crate::format::ColorRGBa;

/// Texture units below this one are reserved for internal draws.
pub const RESERVED_TEXTURE_UNITS: u32 = 2;

/// Declared type of an active uniform.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UniformType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    UInt,
    UVec2,
    UVec3,
    UVec4,
    Bool,
    Mat2,
    Mat3,
    Mat4,
    /// Any sampler type; set through a texture unit.
    Sampler,
    /// Any image type; set through an image unit.
    Image,
    /// A type this crate cannot set directly.
    Other(u32),
}

impl UniformType {
    /// Map a reflected GL type enum.
    pub fn from_native(ty: u32) -> Self {
        match ty {
            glow::FLOAT => UniformType::Float,
            glow::FLOAT_VEC2 => UniformType::Vec2,
            glow::FLOAT_VEC3 => UniformType::Vec3,
            glow::FLOAT_VEC4 => UniformType::Vec4,
            glow::INT => UniformType::Int,
            glow::INT_VEC2 => UniformType::IVec2,
            glow::INT_VEC3 => UniformType::IVec3,
            glow::INT_VEC4 => UniformType::IVec4,
            glow::UNSIGNED_INT => UniformType::UInt,
            glow::UNSIGNED_INT_VEC2 => UniformType::UVec2,
            glow::UNSIGNED_INT_VEC3 => UniformType::UVec3,
            glow::UNSIGNED_INT_VEC4 => UniformType::UVec4,
            glow::BOOL => UniformType::Bool,
            glow::FLOAT_MAT2 => UniformType::Mat2,
            glow::FLOAT_MAT3 => UniformType::Mat3,
            glow::FLOAT_MAT4 => UniformType::Mat4,
            glow::SAMPLER_2D
            | glow::SAMPLER_3D
            | glow::SAMPLER_CUBE
            | glow::SAMPLER_2D_ARRAY
            | glow::SAMPLER_CUBE_MAP_ARRAY
            | glow::SAMPLER_2D_MULTISAMPLE
            | glow::SAMPLER_2D_SHADOW
            | glow::INT_SAMPLER_2D
            | glow::INT_SAMPLER_3D
            | glow::INT_SAMPLER_CUBE
            | glow::INT_SAMPLER_2D_ARRAY
            | glow::UNSIGNED_INT_SAMPLER_2D
            | glow::UNSIGNED_INT_SAMPLER_3D
            | glow::UNSIGNED_INT_SAMPLER_CUBE
            | glow::UNSIGNED_INT_SAMPLER_2D_ARRAY => UniformType::Sampler,
            glow::IMAGE_2D
            | glow::IMAGE_3D
            | glow::IMAGE_CUBE
            | glow::IMAGE_2D_ARRAY
            | glow::INT_IMAGE_2D
            | glow::UNSIGNED_INT_IMAGE_2D => UniformType::Image,
            other => UniformType::Other(other),
        }
    }

    /// Parse a GLSL type keyword.
    pub fn from_glsl(keyword: &str) -> Option<Self> {
        let ty = match keyword {
            "float" => UniformType::Float,
            "vec2" => UniformType::Vec2,
            "vec3" => UniformType::Vec3,
            "vec4" => UniformType::Vec4,
            "int" => UniformType::Int,
            "ivec2" => UniformType::IVec2,
            "ivec3" => UniformType::IVec3,
            "ivec4" => UniformType::IVec4,
            "uint" => UniformType::UInt,
            "uvec2" => UniformType::UVec2,
            "uvec3" => UniformType::UVec3,
            "uvec4" => UniformType::UVec4,
            "bool" => UniformType::Bool,
            "mat2" => UniformType::Mat2,
            "mat3" => UniformType::Mat3,
            "mat4" => UniformType::Mat4,
            k if k.contains("sampler") => UniformType::Sampler,
            k if k.contains("image") => UniformType::Image,
            _ => return None,
        };

        Some(ty)
    }
}

impl fmt::Display for UniformType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            UniformType::Float => "float",
            UniformType::Vec2 => "vec2",
            UniformType::Vec3 => "vec3",
            UniformType::Vec4 => "vec4",
            UniformType::Int => "int",
            UniformType::IVec2 => "ivec2",
            UniformType::IVec3 => "ivec3",
            UniformType::IVec4 => "ivec4",
            UniformType::UInt => "uint",
            UniformType::UVec2 => "uvec2",
            UniformType::UVec3 => "uvec3",
            UniformType::UVec4 => "uvec4",
            UniformType::Bool => "bool",
            UniformType::Mat2 => "mat2",
            UniformType::Mat3 => "mat3",
            UniformType::Mat4 => "mat4",
            UniformType::Sampler => "sampler",
            UniformType::Image => "image",
            UniformType::Other(ty) => return write!(f, "type 0x{:04x}", ty),
        };

        f.write_str(name)
    }
}

/// A host value for a uniform.
///
/// Matrices are column-major.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue<'a> {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    IVec2([i32; 2]),
    IVec3([i32; 3]),
    IVec4([i32; 4]),
    UInt(u32),
    UVec2([u32; 2]),
    UVec3([u32; 3]),
    UVec4([u32; 4]),
    Bool(bool),
    Mat2([f32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
    FloatArray(&'a [f32]),
    Vec2Array(&'a [[f32; 2]]),
    Vec3Array(&'a [[f32; 3]]),
    Vec4Array(&'a [[f32; 4]]),
    IntArray(&'a [i32]),
    Mat4Array(&'a [[f32; 16]]),
    /// Uploaded as a `vec4`, converted to linear first.
    Color(ColorRGBa),
}

impl<'a> UniformValue<'a> {
    /// Whether a uniform declared as `declared` accepts this value.
    pub fn matches(&self, declared: UniformType) -> bool {
        use UniformType as T;
        use UniformValue as V;

        match (self, declared) {
            (V::Float(_), T::Float) | (V::FloatArray(_), T::Float) => true,
            (V::Vec2(_), T::Vec2) | (V::Vec2Array(_), T::Vec2) => true,
            (V::Vec3(_), T::Vec3) | (V::Vec3Array(_), T::Vec3) => true,
            (V::Vec4(_), T::Vec4) | (V::Vec4Array(_), T::Vec4) | (V::Color(_), T::Vec4) => true,
            (V::Int(_), T::Int) | (V::IntArray(_), T::Int) => true,
            (V::Int(_), T::Sampler) | (V::Int(_), T::Image) | (V::Int(_), T::Bool) => true,
            (V::IVec2(_), T::IVec2) | (V::IVec3(_), T::IVec3) | (V::IVec4(_), T::IVec4) => true,
            (V::UInt(_), T::UInt) | (V::UVec2(_), T::UVec2) => true,
            (V::UVec3(_), T::UVec3) | (V::UVec4(_), T::UVec4) => true,
            (V::Bool(_), T::Bool) => true,
            (V::Mat2(_), T::Mat2) | (V::Mat3(_), T::Mat3) => true,
            (V::Mat4(_), T::Mat4) | (V::Mat4Array(_), T::Mat4) => true,
            _ => false,
        }
    }

    /// GLSL-like name of the value type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            UniformValue::Float(_) => "float",
            UniformValue::Vec2(_) => "vec2",
            UniformValue::Vec3(_) => "vec3",
            UniformValue::Vec4(_) => "vec4",
            UniformValue::Int(_) => "int",
            UniformValue::IVec2(_) => "ivec2",
            UniformValue::IVec3(_) => "ivec3",
            UniformValue::IVec4(_) => "ivec4",
            UniformValue::UInt(_) => "uint",
            UniformValue::UVec2(_) => "uvec2",
            UniformValue::UVec3(_) => "uvec3",
            UniformValue::UVec4(_) => "uvec4",
            UniformValue::Bool(_) => "bool",
            UniformValue::Mat2(_) => "mat2",
            UniformValue::Mat3(_) => "mat3",
            UniformValue::Mat4(_) => "mat4",
            UniformValue::FloatArray(_) => "float[]",
            UniformValue::Vec2Array(_) => "vec2[]",
            UniformValue::Vec3Array(_) => "vec3[]",
            UniformValue::Vec4Array(_) => "vec4[]",
            UniformValue::IntArray(_) => "int[]",
            UniformValue::Mat4Array(_) => "mat4[]",
            UniformValue::Color(_) => "color",
        }
    }

    /// Convert colours to the linear `vec4` that is actually uploaded.
    pub fn resolved(self) -> Self {
        match self {
            UniformValue::Color(c) => UniformValue::Vec4(c.to_linear().to_array()),
            other => other,
        }
    }
}

/// Hands out texture units for sampler uniforms, skipping the reserved ones.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TextureUnits {
    next: u32,
}

impl Default for TextureUnits {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureUnits {
    pub fn new() -> Self {
        TextureUnits {
            next: RESERVED_TEXTURE_UNITS,
        }
    }

    /// Allocate the next free unit.
    pub fn next(&mut self) -> u32 {
        let unit = self.next;
        self.next += 1;
        unit
    }

    /// Release every unit allocated so far.
    pub fn reset(&mut self) {
        self.next = RESERVED_TEXTURE_UNITS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_skip_reserved() {
        let mut units = TextureUnits::new();
        assert_eq!(units.next(), 2);
        assert_eq!(units.next(), 3);
        units.reset();
        assert_eq!(units.next(), 2);
    }

    #[test]
    fn value_type_matching() {
        assert!(UniformValue::Float(1.0).matches(UniformType::Float));
        assert!(UniformValue::Int(3).matches(UniformType::Sampler));
        assert!(UniformValue::Color(ColorRGBa::RED).matches(UniformType::Vec4));
        assert!(!UniformValue::Vec3([0.0; 3]).matches(UniformType::Vec4));
        assert!(!UniformValue::Float(1.0).matches(UniformType::Int));
    }

    #[test]
    fn colors_are_uploaded_linear() {
        let value = UniformValue::Color(ColorRGBa::new(0.5, 0.0, 1.0, 0.5)).resolved();
        match value {
            UniformValue::Vec4(v) => {
                assert!((v[0] - 0.214_041).abs() < 1e-5);
                assert_eq!(v[2], 1.0);
                assert_eq!(v[3], 0.5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
