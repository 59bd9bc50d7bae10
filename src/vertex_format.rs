//! Vertex layouts, primitive topologies and index types.

use std::fmt;

/// Memory alignment rule of a [`VertexFormat`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BufferAlignment {
    /// Tightly packed.
    None,
    /// GLSL `std430` storage layout.
    Std430,
}

/// Scalar type backing a vertex attribute.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ScalarType {
    U8,
    F32,
    I32,
    U32,
}

impl ScalarType {
    pub fn size(self) -> u32 {
        match self {
            ScalarType::U8 => 1,
            _ => 4,
        }
    }

    /// Integer attributes use integer attribute pointers.
    pub fn is_integer(self) -> bool {
        !matches!(self, ScalarType::F32)
    }

    pub fn native(self) -> u32 {
        match self {
            ScalarType::U8 => glow::UNSIGNED_BYTE,
            ScalarType::F32 => glow::FLOAT,
            ScalarType::I32 => glow::INT,
            ScalarType::U32 => glow::UNSIGNED_INT,
        }
    }
}

/// Type of one vertex element.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VertexElementType {
    UINT8,
    FLOAT32,
    VECTOR2_FLOAT32,
    VECTOR3_FLOAT32,
    VECTOR4_FLOAT32,
    MATRIX22_FLOAT32,
    MATRIX33_FLOAT32,
    MATRIX44_FLOAT32,
    INT32,
    VECTOR2_INT32,
    VECTOR3_INT32,
    VECTOR4_INT32,
    UINT32,
    VECTOR2_UINT32,
    VECTOR3_UINT32,
    VECTOR4_UINT32,
}

impl VertexElementType {
    pub fn component_count(self) -> u32 {
        use VertexElementType::*;

        match self {
            UINT8 | FLOAT32 | INT32 | UINT32 => 1,
            VECTOR2_FLOAT32 | VECTOR2_INT32 | VECTOR2_UINT32 => 2,
            VECTOR3_FLOAT32 | VECTOR3_INT32 | VECTOR3_UINT32 => 3,
            VECTOR4_FLOAT32 | VECTOR4_INT32 | VECTOR4_UINT32 | MATRIX22_FLOAT32 => 4,
            MATRIX33_FLOAT32 => 9,
            MATRIX44_FLOAT32 => 16,
        }
    }

    pub fn scalar(self) -> ScalarType {
        use VertexElementType::*;

        match self {
            UINT8 => ScalarType::U8,
            INT32 | VECTOR2_INT32 | VECTOR3_INT32 | VECTOR4_INT32 => ScalarType::I32,
            UINT32 | VECTOR2_UINT32 | VECTOR3_UINT32 | VECTOR4_UINT32 => ScalarType::U32,
            _ => ScalarType::F32,
        }
    }

    pub fn size_in_bytes(self) -> u32 {
        self.component_count() * self.scalar().size()
    }

    /// Column count for matrix types.
    pub fn columns(self) -> Option<u32> {
        match self {
            VertexElementType::MATRIX22_FLOAT32 => Some(2),
            VertexElementType::MATRIX33_FLOAT32 => Some(3),
            VertexElementType::MATRIX44_FLOAT32 => Some(4),
            _ => None,
        }
    }

    pub fn std430_alignment(self) -> u32 {
        use VertexElementType::*;

        match self {
            VECTOR3_FLOAT32 | VECTOR3_INT32 | VECTOR3_UINT32 => 16,
            MATRIX22_FLOAT32 | MATRIX33_FLOAT32 | MATRIX44_FLOAT32 => 16,
            VECTOR4_FLOAT32 | VECTOR4_INT32 | VECTOR4_UINT32 => 16,
            VECTOR2_FLOAT32 | VECTOR2_INT32 | VECTOR2_UINT32 => 8,
            _ => 4,
        }
    }

    /// The float element with `dimensions` components.
    ///
    /// # Panics
    ///
    /// Panics unless `dimensions` is in `1..=4`.
    fn floats(dimensions: u32) -> Self {
        match dimensions {
            1 => VertexElementType::FLOAT32,
            2 => VertexElementType::VECTOR2_FLOAT32,
            3 => VertexElementType::VECTOR3_FLOAT32,
            4 => VertexElementType::VECTOR4_FLOAT32,
            _ => panic!(
                "dimensions can only be 1, 2, 3 or 4 (got {})",
                dimensions
            ),
        }
    }
}

/// One named element of a vertex.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VertexElement {
    pub attribute: String,
    pub offset: u32,
    pub ty: VertexElementType,
    pub array_size: u32,
}

impl VertexElement {
    /// Padding elements are skipped when binding attributes.
    pub fn is_padding(&self) -> bool {
        self.attribute == "_"
    }

    /// Number of attribute locations this element occupies.
    pub fn locations(&self) -> u32 {
        if self.is_padding() {
            0
        } else {
            self.ty.columns().unwrap_or(1) * self.array_size
        }
    }
}

/// Layout of one vertex (or one instance) in a buffer.
///
/// ```
/// use draw_glow::vertex_format::VertexFormat;
///
/// let format = VertexFormat::new().position(3).color(4);
/// assert_eq!(format.size(), 28);
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VertexFormat {
    alignment: BufferAlignment,
    items: Vec<VertexElement>,
    vertex_size: u32,
}

impl Default for VertexFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl VertexFormat {
    pub fn new() -> Self {
        Self::with_alignment(BufferAlignment::None)
    }

    /// A format following the `std430` layout rules, as used by storage buffers.
    pub fn std430() -> Self {
        Self::with_alignment(BufferAlignment::Std430)
    }

    pub fn with_alignment(alignment: BufferAlignment) -> Self {
        VertexFormat {
            alignment,
            items: Vec::new(),
            vertex_size: 0,
        }
    }

    pub fn alignment(&self) -> BufferAlignment {
        self.alignment
    }

    pub fn items(&self) -> &[VertexElement] {
        &self.items
    }

    /// Size of one vertex in bytes, including trailing `std430` padding.
    pub fn size(&self) -> u32 {
        match self.alignment {
            BufferAlignment::None => self.vertex_size,
            BufferAlignment::Std430 => {
                let max_align = self
                    .items
                    .iter()
                    .map(|item| item.ty.std430_alignment())
                    .max()
                    .unwrap_or(1);
                round_up(self.vertex_size, max_align)
            }
        }
    }

    /// # Panics
    ///
    /// Panics unless `dimensions` is in `1..=4`.
    pub fn position(self, dimensions: u32) -> Self {
        self.attribute("position", VertexElementType::floats(dimensions), 1)
    }

    /// # Panics
    ///
    /// Panics unless `dimensions` is in `1..=4`.
    pub fn normal(self, dimensions: u32) -> Self {
        self.attribute("normal", VertexElementType::floats(dimensions), 1)
    }

    /// # Panics
    ///
    /// Panics unless `dimensions` is in `1..=4`.
    pub fn color(self, dimensions: u32) -> Self {
        self.attribute("color", VertexElementType::floats(dimensions), 1)
    }

    /// # Panics
    ///
    /// Panics unless `dimensions` is in `1..=4`.
    pub fn texture_coordinate(self, dimensions: u32, index: u32) -> Self {
        let name = format!("texCoord{}", index);
        self.attribute(&name, VertexElementType::floats(dimensions), 1)
    }

    pub fn padding(self, bytes: u32) -> Self {
        self.attribute("_", VertexElementType::UINT8, bytes)
    }

    pub fn padding_float(self, floats: u32) -> Self {
        self.attribute("_", VertexElementType::FLOAT32, floats)
    }

    /// Append a named element.
    pub fn attribute(mut self, name: &str, ty: VertexElementType, array_size: u32) -> Self {
        let offset = match self.alignment {
            BufferAlignment::None => self.vertex_size,
            BufferAlignment::Std430 => {
                let align = match ty {
                    VertexElementType::VECTOR3_FLOAT32
                    | VertexElementType::VECTOR3_INT32
                    | VertexElementType::VECTOR3_UINT32
                    | VertexElementType::MATRIX33_FLOAT32 => 16,
                    other => other.size_in_bytes(),
                };
                round_up(self.vertex_size, align)
            }
        };

        self.vertex_size = offset + ty.size_in_bytes() * array_size;
        self.items.push(VertexElement {
            attribute: name.to_owned(),
            offset,
            ty,
            array_size,
        });

        self
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.items.iter().any(|item| item.attribute == name)
    }

    /// Attribute locations needed to bind this format.
    pub fn attribute_locations(&self) -> u32 {
        self.items.iter().map(VertexElement::locations).sum()
    }

    /// Whether every element offset and the vertex size satisfy `std430` alignment.
    pub fn is_in_std430_layout(&self) -> bool {
        let mut max_align = 4;

        for item in &self.items {
            if item.ty == VertexElementType::UINT8 {
                return false;
            }

            let align = item.ty.std430_alignment();
            max_align = max_align.max(align);

            if item.offset % align != 0 {
                return false;
            }
        }

        self.size() % max_align == 0
    }
}

impl fmt::Display for VertexFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "VertexFormat{{")?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {:?}", item.attribute, item.ty)?;
            if item.array_size != 1 {
                write!(f, "[{}]", item.array_size)?;
            }
        }
        write!(f, "; {} bytes}}", self.size())
    }
}

fn round_up(value: u32, align: u32) -> u32 {
    if align == 0 || value % align == 0 {
        value
    } else {
        value + (align - value % align)
    }
}

/// Primitive topology of a draw call.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DrawPrimitive {
    Triangles,
    TriangleStrip,
    TriangleFan,
    Points,
    Lines,
    LineStrip,
    LineLoop,
    Patches,
}

impl DrawPrimitive {
    pub fn native(self) -> u32 {
        match self {
            DrawPrimitive::Triangles => glow::TRIANGLES,
            DrawPrimitive::TriangleStrip => glow::TRIANGLE_STRIP,
            DrawPrimitive::TriangleFan => glow::TRIANGLE_FAN,
            DrawPrimitive::Points => glow::POINTS,
            DrawPrimitive::Lines => glow::LINES,
            DrawPrimitive::LineStrip => glow::LINE_STRIP,
            DrawPrimitive::LineLoop => glow::LINE_LOOP,
            DrawPrimitive::Patches => glow::PATCHES,
        }
    }
}

/// Element type of an index buffer.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum IndexType {
    INT16,
    INT32,
}

impl IndexType {
    pub fn size_in_bytes(self) -> u32 {
        match self {
            IndexType::INT16 => 2,
            IndexType::INT32 => 4,
        }
    }

    pub fn native(self) -> u32 {
        match self {
            IndexType::INT16 => glow::UNSIGNED_SHORT,
            IndexType::INT32 => glow::UNSIGNED_INT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_offsets() {
        let format = VertexFormat::new()
            .position(3)
            .padding(4)
            .attribute("transform", VertexElementType::MATRIX44_FLOAT32, 1);

        let offsets: Vec<u32> = format.items().iter().map(|i| i.offset).collect();
        assert_eq!(offsets, vec![0, 12, 16]);
        assert_eq!(format.size(), 80);
        assert_eq!(format.attribute_locations(), 5);
    }

    #[test]
    fn std430_alignment() {
        let format = VertexFormat::std430()
            .attribute("a", VertexElementType::FLOAT32, 1)
            .attribute("b", VertexElementType::VECTOR3_FLOAT32, 1)
            .attribute("c", VertexElementType::VECTOR2_FLOAT32, 1);

        let offsets: Vec<u32> = format.items().iter().map(|i| i.offset).collect();
        assert_eq!(offsets, vec![0, 16, 32]);
        assert_eq!(format.size(), 48);
        assert!(format.is_in_std430_layout());

        let packed = VertexFormat::new()
            .attribute("a", VertexElementType::FLOAT32, 1)
            .attribute("b", VertexElementType::VECTOR3_FLOAT32, 1);
        assert!(!packed.is_in_std430_layout());
    }

    #[test]
    fn array_attributes_take_one_location_per_element() {
        let format = VertexFormat::new()
            .attribute("weights", VertexElementType::FLOAT32, 3)
            .attribute("bones", VertexElementType::MATRIX33_FLOAT32, 2);
        assert_eq!(format.attribute_locations(), 3 + 6);
    }

    #[test]
    #[should_panic(expected = "dimensions can only be 1, 2, 3 or 4")]
    fn position_dimensions() {
        let _ = VertexFormat::new().position(5);
    }

    #[test]
    #[should_panic(expected = "(got 0)")]
    fn texture_coordinates_need_a_dimension() {
        let _ = VertexFormat::new().texture_coordinate(0, 0);
    }

    #[test]
    fn float_dimensions() {
        let types: Vec<VertexElementType> = (1..=4).map(VertexElementType::floats).collect();
        assert_eq!(
            types,
            vec![
                VertexElementType::FLOAT32,
                VertexElementType::VECTOR2_FLOAT32,
                VertexElementType::VECTOR3_FLOAT32,
                VertexElementType::VECTOR4_FLOAT32,
            ]
        );
    }
}
