use draw_glow::backend::DeviceState;
use draw_glow::draw_style::Rectangle;
use draw_glow::uniform::UniformValue;
use draw_glow::{
    Backend, BlendMode, ColorBuffer, ColorFormat, ColorRGBa, ColorType, DepthComparison,
    DrawPrimitive, DrawStyle, Driver, DriverConfiguration, Error, RenderTarget,
    RenderTargetDescriptor, Shader, ShaderSources, SoftBackend, VertexBuffer, VertexFormat,
};

const VERTEX: &str = "#version 330 core
in vec3 a_position;
void main() {
    gl_Position = vec4(a_position, 1.0);
}
";

const RED_FRAGMENT: &str = "#version 330 core
out vec4 o_color;
void main() {
    o_color = vec4(1.0, 0.0, 0.0, 1.0);
}
";

const UNIFORM_FRAGMENT: &str = "#version 330 core
uniform vec4 u_color;
out vec4 o_color;
void main() {
    o_color = u_color;
}
";

const VERTEX_2D: &str = "#version 330 core
in vec2 a_position;
void main() {
    gl_Position = vec4(a_position, 0.0, 1.0);
}
";

const ARRAY_FRAGMENT: &str = "#version 330 core
uniform vec4 u_colors[4];
out vec4 o_color;
void main() {
    o_color = u_colors[2];
}
";

fn driver(width: u32, height: u32) -> Driver {
    let _ = env_logger::builder().is_test(true).try_init();
    Driver::new(
        Box::new(SoftBackend::new(width, height)),
        DriverConfiguration::default(),
    )
    .unwrap()
}

fn target(driver: &Driver, width: u32, height: u32) -> (RenderTarget, ColorBuffer) {
    let target = driver
        .create_render_target(&RenderTargetDescriptor::new(width, height), None)
        .unwrap();
    let color = target
        .add_color_buffer(ColorFormat::RGBa, ColorType::UINT8)
        .unwrap();
    (target, color)
}

fn vertices(driver: &Driver, positions: &[f32; 9]) -> VertexBuffer {
    let buffer = driver
        .create_dynamic_vertex_buffer(&VertexFormat::new().position(3), 3, None)
        .unwrap();
    buffer.write_elements(positions, 0).unwrap();
    buffer
}

/// Covers the pixel centre of a 1x1 target.
fn triangle(driver: &Driver) -> VertexBuffer {
    vertices(driver, &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0])
}

/// Stays in the lower left corner of a 1x1 target, away from the pixel centre.
fn corner_triangle(driver: &Driver) -> VertexBuffer {
    vertices(driver, &[-1.0, -1.0, 0.0, -0.5, -1.0, 0.0, -1.0, -0.5, 0.0])
}

fn pixel(color: &ColorBuffer) -> [u8; 4] {
    let mut out = [0u8; 4];
    color
        .read(&mut out, ColorFormat::RGBa, ColorType::UINT8, 0)
        .unwrap();
    out
}

fn styles() -> Vec<DrawStyle> {
    vec![
        DrawStyle::default(),
        DrawStyle {
            clip: Some(Rectangle::new(1.0, 2.0, 4.0, 3.0)),
            blend_mode: BlendMode::Add,
            depth_write: true,
            depth_test: DepthComparison::Less,
            ..DrawStyle::default()
        },
        DrawStyle {
            clip: None,
            blend_mode: BlendMode::Replace,
            depth_write: false,
            ..DrawStyle::default()
        },
        DrawStyle {
            clip: Some(Rectangle::new(0.0, 0.0, 8.0, 8.0)),
            blend_mode: BlendMode::Multiply,
            depth_write: true,
            alpha_to_coverage: true,
            ..DrawStyle::default()
        },
    ]
}

/// The state that can influence a draw: disabled tests keep stale parameters on the device.
fn effective(state: DeviceState, baseline: &DeviceState) -> DeviceState {
    let mut state = state;
    if !state.scissor_test {
        state.scissor = baseline.scissor;
    }
    if !state.blend {
        state.blend_equations = baseline.blend_equations;
        state.blend_factors = baseline.blend_factors;
    }
    state
}

#[test]
fn diffed_state_matches_forced_state() {
    let styles = styles();
    let baseline = driver(16, 16).context().device_state().unwrap();

    for end in 0..styles.len() {
        let diffed = driver(16, 16);
        for style in &styles[..=end] {
            diffed.set_state(style).unwrap();
        }

        let forced = driver(16, 16);
        forced.set_state_forced(&styles[end]).unwrap();

        assert_eq!(
            effective(diffed.context().device_state().unwrap(), &baseline),
            effective(forced.context().device_state().unwrap(), &baseline),
            "after applying style {}",
            end
        );
    }
}

#[test]
fn dirty_contexts_apply_everything() {
    let driver = driver(16, 16);
    let styles = styles();

    driver.set_state(&styles[1]).unwrap();
    // state changed behind the cache
    driver.context().backend().depth_mask(false);
    driver.context().mark_dirty();
    driver.set_state(&styles[1]).unwrap();

    assert!(driver.context().device_state().unwrap().depth_write);
}

#[test]
fn clip_rectangles_are_flipped_to_the_bottom_left() {
    let driver = driver(16, 16);
    driver
        .set_state(&DrawStyle {
            clip: Some(Rectangle::new(1.0, 2.0, 4.0, 3.0)),
            ..DrawStyle::default()
        })
        .unwrap();

    let state = driver.context().device_state().unwrap();
    assert!(state.scissor_test);
    assert_eq!(state.scissor, [1, 11, 4, 3]);
}

#[test]
fn triangle_covers_the_pixel_at_its_corner() {
    let driver = driver(16, 16);
    let (target, color) = target(&driver, 1, 1);
    let shader = driver
        .create_shader(&ShaderSources::new("red", VERTEX, RED_FRAGMENT), None)
        .unwrap();
    let vertices = triangle(&driver);

    target.bind().unwrap();
    driver
        .draw_vertex_buffer(&shader, &[vertices], DrawPrimitive::Triangles, 0..3, 0)
        .unwrap();
    target.unbind().unwrap();

    assert_eq!(pixel(&color), [255, 0, 0, 255]);
}

#[test]
fn two_component_positions_are_extended() {
    let driver = driver(16, 16);
    let (target, color) = target(&driver, 1, 1);
    let shader = driver
        .create_shader(&ShaderSources::new("red", VERTEX_2D, RED_FRAGMENT), None)
        .unwrap();
    let vertices = driver
        .create_dynamic_vertex_buffer(&VertexFormat::new().position(2), 3, None)
        .unwrap();
    let positions: [f32; 6] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
    vertices.write_elements(&positions, 0).unwrap();

    target.bind().unwrap();
    driver
        .draw_vertex_buffer(&shader, &[vertices], DrawPrimitive::Triangles, 0..3, 0)
        .unwrap();
    target.unbind().unwrap();

    assert_eq!(pixel(&color), [255, 0, 0, 255]);
}

#[test]
fn draws_use_their_own_shader() {
    let driver = driver(16, 16);
    let (target, color) = target(&driver, 1, 1);
    let red = driver
        .create_shader(&ShaderSources::new("red", VERTEX, RED_FRAGMENT), None)
        .unwrap();
    let other = driver
        .create_shader(
            &ShaderSources::new("uniform", VERTEX, UNIFORM_FRAGMENT),
            None,
        )
        .unwrap();
    let vertices = triangle(&driver);

    target.bind().unwrap();
    red.begin().unwrap();
    // setting a uniform must not leave the other program current
    other
        .uniform("u_color", UniformValue::Vec4([0.0, 0.0, 1.0, 1.0]))
        .unwrap();
    assert!(red.is_running());
    assert!(!other.is_running());

    driver
        .draw_vertex_buffer(&red, &[vertices.clone()], DrawPrimitive::Triangles, 0..3, 0)
        .unwrap();
    assert_eq!(pixel(&color), [255, 0, 0, 255]);

    // the uniform was stored in the other program
    driver
        .draw_vertex_buffer(&other, &[vertices.clone()], DrawPrimitive::Triangles, 0..3, 0)
        .unwrap();
    assert_eq!(pixel(&color), [0, 0, 255, 255]);

    // a shader that was begun earlier is made current again
    driver
        .draw_vertex_buffer(&red, &[vertices], DrawPrimitive::Triangles, 0..3, 0)
        .unwrap();
    target.unbind().unwrap();
    assert_eq!(pixel(&color), [255, 0, 0, 255]);
}

#[test]
fn array_elements_are_set_by_index() {
    let driver = driver(16, 16);
    let (target, color) = target(&driver, 1, 1);
    let shader = driver
        .create_shader(&ShaderSources::new("array", VERTEX, ARRAY_FRAGMENT), None)
        .unwrap();
    let vertices = triangle(&driver);

    assert!(shader.has_uniform("u_colors"));
    assert!(shader.has_uniform("u_colors[0]"));
    assert!(shader.has_uniform("u_colors[3]"));
    assert!(!shader.has_uniform("u_colors[4]"));

    let colors: [[f32; 4]; 4] = [[0.0, 0.0, 0.0, 1.0]; 4];
    shader
        .uniform("u_colors", UniformValue::Vec4Array(&colors))
        .unwrap();
    shader
        .uniform("u_colors[2]", UniformValue::Vec4([0.0, 1.0, 0.0, 1.0]))
        .unwrap();
    shader
        .uniform("u_colors[0]", UniformValue::Vec4([1.0, 0.0, 0.0, 1.0]))
        .unwrap();
    // past the end of the array, ignored like any undeclared name
    shader
        .uniform("u_colors[4]", UniformValue::Vec4([0.0, 0.0, 1.0, 1.0]))
        .unwrap();
    assert!(shader
        .uniform("u_colors[1]", UniformValue::Float(1.0))
        .is_err());

    target.bind().unwrap();
    driver
        .draw_vertex_buffer(&shader, &[vertices], DrawPrimitive::Triangles, 0..3, 0)
        .unwrap();
    target.unbind().unwrap();

    assert_eq!(pixel(&color), [0, 255, 0, 255]);
}

#[test]
fn destroyed_buffers_leave_the_vertex_array_cache() {
    let driver = driver(16, 16);
    let (target, color) = target(&driver, 1, 1);
    let shader = driver
        .create_shader(
            &ShaderSources::new("uniform", VERTEX, UNIFORM_FRAGMENT),
            None,
        )
        .unwrap();

    target.bind().unwrap();
    shader.begin().unwrap();
    shader
        .uniform("u_color", UniformValue::Vec4([0.0, 1.0, 0.0, 1.0]))
        .unwrap();

    let first = triangle(&driver);
    driver
        .draw_vertex_buffer(&shader, &[first.clone()], DrawPrimitive::Triangles, 0..3, 0)
        .unwrap();
    assert_eq!(driver.context().cached_vertex_arrays(), 1);

    // the same buffers reuse the cached vertex array
    driver
        .draw_vertex_buffer(&shader, &[first.clone()], DrawPrimitive::Triangles, 0..3, 0)
        .unwrap();
    assert_eq!(driver.context().cached_vertex_arrays(), 1);

    first.destroy().unwrap();
    assert_eq!(driver.context().cached_vertex_arrays(), 0);
    assert!(driver
        .draw_vertex_buffer(&shader, &[first], DrawPrimitive::Triangles, 0..3, 0)
        .is_err());

    // a vertex array left behind by the first buffer would still cover the pixel
    target.clear(ColorRGBa::BLACK).unwrap();
    let second = corner_triangle(&driver);
    driver
        .draw_vertex_buffer(&shader, &[second.clone()], DrawPrimitive::Triangles, 0..3, 0)
        .unwrap();
    assert_eq!(driver.context().cached_vertex_arrays(), 1);
    assert_eq!(pixel(&color), [0, 0, 0, 255]);

    let covering: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    second.write_elements(&covering, 0).unwrap();
    driver
        .draw_vertex_buffer(&shader, &[second], DrawPrimitive::Triangles, 0..3, 0)
        .unwrap();
    target.unbind().unwrap();

    assert_eq!(driver.context().cached_vertex_arrays(), 1);
    assert_eq!(pixel(&color), [0, 255, 0, 255]);
}

#[test]
fn destroyed_shaders_leave_the_vertex_array_cache() {
    let driver = driver(16, 16);
    let (target, _) = target(&driver, 1, 1);
    let shader = driver
        .create_shader(&ShaderSources::new("red", VERTEX, RED_FRAGMENT), None)
        .unwrap();
    let vertices = triangle(&driver);

    target.bind().unwrap();
    driver
        .draw_vertex_buffer(&shader, &[vertices], DrawPrimitive::Triangles, 0..3, 0)
        .unwrap();
    target.unbind().unwrap();
    assert_eq!(driver.context().cached_vertex_arrays(), 1);

    shader.destroy().unwrap();
    assert_eq!(driver.context().cached_vertex_arrays(), 0);
}

#[test]
fn shaders_report_compile_errors() {
    let driver = driver(4, 4);
    let broken = ShaderSources::new("broken", "#version 330 core\nvoid main() {", RED_FRAGMENT);

    let err = driver.create_shader(&broken, None).unwrap_err();
    assert!(matches!(err, Error::Compile { .. }));
}

#[test]
fn shader_lookups_ignore_undeclared_names() {
    let driver = driver(4, 4);
    let shader: Shader = driver
        .create_shader(
            &ShaderSources::new("uniform", VERTEX, UNIFORM_FRAGMENT),
            None,
        )
        .unwrap();

    assert!(shader.has_uniform("u_color"));
    assert!(!shader.has_uniform("u_missing"));
    shader
        .uniform("u_missing", UniformValue::Float(1.0))
        .unwrap();
    assert!(shader
        .uniform("u_color", UniformValue::Float(1.0))
        .is_err());
}
