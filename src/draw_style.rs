//! Draw styles and the per-context state cache.
//!
//! A [`DrawStyle`] is a plain value describing the fixed-function state of a draw. Applying one
//! with [`set_state`] only issues the device calls for the parts that differ from the style
//! applied last in the same context; [`set_state_forced`] applies everything.

use luminance::blending::{Equation, Factor};
use luminance::depth_test::DepthComparison;
use luminance::face_culling::FaceCullingMode;

use crate::backend::{Backend, BlendFunction, Capability, StencilFace, StencilOperation};
use crate::context::GraphicsContext;
use crate::error::{Error, Result};

/// A rectangle in logical pixels, origin at the top left.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rectangle {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rectangle {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Rectangle {
            x,
            y,
            width,
            height,
        }
    }
}

/// Which colour channels are written.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ChannelMask {
    pub red: bool,
    pub green: bool,
    pub blue: bool,
    pub alpha: bool,
}

impl ChannelMask {
    pub const ALL: Self = ChannelMask {
        red: true,
        green: true,
        blue: true,
        alpha: true,
    };

    pub const NONE: Self = ChannelMask {
        red: false,
        green: false,
        blue: false,
        alpha: false,
    };

    fn to_array(self) -> [bool; 4] {
        [self.red, self.green, self.blue, self.alpha]
    }
}

impl Default for ChannelMask {
    fn default() -> Self {
        ChannelMask::ALL
    }
}

/// How fragments are combined with the target contents.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BlendMode {
    /// Premultiplied alpha compositing.
    Over,
    /// Straight alpha compositing.
    Blend,
    Add,
    /// No blending.
    Replace,
    Subtract,
    Multiply,
    Remove,
    Min,
    Max,
}

impl Default for BlendMode {
    fn default() -> Self {
        BlendMode::Over
    }
}

impl BlendMode {
    /// Equations and factors of this mode, `None` when blending is disabled.
    pub fn function(self) -> Option<BlendFunction> {
        let add = (Equation::Additive, Equation::Additive);
        let uniform = |equations, src, dst| BlendFunction {
            equations,
            factors: [src, dst, src, dst],
        };

        let function = match self {
            BlendMode::Over => uniform(add, Factor::One, Factor::SrcAlphaComplement),
            BlendMode::Blend => uniform(add, Factor::SrcAlpha, Factor::SrcAlphaComplement),
            BlendMode::Add => uniform(add, Factor::One, Factor::One),
            BlendMode::Replace => return None,
            BlendMode::Subtract => BlendFunction {
                equations: (Equation::ReverseSubtract, Equation::Additive),
                factors: [Factor::SrcAlpha, Factor::One, Factor::One, Factor::One],
            },
            BlendMode::Multiply => uniform(add, Factor::DestColor, Factor::SrcAlphaComplement),
            BlendMode::Remove => uniform(add, Factor::Zero, Factor::SrcAlphaComplement),
            BlendMode::Min => uniform((Equation::Min, Equation::Min), Factor::One, Factor::One),
            BlendMode::Max => uniform((Equation::Max, Equation::Max), Factor::One, Factor::One),
        };

        Some(function)
    }
}

/// Which faces survive culling.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CullTestPass {
    /// No culling.
    Always,
    /// Front faces pass, back faces are culled.
    Front,
    /// Back faces pass, front faces are culled.
    Back,
    /// Everything is culled.
    Never,
}

impl Default for CullTestPass {
    fn default() -> Self {
        CullTestPass::Always
    }
}

/// Stencil configuration of one face.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StencilStyle {
    /// Comparison against the reference value; `None` disables the test.
    pub test: Option<DepthComparison>,
    pub reference: i32,
    pub test_mask: u32,
    pub write_mask: u32,
    pub fail: StencilOperation,
    pub depth_fail: StencilOperation,
    pub depth_pass: StencilOperation,
}

impl Default for StencilStyle {
    fn default() -> Self {
        StencilStyle {
            test: None,
            reference: 0,
            test_mask: 0xff,
            write_mask: 0xff,
            fail: StencilOperation::Keep,
            depth_fail: StencilOperation::Keep,
            depth_pass: StencilOperation::Keep,
        }
    }
}

impl StencilStyle {
    pub fn is_enabled(&self) -> bool {
        self.test.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Sides {
    Both(StencilStyle),
    Separate(StencilStyle, StencilStyle),
}

/// Front and back stencil configuration.
///
/// Either both faces share one style (possibly disabled), or both are configured separately and
/// enabled.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StencilSides(Sides);

impl Default for StencilSides {
    fn default() -> Self {
        StencilSides::disabled()
    }
}

impl StencilSides {
    pub fn disabled() -> Self {
        StencilSides(Sides::Both(StencilStyle::default()))
    }

    /// The same style for both faces.
    pub fn both(style: StencilStyle) -> Self {
        StencilSides(Sides::Both(style))
    }

    /// Separate front and back styles; both must be enabled.
    pub fn separate(front: StencilStyle, back: StencilStyle) -> Result<Self> {
        if !front.is_enabled() || !back.is_enabled() {
            return Err(Error::usage(
                "separate stencil styles need the test enabled on both faces",
            ));
        }

        Ok(StencilSides(Sides::Separate(front, back)))
    }

    pub fn front(&self) -> &StencilStyle {
        match &self.0 {
            Sides::Both(style) | Sides::Separate(style, _) => style,
        }
    }

    pub fn back(&self) -> &StencilStyle {
        match &self.0 {
            Sides::Both(style) | Sides::Separate(_, style) => style,
        }
    }
}

/// Fixed-function state of a draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawStyle {
    /// Scissor rectangle in logical pixels of the active render target.
    pub clip: Option<Rectangle>,
    pub channel_write_mask: ChannelMask,
    pub depth_write: bool,
    pub depth_test: DepthComparison,
    pub stencil: StencilSides,
    pub blend_mode: BlendMode,
    pub cull: CullTestPass,
    pub alpha_to_coverage: bool,
}

impl Default for DrawStyle {
    fn default() -> Self {
        DrawStyle {
            clip: None,
            channel_write_mask: ChannelMask::ALL,
            depth_write: false,
            depth_test: DepthComparison::Always,
            stencil: StencilSides::disabled(),
            blend_mode: BlendMode::Over,
            cull: CullTestPass::Always,
            alpha_to_coverage: false,
        }
    }
}

/// What was last applied in a context.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AppliedStyle {
    style: DrawStyle,
    scissor: Option<[i32; 4]>,
    attachment_blends: Vec<(u32, BlendMode)>,
}

/// Depth write flag of the last applied style, `None` when the context is dirty.
pub(crate) fn applied_depth_write(context: &GraphicsContext) -> Option<bool> {
    context
        .0
        .applied_style
        .borrow()
        .as_ref()
        .map(|applied| applied.style.depth_write)
}

/// Apply `style`, issuing only the changes since the previously applied style.
pub fn set_state(context: &GraphicsContext, style: &DrawStyle) -> Result<()> {
    apply(context, style, false)
}

/// Apply every part of `style` regardless of what the cache holds.
pub fn set_state_forced(context: &GraphicsContext, style: &DrawStyle) -> Result<()> {
    apply(context, style, true)
}

fn apply(context: &GraphicsContext, style: &DrawStyle, forced: bool) -> Result<()> {
    context.check()?;

    let target = context.active_render_target()?;
    let scale = target.content_scale();
    let height = target.height() as f64;
    let scissor = style.clip.map(|r| {
        [
            (r.x * scale) as i32,
            ((height - r.y - r.height) * scale) as i32,
            (r.width * scale) as i32,
            (r.height * scale) as i32,
        ]
    });

    let next = AppliedStyle {
        style: *style,
        scissor,
        attachment_blends: target.attachment_blend_modes(),
    };

    let previous = if forced {
        None
    } else {
        context.0.applied_style.borrow().clone()
    };

    if previous.as_ref() == Some(&next) {
        return Ok(());
    }

    let gles = context.capabilities().driver_type() == crate::capabilities::DriverType::Gles;
    context.with_backend("set_state", |b| {
        apply_diff(b, previous.as_ref(), &next, gles);
        Ok(())
    })?;

    log::trace!(
        "{} draw style {:?}",
        if previous.is_none() { "applied" } else { "updated" },
        style
    );

    context.0.applied_style.replace(Some(next));
    Ok(())
}

fn apply_diff(b: &mut dyn Backend, previous: Option<&AppliedStyle>, next: &AppliedStyle, gles: bool) {
    let style = &next.style;
    let changed = |f: &dyn Fn(&AppliedStyle) -> bool| previous.map_or(true, |p| f(p));

    if previous.is_none() && !gles {
        b.set_capability(Capability::FramebufferSrgb, true);
    }

    let blend_changed = changed(&|p| {
        p.style.blend_mode != style.blend_mode
            || p.style.alpha_to_coverage != style.alpha_to_coverage
            || p.attachment_blends != next.attachment_blends
    });

    if blend_changed {
        match style.blend_mode.function() {
            Some(f) => {
                b.set_capability(Capability::Blend, true);
                b.blend_equation_separate(f.equations.0, f.equations.1);
                b.blend_func_separate(f.factors[0], f.factors[1], f.factors[2], f.factors[3]);
            }
            None => b.set_capability(Capability::Blend, false),
        }

        for &(draw_buffer, mode) in &next.attachment_blends {
            b.blend_draw_buffer(draw_buffer, mode.function());
        }
    }

    if changed(&|p| p.scissor != next.scissor) {
        match next.scissor {
            Some([x, y, w, h]) => {
                b.set_capability(Capability::ScissorTest, true);
                b.scissor(x, y, w, h);
            }
            None => b.set_capability(Capability::ScissorTest, false),
        }
    }

    if changed(&|p| p.style.channel_write_mask != style.channel_write_mask) {
        b.color_mask(style.channel_write_mask.to_array());
    }

    if changed(&|p| p.style.depth_write != style.depth_write) {
        b.depth_mask(style.depth_write);
        b.set_capability(Capability::DepthTest, true);
    }

    if changed(&|p| p.style.stencil != style.stencil) {
        match style.stencil.0 {
            Sides::Both(s) => apply_stencil(b, StencilFace::FrontAndBack, &s),
            Sides::Separate(front, back) => {
                apply_stencil(b, StencilFace::Front, &front);
                apply_stencil(b, StencilFace::Back, &back);
            }
        }
    }

    if blend_changed && style.alpha_to_coverage {
        b.set_capability(Capability::SampleAlphaToCoverage, true);
        b.set_capability(Capability::Blend, false);
    } else if blend_changed {
        b.set_capability(Capability::SampleAlphaToCoverage, false);
    }

    if changed(&|p| p.style.depth_test != style.depth_test) {
        b.set_capability(Capability::DepthTest, true);
        b.depth_func(style.depth_test);
    }

    if changed(&|p| p.style.cull != style.cull) {
        match style.cull {
            CullTestPass::Always => b.set_capability(Capability::CullFace, false),
            CullTestPass::Front => {
                b.set_capability(Capability::CullFace, true);
                b.cull_face(FaceCullingMode::Back);
            }
            CullTestPass::Back => {
                b.set_capability(Capability::CullFace, true);
                b.cull_face(FaceCullingMode::Front);
            }
            CullTestPass::Never => {
                b.set_capability(Capability::CullFace, true);
                b.cull_face(FaceCullingMode::Both);
            }
        }
    }

    if previous.is_none() && !gles {
        b.set_capability(Capability::ProgramPointSize, true);
    }
}

fn apply_stencil(b: &mut dyn Backend, face: StencilFace, style: &StencilStyle) {
    match style.test {
        None => b.set_capability(Capability::StencilTest, false),
        Some(func) => {
            b.set_capability(Capability::StencilTest, true);
            b.stencil_func(face, func, style.reference, style.test_mask);
            b.stencil_op(face, style.fail, style.depth_fail, style.depth_pass);
            b.stencil_mask(face, style.write_mask);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_disables_blending() {
        assert_eq!(BlendMode::Replace.function(), None);

        let over = BlendMode::Over.function().unwrap();
        assert_eq!(over.factors[0], Factor::One);
        assert_eq!(over.factors[1], Factor::SrcAlphaComplement);

        let subtract = BlendMode::Subtract.function().unwrap();
        assert_eq!(
            subtract.equations,
            (Equation::ReverseSubtract, Equation::Additive)
        );
    }

    #[test]
    fn separate_stencil_needs_both_sides() {
        let enabled = StencilStyle {
            test: Some(DepthComparison::Equal),
            reference: 1,
            ..StencilStyle::default()
        };

        assert!(StencilSides::separate(enabled, StencilStyle::default()).is_err());
        assert!(StencilSides::separate(StencilStyle::default(), enabled).is_err());

        let sides = StencilSides::separate(enabled, enabled).unwrap();
        assert_eq!(sides.front().reference, 1);
        assert_eq!(sides.back().test, Some(DepthComparison::Equal));
    }

    #[test]
    fn default_stencil_is_disabled() {
        let style = DrawStyle::default();
        assert!(!style.stencil.front().is_enabled());
        assert_eq!(style.stencil.front().test_mask, 0xff);
    }
}
