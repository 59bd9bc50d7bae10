use draw_glow::{
    ColorBufferDescriptor, ColorFormat, ColorRGBa, ColorType, DepthBufferDescriptor, DepthFormat,
    Driver, DriverConfiguration, Error, RenderTargetDescriptor, SoftBackend,
};

fn driver() -> Driver {
    let _ = env_logger::builder().is_test(true).try_init();
    Driver::new(
        Box::new(SoftBackend::new(32, 32)),
        DriverConfiguration::default(),
    )
    .unwrap()
}

fn color_buffer_desc(width: u32, height: u32, levels: u32) -> ColorBufferDescriptor {
    ColorBufferDescriptor {
        levels,
        ..ColorBufferDescriptor::new(width, height)
    }
}

#[test]
fn attachments_match_the_target_size_at_every_level() {
    let driver = driver();
    let (width, height) = (8, 6);

    for level in 0..3u32 {
        let target = driver
            .create_render_target(&RenderTargetDescriptor::new(width, height), None)
            .unwrap();

        let fitting = driver
            .create_color_buffer(
                &color_buffer_desc(width << level, height << level, level + 1),
                None,
            )
            .unwrap();
        target.attach(&fitting, level).unwrap();
        assert_eq!(target.color_attachment_count(), 1);

        // one pixel off in either direction at the attached level
        for &(dw, dh) in &[(-1i32, 0i32), (1, 0), (0, -1), (0, 1)] {
            let w = (width as i32 + dw) as u32;
            let h = (height as i32 + dh) as u32;
            let off = driver
                .create_color_buffer(&color_buffer_desc(w << level, h << level, level + 1), None)
                .unwrap();

            let err = target.attach(&off, level).unwrap_err();
            match err {
                Error::DimensionMismatch {
                    expected_width,
                    expected_height,
                    actual_width,
                    actual_height,
                    ..
                } => {
                    assert_eq!((expected_width, expected_height), (width, height));
                    assert_eq!((actual_width, actual_height), (w, h));
                }
                other => panic!("unexpected error: {}", other),
            }
        }

        assert_eq!(target.color_attachment_count(), 1);
    }
}

#[test]
fn depth_attachments_are_checked_too() {
    let driver = driver();
    let target = driver
        .create_render_target(&RenderTargetDescriptor::new(8, 8), None)
        .unwrap();

    let small = driver
        .create_depth_buffer(&DepthBufferDescriptor::new(8, 7), None)
        .unwrap();
    assert!(matches!(
        target.attach_depth_buffer(&small).unwrap_err(),
        Error::DimensionMismatch { .. }
    ));
    assert!(target.depth_buffer().is_none());

    let depth = target.add_depth_buffer(DepthFormat::Depth24Stencil8).unwrap();
    assert_eq!(target.depth_buffer(), Some(depth));
}

#[test]
fn incomplete_attachments_are_rolled_back() {
    let driver = driver();
    let target = driver
        .create_render_target(&RenderTargetDescriptor::new(8, 8), None)
        .unwrap();

    let compressed = driver
        .create_color_buffer(
            &ColorBufferDescriptor {
                ty: ColorType::DXT1,
                ..ColorBufferDescriptor::new(8, 8)
            },
            None,
        )
        .unwrap();
    assert!(matches!(
        target.attach(&compressed, 0).unwrap_err(),
        Error::IncompleteFramebuffer(_)
    ));
    assert_eq!(target.color_attachment_count(), 0);

    // the target still accepts a renderable attachment in the freed slot
    let color = target
        .add_color_buffer(ColorFormat::RGBa, ColorType::UINT8)
        .unwrap();
    assert_eq!(target.color_attachment_count(), 1);
    assert_eq!(target.color_buffer(0).unwrap(), color);

    target.clear(ColorRGBa::RED).unwrap();
    let mut pixel = [0u8; 4];
    color
        .read_region(
            &mut pixel,
            ColorFormat::RGBa,
            ColorType::UINT8,
            0,
            draw_glow::backend::Region::rect(0, 0, 1, 1),
        )
        .unwrap();
    assert_eq!(pixel, [255, 0, 0, 255]);
}

#[test]
fn zero_sized_targets_are_refused() {
    let driver = driver();
    let err = driver
        .create_render_target(&RenderTargetDescriptor::new(0, 4), None)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidDimensions { .. }));
}

#[test]
fn bind_stack_nests() {
    let driver = driver();
    let context = driver.context();
    let outer = driver
        .create_render_target(&RenderTargetDescriptor::new(8, 8), None)
        .unwrap();
    let inner = driver
        .create_render_target(&RenderTargetDescriptor::new(4, 2), None)
        .unwrap();
    outer.add_color_buffer(ColorFormat::RGBa, ColorType::UINT8).unwrap();
    inner.add_color_buffer(ColorFormat::RGBa, ColorType::UINT8).unwrap();

    assert!(driver.active_render_target().unwrap().is_program_target());

    outer.bind().unwrap();
    assert_eq!(context.device_state().unwrap().viewport, [0, 0, 8, 8]);
    inner.bind().unwrap();
    assert_eq!(driver.active_render_target().unwrap(), inner);
    assert_eq!(context.device_state().unwrap().viewport, [0, 0, 4, 2]);

    assert!(matches!(outer.bind().unwrap_err(), Error::AlreadyBound));
    assert!(matches!(outer.unbind().unwrap_err(), Error::NotOnTop));

    inner.unbind().unwrap();
    assert_eq!(driver.active_render_target().unwrap(), outer);
    assert_eq!(context.device_state().unwrap().viewport, [0, 0, 8, 8]);

    outer.unbind().unwrap();
    assert!(matches!(outer.unbind().unwrap_err(), Error::NotBound));
    assert!(driver.active_render_target().unwrap().is_program_target());
    assert_eq!(context.device_state().unwrap().viewport, [0, 0, 32, 32]);
}

#[test]
fn destroying_a_bound_target_restores_the_previous_one() {
    let driver = driver();
    let target = driver
        .create_render_target(&RenderTargetDescriptor::new(8, 8), None)
        .unwrap();
    target.bind().unwrap();

    target.destroy().unwrap();
    assert!(target.is_destroyed());
    assert!(driver.active_render_target().unwrap().is_program_target());
    assert!(matches!(target.bind().unwrap_err(), Error::Destroyed(_)));
}

#[test]
fn clearing_fills_every_pixel() {
    let driver = driver();
    let target = driver
        .create_render_target(&RenderTargetDescriptor::new(4, 4), None)
        .unwrap();
    let color = target
        .add_color_buffer(ColorFormat::RGBa, ColorType::UINT8)
        .unwrap();

    target.bind().unwrap();
    driver.clear(ColorRGBa::RED).unwrap();
    target.unbind().unwrap();

    let mut pixels = vec![0u8; 4 * 4 * 4];
    color
        .read(&mut pixels, ColorFormat::RGBa, ColorType::UINT8, 0)
        .unwrap();
    for pixel in pixels.chunks_exact(4) {
        assert_eq!(pixel, [255, 0, 0, 255]);
    }
}

#[test]
fn clearing_an_unbound_target_leaves_the_active_one_alone() {
    let driver = driver();
    let active = driver
        .create_render_target(&RenderTargetDescriptor::new(2, 2), None)
        .unwrap();
    let other = driver
        .create_render_target(&RenderTargetDescriptor::new(2, 2), None)
        .unwrap();
    let active_color = active
        .add_color_buffer(ColorFormat::RGBa, ColorType::UINT8)
        .unwrap();
    let other_color = other
        .add_color_buffer(ColorFormat::RGBa, ColorType::UINT8)
        .unwrap();

    active.bind().unwrap();
    active.clear(ColorRGBa::BLACK).unwrap();
    other.clear(ColorRGBa::WHITE).unwrap();
    active.unbind().unwrap();

    let mut pixels = vec![0u8; 16];
    active_color
        .read(&mut pixels, ColorFormat::RGBa, ColorType::UINT8, 0)
        .unwrap();
    assert_eq!(&pixels[..4], &[0, 0, 0, 255]);

    other_color
        .read(&mut pixels, ColorFormat::RGBa, ColorType::UINT8, 0)
        .unwrap();
    assert_eq!(&pixels[..4], &[255, 255, 255, 255]);
}

#[test]
fn resolving_copies_every_attachment() {
    let driver = driver();
    let source = driver
        .create_render_target(&RenderTargetDescriptor::new(2, 2), None)
        .unwrap();
    let destination = driver
        .create_render_target(&RenderTargetDescriptor::new(2, 2), None)
        .unwrap();
    source.add_color_buffer(ColorFormat::RGBa, ColorType::UINT8).unwrap();
    let resolved = destination
        .add_color_buffer(ColorFormat::RGBa, ColorType::UINT8)
        .unwrap();

    source.clear(ColorRGBa::RED).unwrap();
    source.resolve_to(&destination).unwrap();

    let mut pixels = vec![0u8; 16];
    resolved
        .read(&mut pixels, ColorFormat::RGBa, ColorType::UINT8, 0)
        .unwrap();
    assert_eq!(&pixels[12..], &[255, 0, 0, 255]);

    let larger = driver
        .create_render_target(&RenderTargetDescriptor::new(4, 4), None)
        .unwrap();
    assert!(matches!(
        source.resolve_to(&larger).unwrap_err(),
        Error::DimensionMismatch { .. }
    ));
}
