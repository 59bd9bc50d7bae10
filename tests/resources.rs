use approx::assert_relative_eq;
use draw_glow::backend::Region;
use draw_glow::{
    ColorBufferDescriptor, ColorFormat, ColorRGBa, ColorType, Driver, DriverConfiguration, Error,
    IndexType, Session, SoftBackend, VertexFormat,
};

fn driver() -> Driver {
    let _ = env_logger::builder().is_test(true).try_init();
    Driver::new(
        Box::new(SoftBackend::new(16, 16)),
        DriverConfiguration::default(),
    )
    .unwrap()
}

#[test]
fn rgba8_texels_survive_a_round_trip() {
    let driver = driver();
    let buffer = driver
        .create_color_buffer(&ColorBufferDescriptor::new(2, 2), None)
        .unwrap();

    let texels: Vec<u8> = (0..4).flat_map(|_| vec![255u8, 128, 0, 255]).collect();
    buffer
        .write(&texels, ColorFormat::RGBa, ColorType::UINT8, 0)
        .unwrap();

    let mut out = vec![0u8; texels.len()];
    buffer
        .read(&mut out, ColorFormat::RGBa, ColorType::UINT8, 0)
        .unwrap();
    assert_eq!(out, texels);
}

#[test]
fn float_texels_survive_a_round_trip() {
    let driver = driver();
    let desc = ColorBufferDescriptor {
        ty: ColorType::FLOAT32,
        ..ColorBufferDescriptor::new(3, 1)
    };
    let buffer = driver.create_color_buffer(&desc, None).unwrap();

    let texels: Vec<f32> = (0..3).flat_map(|_| vec![1.0f32, 0.5, 0.25, 1.0]).collect();
    buffer
        .write(
            bytemuck::cast_slice(&texels),
            ColorFormat::RGBa,
            ColorType::FLOAT32,
            0,
        )
        .unwrap();

    let mut out = vec![0u8; texels.len() * 4];
    buffer
        .read(&mut out, ColorFormat::RGBa, ColorType::FLOAT32, 0)
        .unwrap();
    let read: Vec<f32> = out.chunks_exact(4).map(bytemuck::pod_read_unaligned).collect();

    for (expected, actual) in texels.iter().zip(&read) {
        assert_relative_eq!(*expected, *actual);
    }
}

#[test]
fn short_uploads_are_refused() {
    let driver = driver();
    let buffer = driver
        .create_color_buffer(&ColorBufferDescriptor::new(2, 2), None)
        .unwrap();

    let err = buffer
        .write(&[0u8; 15], ColorFormat::RGBa, ColorType::UINT8, 0)
        .unwrap_err();
    assert!(matches!(err, Error::NotEnoughData { .. }));
}

#[test]
fn regions_past_the_edge_are_refused() {
    let driver = driver();
    let buffer = driver
        .create_color_buffer(&ColorBufferDescriptor::new(2, 2), None)
        .unwrap();
    let texels = [0u8; 8];

    // the offset plus the extent wraps around u32
    for &region in &[
        Region::rect(u32::MAX, 0, 2, 1),
        Region::rect(0, u32::MAX, 2, 1),
        Region::rect(1, 0, 2, 1),
    ] {
        let err = buffer
            .write_region(&texels, ColorFormat::RGBa, ColorType::UINT8, 0, region)
            .unwrap_err();
        assert!(matches!(err, Error::Usage(_)), "{:?}", region);
    }

    let mut region = Region::rect(0, 0, 1, 1);
    region.z = u32::MAX;
    let mut out = [0u8; 4];
    assert!(matches!(
        buffer
            .read_region(&mut out, ColorFormat::RGBa, ColorType::UINT8, 0, region)
            .unwrap_err(),
        Error::Usage(_)
    ));

    buffer
        .write_region(&texels, ColorFormat::RGBa, ColorType::UINT8, 0, Region::rect(0, 1, 2, 1))
        .unwrap();
}

#[test]
fn shadows_mirror_the_device() {
    let driver = driver();
    let buffer = driver
        .create_color_buffer(&ColorBufferDescriptor::new(2, 2), None)
        .unwrap();
    buffer.fill(ColorRGBa::RED, 0).unwrap();

    let shadow = buffer.shadow().unwrap();
    shadow.download().unwrap();
    let pixel = shadow.read(1, 1).unwrap().to_array();
    assert_relative_eq!(pixel[0], 1.0);
    assert_relative_eq!(pixel[1], 0.0);
    assert_relative_eq!(pixel[3], 1.0);

    shadow.write(0, 0, ColorRGBa::WHITE).unwrap();
    shadow.upload().unwrap();
    shadow.download().unwrap();
    assert_relative_eq!(shadow.read(0, 0).unwrap().to_array()[1], 1.0);

    buffer.destroy().unwrap();
    assert!(shadow.download().is_err());
}

#[test]
fn ending_a_session_destroys_what_it_tracks() {
    let driver = driver();
    let root = Session::root(driver.context()).unwrap();
    let child = root.fork("frame").unwrap();
    child.push().unwrap();

    let color = driver
        .create_color_buffer(&ColorBufferDescriptor::new(4, 4), None)
        .unwrap();
    let vertices = driver
        .create_dynamic_vertex_buffer(&VertexFormat::new().position(3), 3, None)
        .unwrap();
    let indices = driver
        .create_dynamic_index_buffer(IndexType::INT16, 3, None)
        .unwrap();
    let kept = driver
        .create_color_buffer(&ColorBufferDescriptor::new(4, 4), Some(&root))
        .unwrap();

    let stats = child.statistics();
    assert_eq!(stats.color_buffers, 1);
    assert_eq!(stats.vertex_buffers, 1);
    assert_eq!(stats.index_buffers, 1);
    assert_eq!(stats.total(), 3);
    assert!(root.is_tracking(&kept));

    child.pop().unwrap();
    child.end().unwrap();

    assert!(child.has_ended());
    assert!(color.is_destroyed());
    assert!(vertices.is_destroyed());
    assert!(indices.is_destroyed());
    assert!(!kept.is_destroyed());
    assert_eq!(Session::active(driver.context()).unwrap(), root);

    // ended sessions refuse new resources
    let late = driver
        .create_color_buffer(&ColorBufferDescriptor::new(4, 4), Some(&child))
        .unwrap_err();
    assert!(matches!(late, Error::SessionEnded(_)));
}

#[test]
fn nested_sessions_end_with_their_parent() {
    let driver = driver();
    let outer = Session::root(driver.context())
        .unwrap()
        .fork("outer")
        .unwrap();
    let inner = outer.fork("inner").unwrap();

    let buffer = driver
        .create_color_buffer(&ColorBufferDescriptor::new(4, 4), Some(&inner))
        .unwrap();

    outer.end().unwrap();
    assert!(inner.has_ended());
    assert!(buffer.is_destroyed());
}

#[test]
fn ending_a_parent_deactivates_its_children() {
    let driver = driver();
    let root = Session::root(driver.context()).unwrap();
    let parent = root.fork("parent").unwrap();
    let child = parent.fork("child").unwrap();
    parent.push().unwrap();
    child.push().unwrap();

    parent.end().unwrap();
    assert!(child.has_ended());

    let active = driver.context().active_session().unwrap();
    assert_ne!(active, child);
    assert_eq!(active, root);
    assert!(child.pop().is_err());

    let buffer = driver
        .create_color_buffer(&ColorBufferDescriptor::new(4, 4), None)
        .unwrap();
    assert!(root.is_tracking(&buffer));
}

#[test]
fn untracked_resources_outlive_their_session() {
    let driver = driver();
    let session = Session::root(driver.context())
        .unwrap()
        .fork("scratch")
        .unwrap();

    let buffer = driver
        .create_color_buffer(&ColorBufferDescriptor::new(4, 4), Some(&session))
        .unwrap();
    session.untrack(&buffer);
    session.untrack(&buffer);
    assert!(!session.is_tracking(&buffer));

    session.end().unwrap();
    assert!(!buffer.is_destroyed());

    buffer.destroy().unwrap();
    // destroying twice is a no-op
    buffer.destroy().unwrap();
}

#[test]
fn destroyed_resources_refuse_work() {
    let driver = driver();
    let buffer = driver
        .create_color_buffer(&ColorBufferDescriptor::new(4, 4), None)
        .unwrap();
    buffer.destroy().unwrap();

    let err = buffer.fill(ColorRGBa::RED, 0).unwrap_err();
    assert!(matches!(err, Error::Destroyed(_)));
}

#[test]
fn destroying_the_context_ends_the_root_session() {
    let driver = driver();
    let buffer = driver
        .create_color_buffer(&ColorBufferDescriptor::new(4, 4), None)
        .unwrap();

    driver.destroy_context().unwrap();
    assert!(buffer.is_destroyed());
    assert!(driver.context().is_destroyed());
}
