use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use parking_lot::RwLock;

use phalanx::{
    BoundingSphere, Camera, DebugEffect, DebugEffectDesc, Device, DirectionalLight, EcsWorld, FftWaves,
    FogFilter, ForwardRenderer, FullscreenFilter, HeadlessDevice, LightingEffect, LightingMaterial,
    LoggingConfig, ParamHandle, PhillipsSpectrum, PointLight, Primitive, RenderContext, RendererConfig,
    SkyBoxEffect, TextureDesc, TextureKind, Viewport, WaterEffect, init_logging, shared,
};

const FRAMES: u32 = 4;

fn main() {
    init_logging(LoggingConfig::new());

    let mut device = HeadlessDevice::new();
    let mut ctx = RenderContext::with_builtin_shaders();
    let config = RendererConfig::new()
        .depth_pass(true)
        .depth_map(true)
        .debug_render(true);
    let mut renderer = ForwardRenderer::new(&mut device, &mut ctx, config);

    let sky_map = device.create_texture(&TextureDesc {
        kind: TextureKind::Cube,
        ..TextureDesc::color(256, 256)
    });
    let sky = shared(SkyBoxEffect::new(&mut ctx).with_environment_map(sky_map));

    let cube_world = ParamHandle::anonymous(Mat4::IDENTITY, false);
    let cube = shared(
        LightingEffect::new(
            &mut ctx,
            &LightingMaterial {
                diffuse_specular: Vec4::new(0.9, 0.3, 0.2, 0.6),
                ..Default::default()
            },
        )
        .with_world(cube_world.clone()),
    );
    let bounds = shared(DebugEffect::new(
        &mut ctx,
        DebugEffectDesc {
            color: Vec4::new(0.2, 1.0, 0.2, 1.0),
            wireframe: true,
            ..Default::default()
        },
    ));

    let waves = FftWaves::new(PhillipsSpectrum::new(64, Vec2::new(6.0, 2.0), Vec2::splat(64.0)));
    let wave_clock = waves.time();
    let water = WaterEffect::new(&mut ctx, waves);
    water.set_environment_map(Some(sky_map));
    let water = shared(water);

    let mut world = EcsWorld::new();
    world.spawn_renderable(Arc::new(Primitive::new(sky, 0..36)), None);
    world.spawn_renderable(
        Arc::new(Primitive::new(cube, 0..36)),
        Some(BoundingSphere::new(Vec3::ZERO, 1.8)),
    );
    world.spawn_renderable(Arc::new(Primitive::new(bounds, 0..24)), None);
    world.spawn_renderable(Arc::new(Primitive::new(water, 0..6)), None);
    world.spawn_light(DirectionalLight::new(Vec3::new(-0.4, -1.0, -0.3)).with_ambient(0.15));
    world.spawn_light(PointLight::new(Vec3::new(2.0, 1.5, 2.0), 6.0));
    let world = RwLock::new(world);

    let fog = Arc::new(FogFilter::new());
    fog.set_fog_color(Vec3::new(0.7, 0.75, 0.8));
    fog.set_fog_density(0.02);

    let _frame_log = renderer.hooks().on_post_render(|camera| {
        log::debug!("camera at {} done", camera.eye_position());
    });

    let viewport = Viewport::new(1280, 720);
    for frame in 0..FRAMES {
        let angle = frame as f32 * std::f32::consts::FRAC_PI_4;
        cube_world.write_values(Mat4::from_rotation_y(angle));
        wave_clock.write_values(frame as f32 / 30.0);

        let eye = Vec3::new(6.0 * angle.cos(), 3.0, 6.0 * angle.sin());
        let camera = Camera::new()
            .with_viewport(viewport)
            .looking_at(eye, Vec3::ZERO, Vec3::Y)
            .with_filter(fog.clone())
            .with_filter(Arc::new(FullscreenFilter::copy()));

        device.reset_counters();
        renderer.render(&mut device, &mut ctx, &world, &camera);
        log::info!(
            "frame {frame}: {} draws, {} program binds, {} uniform uploads",
            device.draws.len(),
            device.program_binds,
            device.uploads.len()
        );
    }

    renderer.release(&mut device);
}
