//! Renderer Frame Tests
//!
//! Tests for:
//! - Shared depth between destination and GBuffer
//! - Ambient occlusion precondition
//! - End-to-end pass counts (10 opaque, 5 transparent, 3 low-res)
//! - Sorted back-to-front blending and its order dependence
//! - Deferred and forward shading agreement
//! - Screen-space copy ordering and refraction
//! - Shadow maps, AO and the peeled second depth layer
//! - Shader cache, shading policy, state restoration

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use glam::{UVec2, Vec3, Vec4};

use myth_hybrid::renderer::core::{RenderDevice, camera_space_depth};
use myth_hybrid::renderer::gbuffer::GBuffer;
use myth_hybrid::scene::lighting::ShadowMap;
use myth_hybrid::{
    AttachmentPoint, Camera, DefaultRenderer, DeviceEvent, FramebufferId, GBufferField, GBufferSpecification, Light,
    LightingEnvironment, QuadSurface, RenderError, RendererSettings, ScreenSpaceAmbientOcclusion, ShadingPolicy,
    SoftwareDevice, Surface, TextureDesc,
};

const EPSILON: f32 = 2e-3;

fn approx_vec(a: Vec4, b: Vec4) -> bool {
    (a - b).abs().max_element() < EPSILON
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn camera() -> Camera {
    Camera::new_perspective(60.0, 0.1, 100.0).looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y)
}

/// Destination with an `Rgba16Float` color target and its own depth.
fn destination(rd: &mut SoftwareDevice, size: u32, clear: wgpu::Color) -> FramebufferId {
    let color = rd.create_texture(&TextureDesc::new("color", size, size, wgpu::TextureFormat::Rgba16Float));
    let depth = rd.create_texture(&TextureDesc::new("depth", size, size, wgpu::TextureFormat::Depth32Float));
    let fb = rd.create_framebuffer("destination");
    rd.set_attachment(fb, AttachmentPoint::COLOR0, Some(color)).unwrap();
    rd.set_attachment(fb, AttachmentPoint::Depth, Some(depth)).unwrap();
    rd.set_clear_color(fb, 0, clear).unwrap();
    fb
}

fn pixel(rd: &SoftwareDevice, fb: FramebufferId, x: u32, y: u32) -> Vec4 {
    let color = rd.attachment(fb, AttachmentPoint::COLOR0).unwrap();
    rd.read_texel(color, x, y).unwrap()
}

fn gray() -> wgpu::Color {
    wgpu::Color {
        r: 0.2,
        g: 0.2,
        b: 0.2,
        a: 1.0,
    }
}

fn unlit() -> LightingEnvironment {
    LightingEnvironment::new(Vec3::ONE)
}

fn draws_in(rd: &SoftwareDevice, group: &str) -> usize {
    rd.events()
        .iter()
        .filter(|e| matches!(e, DeviceEvent::Draw { group: Some(g), .. } if g == group))
        .count()
}

fn launches_of(rd: &SoftwareDevice, name: &str) -> Vec<DeviceEvent> {
    rd.events()
        .iter()
        .filter(|e| matches!(e, DeviceEvent::LaunchShader { name: n, .. } if n == name))
        .cloned()
        .collect()
}

// ============================================================================
// Preconditions & Shared Depth
// ============================================================================

#[test]
fn gbuffer_depth_is_shared_with_destination() -> anyhow::Result<()> {
    init_logging();
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 16, gray());
    let gbuffer = GBuffer::create(&mut rd, "gbuffer", GBufferSpecification::default(), 16, 16)?;
    let surfaces: Vec<Arc<dyn Surface>> = vec![Arc::new(QuadSurface::opaque("wall", Vec3::ZERO, 1.0, Vec3::ONE))];

    let mut renderer = DefaultRenderer::new();
    renderer.render(&mut rd, &camera(), fb, None, &mut unlit(), Some(&gbuffer), &surfaces)?;

    assert_eq!(
        rd.attachment(fb, AttachmentPoint::Depth),
        gbuffer.texture(GBufferField::DepthAndStencil)
    );
    Ok(())
}

#[test]
#[should_panic(expected = "Ambient occlusion is enabled but no ambient occlusion object is bound")]
fn ambient_occlusion_without_object_aborts() {
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 8, gray());
    let mut lighting = unlit();
    lighting.ambient_occlusion_settings.enabled = true;

    let mut renderer = DefaultRenderer::new();
    let _ = renderer.render(&mut rd, &camera(), fb, None, &mut lighting, None, &[]);
}

#[test]
fn invalid_settings_are_rejected() {
    let mut renderer = DefaultRenderer::new();
    let result = renderer.set_settings(RendererSettings {
        oit_low_res_downsample_factor: 0,
        ..Default::default()
    });
    assert!(matches!(result, Err(RenderError::InvalidSettings(_))));
    assert_eq!(renderer.settings().oit_low_res_downsample_factor, 4);
}

#[test]
fn settings_load_from_json_with_defaults() -> anyhow::Result<()> {
    let settings: RendererSettings = serde_json::from_str(r#"{ "order_independent_transparency": true }"#)?;
    assert!(settings.order_independent_transparency);
    assert_eq!(settings.oit_low_res_downsample_factor, 4);
    assert!(settings.oit_high_precision);
    Ok(())
}

// ============================================================================
// End-to-End Pass Structure
// ============================================================================

fn mixed_scene() -> Vec<Arc<dyn Surface>> {
    let mut surfaces: Vec<Arc<dyn Surface>> = Vec::new();
    for i in 0..10 {
        let x = -1.8 + 0.4 * i as f32;
        surfaces.push(Arc::new(QuadSurface::opaque(
            format!("opaque{i}"),
            Vec3::new(x, 0.0, -1.0),
            0.3,
            Vec3::new(0.1 * i as f32, 0.5, 0.5),
        )));
    }
    for i in 0..5 {
        let quad = QuadSurface::transparent(
            format!("glass{i}"),
            Vec3::new(-1.0 + 0.5 * i as f32, 0.0, 0.5),
            0.4,
            Vec3::X,
            0.5,
        )
        .with_low_resolution(i < 3);
        surfaces.push(Arc::new(quad));
    }
    surfaces
}

#[test]
fn end_to_end_pass_counts() -> anyhow::Result<()> {
    init_logging();
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 32, gray());
    let surfaces = mixed_scene();

    let mut renderer = DefaultRenderer::with_settings(RendererSettings {
        order_independent_transparency: true,
        oit_low_res_downsample_factor: 4,
        ..Default::default()
    })?;
    renderer.render(&mut rd, &camera(), fb, None, &mut unlit(), None, &surfaces)?;

    assert_eq!(renderer.lists().sorted_visible.len(), 15);
    assert_eq!(renderer.lists().forward_blended.len(), 5);

    assert_eq!(draws_in(&rd, "GBuffer"), 0);
    assert_eq!(draws_in(&rd, "Forward Opaque"), 10);
    assert_eq!(draws_in(&rd, "OIT Hi-Res"), 2);
    assert_eq!(draws_in(&rd, "OIT Lo-Res"), 3);
    assert_eq!(draws_in(&rd, "Sorted Blending"), 0);

    let upsample = launches_of(&rd, "DefaultRenderer_upsampleOIT");
    assert_eq!(upsample.len(), 1);

    let composite = launches_of(&rd, "DefaultRenderer_compositeWeightedBlendedOIT");
    assert_eq!(composite.len(), 1);
    assert!(matches!(&composite[0], DeviceEvent::LaunchShader { framebuffer, .. } if *framebuffer == fb));
    Ok(())
}

#[test]
fn render_restores_device_state() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 32, gray());
    let mut renderer = DefaultRenderer::with_settings(RendererSettings {
        order_independent_transparency: true,
        ..Default::default()
    })?;
    renderer.render(&mut rd, &camera(), fb, None, &mut unlit(), None, &mixed_scene())?;

    assert_eq!(rd.state_depth(), 0);
    assert_eq!(rd.draw_framebuffer(), None);
    assert_eq!(rd.depth_test(), wgpu::CompareFunction::LessEqual);
    Ok(())
}

// ============================================================================
// Sorted Blending
// ============================================================================

fn overlapping_pair(red_z: f32, blue_z: f32) -> Vec<Arc<dyn Surface>> {
    vec![
        Arc::new(QuadSurface::transparent("red", Vec3::new(0.0, 0.0, red_z), 1.0, Vec3::X, 0.5)),
        Arc::new(QuadSurface::transparent("blue", Vec3::new(0.0, 0.0, blue_z), 1.0, Vec3::Z, 0.5)),
    ]
}

fn render_sorted(surfaces: &[Arc<dyn Surface>]) -> anyhow::Result<(SoftwareDevice, FramebufferId)> {
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 16, gray());
    let mut renderer = DefaultRenderer::new();
    renderer.render(&mut rd, &camera(), fb, None, &mut unlit(), None, surfaces)?;
    Ok((rd, fb))
}

#[test]
fn sorted_blending_draws_back_to_front() -> anyhow::Result<()> {
    let surfaces: Vec<Arc<dyn Surface>> = vec![
        Arc::new(QuadSurface::transparent("near", Vec3::new(0.0, 0.0, 1.0), 1.0, Vec3::X, 0.5)),
        Arc::new(QuadSurface::transparent("far", Vec3::new(0.0, 0.0, -1.0), 1.0, Vec3::Y, 0.5)),
        Arc::new(QuadSurface::transparent("middle", Vec3::ZERO, 1.0, Vec3::Z, 0.5)),
    ];
    let (rd, _) = render_sorted(&surfaces)?;

    let order: Vec<&str> = rd
        .events()
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::Draw { label, group: Some(g), .. } if g == "Sorted Blending" => Some(label.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(order, ["far", "middle", "near"]);
    Ok(())
}

#[test]
fn sorted_blending_composites_over() -> anyhow::Result<()> {
    let (rd, fb) = render_sorted(&overlapping_pair(0.5, 0.0))?;
    // blue over gray, then red over that
    let behind = Vec4::new(0.1, 0.1, 0.5 + 0.1, 1.0);
    let expected = Vec4::new(0.5, 0.0, 0.0, 0.5) + behind * 0.5;
    assert!(approx_vec(pixel(&rd, fb, 8, 8), Vec4::new(expected.x, expected.y, expected.z, 1.0)));
    Ok(())
}

#[test]
fn sorted_blending_depends_on_depth_order() -> anyhow::Result<()> {
    let (rd_a, fb_a) = render_sorted(&overlapping_pair(0.5, 0.0))?;
    let (rd_b, fb_b) = render_sorted(&overlapping_pair(0.0, 0.5))?;
    let a = pixel(&rd_a, fb_a, 8, 8);
    let b = pixel(&rd_b, fb_b, 8, 8);
    assert!(!approx_vec(a, b), "swapping depth order should change the overlap: {a} vs {b}");
    Ok(())
}

// ============================================================================
// Deferred vs Forward
// ============================================================================

fn lit_scene() -> (Vec<Arc<dyn Surface>>, LightingEnvironment) {
    let surfaces: Vec<Arc<dyn Surface>> = vec![
        Arc::new(QuadSurface::opaque(
            "back",
            Vec3::new(0.0, 0.0, -1.0),
            2.0,
            Vec3::new(51.0, 102.0, 204.0) / 255.0,
        )),
        Arc::new(QuadSurface::opaque(
            "front",
            Vec3::new(0.5, 0.5, 0.5),
            0.5,
            Vec3::new(255.0, 153.0, 0.0) / 255.0,
        )),
    ];
    let mut lighting = LightingEnvironment::new(Vec3::splat(0.25));
    lighting
        .lights
        .push(Light::directional("sun", Vec3::NEG_Z, Vec3::new(0.5, 0.5, 0.5)));
    (surfaces, lighting)
}

fn render_lit(deferred: bool) -> anyhow::Result<(SoftwareDevice, FramebufferId, DefaultRenderer)> {
    let (surfaces, mut lighting) = lit_scene();
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 16, wgpu::Color::BLACK);
    let gbuffer = GBuffer::create(&mut rd, "gbuffer", GBufferSpecification::default(), 16, 16)?;
    let mut renderer = DefaultRenderer::with_settings(RendererSettings {
        deferred_shading: deferred,
        ..Default::default()
    })?;
    renderer.render(&mut rd, &camera(), fb, None, &mut lighting, Some(&gbuffer), &surfaces)?;
    Ok((rd, fb, renderer))
}

#[test]
fn deferred_and_forward_shading_agree() -> anyhow::Result<()> {
    init_logging();
    let (rd_f, fb_f, _) = render_lit(false)?;
    let (rd_d, fb_d, renderer) = render_lit(true)?;

    assert!(renderer.lists().forward_opaque.is_empty());
    assert_eq!(launches_of(&rd_d, "DefaultRenderer_deferredShade").len(), 1);
    assert_eq!(draws_in(&rd_d, "Forward Opaque"), 0);

    for y in 0..16 {
        for x in 0..16 {
            let f = pixel(&rd_f, fb_f, x, y);
            let d = pixel(&rd_d, fb_d, x, y);
            assert!(approx_vec(f, d), "pixel ({x}, {y}): forward {f} vs deferred {d}");
        }
    }

    // lambertian · (ambient + light · n·l)
    let back = pixel(&rd_d, fb_d, 4, 8);
    let expected = Vec3::new(51.0, 102.0, 204.0) / 255.0 * 0.75;
    assert!(approx_vec(back, expected.extend(1.0)));
    Ok(())
}

#[test]
fn deferred_without_gbuffer_forward_shades_everything() -> anyhow::Result<()> {
    let (surfaces, mut lighting) = lit_scene();
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 16, wgpu::Color::BLACK);
    let mut renderer = DefaultRenderer::with_settings(RendererSettings {
        deferred_shading: true,
        ..Default::default()
    })?;
    renderer.render(&mut rd, &camera(), fb, None, &mut lighting, None, &surfaces)?;

    assert!(launches_of(&rd, "DefaultRenderer_deferredShade").is_empty());
    assert_eq!(draws_in(&rd, "Forward Opaque"), 2);
    Ok(())
}

#[test]
fn non_representable_surfaces_fall_back_to_forward() -> anyhow::Result<()> {
    let surfaces: Vec<Arc<dyn Surface>> = vec![
        Arc::new(QuadSurface::opaque("plain", Vec3::ZERO, 1.0, Vec3::ONE)),
        Arc::new(QuadSurface::opaque("custom", Vec3::new(1.0, 0.0, 0.0), 0.5, Vec3::ONE).with_gbuffer_support(false)),
    ];
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 16, gray());
    let gbuffer = GBuffer::create(&mut rd, "gbuffer", GBufferSpecification::default(), 16, 16)?;
    let mut renderer = DefaultRenderer::with_settings(RendererSettings {
        deferred_shading: true,
        ..Default::default()
    })?;
    renderer.render(&mut rd, &camera(), fb, None, &mut unlit(), Some(&gbuffer), &surfaces)?;

    assert_eq!(renderer.lists().forward_opaque, vec![1]);
    assert_eq!(draws_in(&rd, "Forward Opaque"), 1);
    Ok(())
}

// ============================================================================
// Screen-Space Buffers & Refraction
// ============================================================================

#[test]
fn screen_space_copy_holds_opaque_frame() -> anyhow::Result<()> {
    let surfaces: Vec<Arc<dyn Surface>> = vec![
        Arc::new(QuadSurface::opaque("wall", Vec3::new(0.0, 0.0, -1.0), 3.0, Vec3::Y)),
        Arc::new(QuadSurface::transparent("glass", Vec3::ZERO, 1.0, Vec3::X, 0.5)),
    ];
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 16, gray());
    let mut lighting = unlit();
    let mut renderer = DefaultRenderer::with_settings(RendererSettings {
        order_independent_transparency: true,
        ..Default::default()
    })?;
    renderer.render(&mut rd, &camera(), fb, None, &mut lighting, None, &surfaces)?;

    let copy = lighting.screen_space_color().expect("screen-space copy");
    assert!(approx_vec(rd.read_texel(copy, 8, 8)?, Vec4::new(0.0, 1.0, 0.0, 1.0)));
    assert!(approx_vec(pixel(&rd, fb, 8, 8), Vec4::new(0.5, 0.5, 0.0, 1.0)));
    Ok(())
}

#[test]
fn refraction_sees_the_opaque_frame_behind_it() -> anyhow::Result<()> {
    let surfaces: Vec<Arc<dyn Surface>> = vec![
        Arc::new(QuadSurface::opaque("wall", Vec3::new(0.0, 0.0, -1.0), 3.0, Vec3::Y)),
        Arc::new(QuadSurface::opaque("lens", Vec3::ZERO, 1.0, Vec3::X).with_refraction(Vec3::ONE)),
    ];
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 16, gray());
    let mut renderer = DefaultRenderer::new();
    renderer.render(&mut rd, &camera(), fb, None, &mut unlit(), None, &surfaces)?;

    assert_eq!(draws_in(&rd, "Forward Opaque"), 1);
    assert_eq!(draws_in(&rd, "Screen-Space Refraction"), 1);
    assert!(approx_vec(pixel(&rd, fb, 8, 8), Vec4::new(0.0, 1.0, 0.0, 1.0)));
    Ok(())
}

// ============================================================================
// Shadowing & Ambient Occlusion
// ============================================================================

#[test]
fn directional_shadow_map_occludes_points_behind_casters() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 16, gray());
    let map = ShadowMap::create(&mut rd, "sun", 64)?;
    let mut lighting = LightingEnvironment::new(Vec3::ZERO);
    lighting
        .lights
        .push(Light::directional("sun", Vec3::NEG_Z, Vec3::ONE).with_shadow_map(map));

    let surfaces: Vec<Arc<dyn Surface>> = vec![
        Arc::new(QuadSurface::opaque("receiver", Vec3::ZERO, 2.0, Vec3::ONE)),
        Arc::new(QuadSurface::opaque("caster", Vec3::new(0.0, 0.0, 1.0), 0.5, Vec3::ONE)),
    ];
    let mut renderer = DefaultRenderer::new();
    renderer.render(&mut rd, &camera(), fb, None, &mut lighting, None, &surfaces)?;

    assert_eq!(draws_in(&rd, "Shadowing"), 2);
    let shadowed = lighting.shade(&rd, Vec3::ZERO, Vec3::Z, Vec3::ONE, Vec3::ZERO, 1.0);
    let lit = lighting.shade(&rd, Vec3::new(0.0, 0.0, 2.0), Vec3::Z, Vec3::ONE, Vec3::ZERO, 1.0);
    assert!(shadowed.length() < 1e-6, "point behind the caster should be dark: {shadowed}");
    assert!((lit - Vec3::ONE).length() < 1e-5, "point in front should be lit: {lit}");
    Ok(())
}

#[test]
fn ambient_occlusion_uses_depth_peel() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 16, gray());
    let gbuffer = GBuffer::create(&mut rd, "gbuffer", GBufferSpecification::default(), 16, 16)?;

    let peel_depth = rd.create_texture(&TextureDesc::new("peel", 4, 4, wgpu::TextureFormat::Depth32Float));
    let peel = rd.create_framebuffer("peel");
    rd.set_attachment(peel, AttachmentPoint::Depth, Some(peel_depth))?;

    let mut lighting = unlit();
    lighting.ambient_occlusion_settings.enabled = true;
    lighting.ambient_occlusion = Some(Box::new(ScreenSpaceAmbientOcclusion::new()));

    let surfaces: Vec<Arc<dyn Surface>> = vec![Arc::new(QuadSurface::opaque("wall", Vec3::ZERO, 1.0, Vec3::ONE))];
    let mut renderer = DefaultRenderer::new();
    renderer.render(&mut rd, &camera(), fb, Some(peel), &mut lighting, Some(&gbuffer), &surfaces)?;

    assert_eq!(rd.framebuffer_size(peel), Some(UVec2::new(16, 16)));
    let main_depth = gbuffer.texture(GBufferField::DepthAndStencil).unwrap();
    assert!(rd.read_texel(main_depth, 8, 8)?.x < 1.0);
    // Nothing lies behind the only surface.
    assert_eq!(rd.read_texel(peel_depth, 8, 8)?.x, 1.0);
    assert_eq!(draws_in(&rd, "Depth Peel"), 1);

    let ao = launches_of(&rd, "AmbientOcclusion_estimate");
    assert!(matches!(&ao[..], [DeviceEvent::LaunchShader { group: Some(g), .. }] if g == "Shadowing"));
    assert!(lighting.ambient_occlusion_texture().is_some());
    Ok(())
}

/// Visibility at wall pixel (2, 8) and the peeled camera-space depths at
/// (6, 8) and (2, 8).
fn peeled_occlusion(use_depth_peel_buffer: bool, separation: f32) -> anyhow::Result<(f32, f32, Vec4)> {
    // "hidden" sits entirely behind "front"; pixel (6, 8) sees front, (2, 8)
    // sees the wall.
    let surfaces: Vec<Arc<dyn Surface>> = vec![
        Arc::new(QuadSurface::opaque("wall", Vec3::ZERO, 10.0, Vec3::ONE)),
        Arc::new(QuadSurface::opaque("hidden", Vec3::new(0.0, 0.0, 1.0), 0.6, Vec3::ONE)),
        Arc::new(QuadSurface::opaque("front", Vec3::new(0.0, 0.0, 3.0), 0.5, Vec3::ONE)),
    ];

    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 16, gray());
    let gbuffer = GBuffer::create(&mut rd, "gbuffer", GBufferSpecification::default(), 16, 16)?;
    let peel_depth = rd.create_texture(&TextureDesc::new("peel", 16, 16, wgpu::TextureFormat::Depth32Float));
    let peel = rd.create_framebuffer("peel");
    rd.set_attachment(peel, AttachmentPoint::Depth, Some(peel_depth))?;

    let mut lighting = unlit();
    lighting.ambient_occlusion_settings.enabled = true;
    lighting.ambient_occlusion_settings.use_depth_peel_buffer = use_depth_peel_buffer;
    lighting.ambient_occlusion_settings.depth_peel_separation_hint = separation;
    lighting.ambient_occlusion = Some(Box::new(ScreenSpaceAmbientOcclusion::new()));

    let mut renderer = DefaultRenderer::new();
    renderer.render(&mut rd, &camera(), fb, Some(peel), &mut lighting, Some(&gbuffer), &surfaces)?;

    let ao = lighting
        .ambient_occlusion_texture()
        .ok_or_else(|| anyhow::anyhow!("ambient occlusion was not computed"))?;
    let projection = camera().projection_matrix(1.0);
    let behind_front = camera_space_depth(projection, rd.read_texel(peel_depth, 6, 8)?.x);
    Ok((rd.read_texel(ao, 2, 8)?.x, behind_front, rd.read_texel(peel_depth, 2, 8)?))
}

#[test]
fn depth_peel_exposes_occluders_behind_the_front_layer() -> anyhow::Result<()> {
    init_logging();

    // The front quad is too far in front of the wall to occlude it.
    let (without_peel, _, _) = peeled_occlusion(false, 0.01)?;
    assert!((without_peel - 1.0).abs() < 1e-3, "unpeeled visibility {without_peel}");

    // Behind it, the hidden quad is in range for one of eight taps.
    let (with_peel, behind_front, behind_wall) = peeled_occlusion(true, 0.01)?;
    assert!((behind_front - 4.0).abs() < 1e-3, "second layer at {behind_front}");
    assert_eq!(behind_wall.x, 1.0);
    assert!((with_peel - 0.875).abs() < 5e-3, "peeled visibility {with_peel}");
    Ok(())
}

#[test]
fn depth_peel_separation_skips_close_layers() -> anyhow::Result<()> {
    // A 2.5 unit gap skips the hidden quad (2 units behind) and finds the wall.
    let (visibility, behind_front, _) = peeled_occlusion(true, 2.5)?;
    assert!((behind_front - 5.0).abs() < 1e-3, "second layer at {behind_front}");
    assert!((visibility - 1.0).abs() < 1e-3, "visibility {visibility}");
    Ok(())
}

// ============================================================================
// Shader Cache & Policy
// ============================================================================

#[test]
fn programs_resolve_once_across_frames() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 32, gray());
    let gbuffer = GBuffer::create(&mut rd, "gbuffer", GBufferSpecification::default(), 32, 32)?;
    let mut renderer = DefaultRenderer::with_settings(RendererSettings {
        deferred_shading: true,
        order_independent_transparency: true,
        ..Default::default()
    })?;
    let surfaces = mixed_scene();

    for _ in 0..2 {
        renderer.render(&mut rd, &camera(), fb, None, &mut unlit(), Some(&gbuffer), &surfaces)?;
    }

    let resolved: Vec<&str> = rd
        .events()
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::ResolveShader { name } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(resolved.len(), 4, "resolved: {resolved:?}");
    assert!(resolved.contains(&"DefaultRenderer_downsampleNormal"));
    assert_eq!(renderer.shader_cache().len(), 4);
    Ok(())
}

#[test]
fn unknown_program_propagates_and_restores_state() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 16, gray());
    let gbuffer = GBuffer::create(&mut rd, "gbuffer", GBufferSpecification::default(), 16, 16)?;
    let mut renderer = DefaultRenderer::with_settings(RendererSettings {
        deferred_shading: true,
        ..Default::default()
    })?;
    renderer.set_name("Custom");
    let surfaces: Vec<Arc<dyn Surface>> = vec![Arc::new(QuadSurface::opaque("wall", Vec3::ZERO, 1.0, Vec3::ONE))];

    let result = renderer.render(&mut rd, &camera(), fb, None, &mut unlit(), Some(&gbuffer), &surfaces);
    assert_eq!(result, Err(RenderError::ShaderNotFound("Custom_deferredShade".to_string())));
    assert_eq!(rd.state_depth(), 0);
    Ok(())
}

struct CountingPolicy {
    indirect: Arc<AtomicUsize>,
}

impl ShadingPolicy for CountingPolicy {
    fn compute_indirect_illumination(
        &self,
        _rd: &mut dyn RenderDevice,
        _lighting: &LightingEnvironment,
        _gbuffer: &GBuffer,
    ) -> myth_hybrid::Result<()> {
        self.indirect.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn shading_policy_runs_before_deferred_shading() -> anyhow::Result<()> {
    let indirect = Arc::new(AtomicUsize::new(0));
    let mut rd = SoftwareDevice::new();
    let fb = destination(&mut rd, 16, gray());
    let gbuffer = GBuffer::create(&mut rd, "gbuffer", GBufferSpecification::default(), 16, 16)?;
    let surfaces: Vec<Arc<dyn Surface>> = vec![Arc::new(QuadSurface::opaque("wall", Vec3::ZERO, 1.0, Vec3::ONE))];

    let mut renderer = DefaultRenderer::new();
    renderer.set_shading_policy(Box::new(CountingPolicy {
        indirect: Arc::clone(&indirect),
    }));

    renderer.render(&mut rd, &camera(), fb, None, &mut unlit(), Some(&gbuffer), &surfaces)?;
    assert_eq!(indirect.load(Ordering::SeqCst), 0);

    renderer.set_settings(RendererSettings {
        deferred_shading: true,
        ..Default::default()
    })?;
    renderer.render(&mut rd, &camera(), fb, None, &mut unlit(), Some(&gbuffer), &surfaces)?;
    assert_eq!(indirect.load(Ordering::SeqCst), 1);
    Ok(())
}
