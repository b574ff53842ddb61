//! Software Device Tests
//!
//! Tests for:
//! - Draw coverage and depth testing
//! - Blend state reset on framebuffer bind
//! - State stack and 2D mode
//! - Program launches, guard bands and launch rectangles
//! - Blits, nearest copies and their errors
//! - Event log grouping

use glam::{IVec2, UVec2, Vec2, Vec4};

use myth_hybrid::renderer::core::{DepthPeel, PixelRect, debug_group, scoped_2d, scoped_state};
use myth_hybrid::renderer::software::{FragmentContext, FragmentOutput};
use myth_hybrid::{
    Args, AttachmentPoint, BlitMask, DeviceEvent, DrawCall, FramebufferId, RenderDevice, RenderError, ScreenRect,
    SoftwareDevice, TextureDesc, TextureId,
};

fn target(rd: &mut SoftwareDevice, size: u32) -> (FramebufferId, TextureId, TextureId) {
    let color = rd.create_texture(&TextureDesc::new("color", size, size, wgpu::TextureFormat::Rgba32Float));
    let depth = rd.create_texture(&TextureDesc::new("depth", size, size, wgpu::TextureFormat::Depth32Float));
    let fb = rd.create_framebuffer("target");
    rd.set_attachment(fb, AttachmentPoint::COLOR0, Some(color)).unwrap();
    rd.set_attachment(fb, AttachmentPoint::Depth, Some(depth)).unwrap();
    (fb, color, depth)
}

fn covered(rd: &SoftwareDevice, texture: TextureId, size: u32) -> Vec<(u32, u32)> {
    let mut out = Vec::new();
    for y in 0..size {
        for x in 0..size {
            if rd.read_texel(texture, x, y).unwrap() != Vec4::ZERO {
                out.push((x, y));
            }
        }
    }
    out
}

fn solid_white(_frag: &FragmentContext<'_>) -> Option<FragmentOutput> {
    Some(FragmentOutput::color(Vec4::ONE))
}

fn copy_source(frag: &FragmentContext<'_>) -> Option<FragmentOutput> {
    let v = frag.fetch("source", frag.pixel.as_ivec2() - IVec2::X) + Vec4::splat(0.5);
    Some(FragmentOutput::color(v))
}

// ============================================================================
// Rasterization
// ============================================================================

#[test]
fn draw_covers_pixel_centers_inside_rect() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    let (fb, color, _) = target(&mut rd, 8);

    scoped_state(&mut rd, Some(fb), |rd| {
        rd.clear(true, true)?;
        let rect = ScreenRect::new(Vec2::splat(0.25), Vec2::splat(0.75));
        rd.draw(&DrawCall::new("quad", rect, 0.5).with_output(AttachmentPoint::COLOR0, Vec4::ONE))
    })?;

    let pixels = covered(&rd, color, 8);
    assert_eq!(pixels.len(), 16);
    assert!(pixels.iter().all(|&(x, y)| (2..6).contains(&x) && (2..6).contains(&y)));
    assert_eq!(rd.stats().fragments_written, 16);
    Ok(())
}

#[test]
fn depth_test_rejects_farther_fragments() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    let (fb, color, depth) = target(&mut rd, 4);
    let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
    let blue = Vec4::new(0.0, 0.0, 1.0, 1.0);

    scoped_state(&mut rd, Some(fb), |rd| {
        rd.clear(true, true)?;
        rd.draw(&DrawCall::new("near", ScreenRect::FULL, 0.3).with_output(AttachmentPoint::COLOR0, red))?;
        rd.draw(&DrawCall::new("far", ScreenRect::FULL, 0.6).with_output(AttachmentPoint::COLOR0, blue))
    })?;

    assert_eq!(rd.read_texel(color, 1, 1)?, red);
    assert!((rd.read_texel(depth, 1, 1)?.x - 0.3).abs() < 1e-6);
    Ok(())
}

#[test]
fn depth_only_draw_writes_no_color() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    let (fb, color, depth) = target(&mut rd, 4);

    scoped_state(&mut rd, Some(fb), |rd| {
        rd.clear(true, true)?;
        rd.draw(&DrawCall::new("occluder", ScreenRect::FULL, 0.25))
    })?;

    assert!(covered(&rd, color, 4).is_empty());
    assert!((rd.read_texel(depth, 0, 0)?.x - 0.25).abs() < 1e-6);
    Ok(())
}

// ============================================================================
// State
// ============================================================================

#[test]
fn binding_a_framebuffer_resets_blending() {
    let mut rd = SoftwareDevice::new();
    let (fb, _, _) = target(&mut rd, 4);

    rd.set_framebuffer(Some(fb));
    rd.set_blend(AttachmentPoint::COLOR0, Some(wgpu::BlendState::ALPHA_BLENDING));
    assert!(rd.blend(AttachmentPoint::COLOR0).is_some());

    rd.set_framebuffer(Some(fb));
    assert_eq!(rd.blend(AttachmentPoint::COLOR0), None);
}

#[test]
fn push_state_without_framebuffer_keeps_binding_and_blend() {
    let mut rd = SoftwareDevice::new();
    let (fb, _, _) = target(&mut rd, 4);
    rd.set_framebuffer(Some(fb));
    rd.set_blend(AttachmentPoint::COLOR0, Some(wgpu::BlendState::ALPHA_BLENDING));

    rd.push_state(None);
    assert_eq!(rd.draw_framebuffer(), Some(fb));
    assert!(rd.blend(AttachmentPoint::COLOR0).is_some());
    rd.set_depth_write(false);
    rd.pop_state();

    assert!(rd.depth_write());
    assert_eq!(rd.state_depth(), 0);
}

#[test]
fn two_d_mode_disables_depth_and_restores() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    let (fb, _, depth) = target(&mut rd, 4);
    let peel = DepthPeel {
        first_layer: depth,
        min_separation: 0.5,
    };
    rd.set_depth_peel(Some(peel));

    scoped_2d(&mut rd, Some(fb), |rd| {
        assert_eq!(rd.depth_test(), wgpu::CompareFunction::Always);
        assert!(!rd.depth_write());
        assert_eq!(rd.depth_peel(), None);
        Ok(())
    })?;

    assert_eq!(rd.draw_framebuffer(), None);
    assert_eq!(rd.depth_test(), wgpu::CompareFunction::LessEqual);
    assert!(rd.depth_write());
    assert_eq!(rd.depth_peel(), Some(peel));
    Ok(())
}

#[test]
fn scoped_state_pops_on_error() {
    let mut rd = SoftwareDevice::new();
    let (fb, _, _) = target(&mut rd, 4);

    let result: myth_hybrid::Result<()> = scoped_state(&mut rd, Some(fb), |rd| {
        rd.resolve_shader("missing")?;
        Ok(())
    });

    assert_eq!(result, Err(RenderError::ShaderNotFound("missing".to_string())));
    assert_eq!(rd.state_depth(), 0);
    assert_eq!(rd.draw_framebuffer(), None);
}

#[test]
fn clear_without_framebuffer_is_an_error() {
    let mut rd = SoftwareDevice::new();
    assert!(matches!(rd.clear(true, true), Err(RenderError::NoFramebufferBound(_))));
}

// ============================================================================
// Program Launches
// ============================================================================

#[test]
fn launch_respects_guard_band() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    rd.library_mut().register("solid", solid_white);
    let (fb, color, _) = target(&mut rd, 8);
    let shader = rd.resolve_shader("solid")?;

    scoped_2d(&mut rd, Some(fb), |rd| {
        rd.set_guard_band_clip_2d(2);
        rd.launch_shader(shader, &Args::new())
    })?;

    let pixels = covered(&rd, color, 8);
    assert_eq!(pixels.len(), 16);
    assert!(pixels.iter().all(|&(x, y)| (2..6).contains(&x) && (2..6).contains(&y)));
    Ok(())
}

#[test]
fn launch_rect_limits_region() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    rd.library_mut().register("solid", solid_white);
    let (fb, color, _) = target(&mut rd, 8);
    let shader = rd.resolve_shader("solid")?;

    let mut args = Args::new();
    args.set_rect(PixelRect {
        min: IVec2::new(0, 0),
        max: IVec2::new(3, 1),
    });
    scoped_2d(&mut rd, Some(fb), |rd| rd.launch_shader(shader, &args))?;

    assert_eq!(covered(&rd, color, 8), vec![(0, 0), (1, 0), (2, 0)]);
    Ok(())
}

#[test]
fn launch_reads_before_writing() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    rd.library_mut().register("copy", copy_source);
    let (fb, color, _) = target(&mut rd, 4);
    let shader = rd.resolve_shader("copy")?;

    // Reading the bound target while writing it sees only the old values.
    let mut args = Args::new();
    args.set_texture("source", color, myth_hybrid::Sampler::Nearest);
    scoped_2d(&mut rd, Some(fb), |rd| rd.launch_shader(shader, &args))?;

    assert_eq!(rd.read_texel(color, 3, 3)?, Vec4::splat(0.5));
    Ok(())
}

#[test]
fn unknown_program_is_reported() {
    let mut rd = SoftwareDevice::new();
    assert_eq!(
        rd.resolve_shader("Nope_shade"),
        Err(RenderError::ShaderNotFound("Nope_shade".to_string()))
    );
    assert!(rd.resolve_shader("DefaultRenderer_compositeWeightedBlendedOIT").is_ok());
}

// ============================================================================
// Copies
// ============================================================================

#[test]
fn blit_copies_color_and_depth() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    let (src, src_color, src_depth) = target(&mut rd, 4);
    let (dst, dst_color, dst_depth) = target(&mut rd, 4);
    rd.write_texel(src_color, 1, 2, Vec4::new(0.25, 0.5, 0.75, 1.0))?;
    rd.write_texel(src_depth, 1, 2, Vec4::new(0.4, 0.0, 0.0, 1.0))?;

    rd.blit(src, dst, BlitMask::COLOR | BlitMask::DEPTH)?;

    assert_eq!(rd.read_texel(dst_color, 1, 2)?, Vec4::new(0.25, 0.5, 0.75, 1.0));
    assert!((rd.read_texel(dst_depth, 1, 2)?.x - 0.4).abs() < 1e-6);
    Ok(())
}

#[test]
fn blit_between_sizes_is_rejected() {
    let mut rd = SoftwareDevice::new();
    let (src, _, _) = target(&mut rd, 4);
    let (dst, _, _) = target(&mut rd, 8);
    assert!(matches!(
        rd.blit(src, dst, BlitMask::COLOR),
        Err(RenderError::DimensionMismatch { .. })
    ));
}

#[test]
fn depth_blit_needs_depth_on_both_sides() {
    let mut rd = SoftwareDevice::new();
    let (src, _, _) = target(&mut rd, 4);
    let color = rd.create_texture(&TextureDesc::new("c", 4, 4, wgpu::TextureFormat::Rgba8Unorm));
    let dst = rd.create_framebuffer("colorOnly");
    rd.set_attachment(dst, AttachmentPoint::COLOR0, Some(color)).unwrap();
    assert!(matches!(
        rd.blit(src, dst, BlitMask::DEPTH),
        Err(RenderError::MissingAttachment { .. })
    ));
}

#[test]
fn nearest_copy_samples_every_factor_texels() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    let src = rd.create_texture(&TextureDesc::new("hi", 8, 8, wgpu::TextureFormat::R32Float));
    let dst = rd.create_texture(&TextureDesc::new("lo", 2, 2, wgpu::TextureFormat::R32Float));
    rd.write_texel(src, 4, 4, Vec4::new(0.75, 0.0, 0.0, 1.0))?;
    rd.write_texel(src, 5, 4, Vec4::new(0.25, 0.0, 0.0, 1.0))?;

    rd.copy_texture_nearest(src, dst, 4)?;

    assert!((rd.read_texel(dst, 1, 1)?.x - 0.75).abs() < 1e-6);
    assert_eq!(rd.read_texel(dst, 0, 0)?.x, 0.0);
    Ok(())
}

#[test]
fn resize_framebuffer_resizes_every_attachment() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    let (fb, color, depth) = target(&mut rd, 4);
    rd.resize_framebuffer(fb, 10, 6)?;

    assert_eq!(rd.framebuffer_size(fb), Some(UVec2::new(10, 6)));
    assert_eq!(rd.texture_desc(color).map(TextureDesc::size), Some((10, 6)));
    assert_eq!(rd.texture_desc(depth).map(TextureDesc::size), Some((10, 6)));
    Ok(())
}

// ============================================================================
// Event Log
// ============================================================================

#[test]
fn events_carry_innermost_debug_group() -> anyhow::Result<()> {
    let mut rd = SoftwareDevice::new();
    let (fb, _, _) = target(&mut rd, 4);
    rd.clear_events();

    debug_group(&mut rd, "Outer", |rd| {
        debug_group(rd, "Inner", |rd| {
            scoped_state(rd, Some(fb), |rd| rd.draw(&DrawCall::new("a", ScreenRect::FULL, 0.5)))
        })?;
        scoped_state(rd, Some(fb), |rd| rd.draw(&DrawCall::new("b", ScreenRect::FULL, 0.5)))
    })?;

    let draws: Vec<(String, Option<String>)> = rd
        .events()
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::Draw { label, group, .. } => Some((label.clone(), group.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        draws,
        vec![
            ("a".to_string(), Some("Inner".to_string())),
            ("b".to_string(), Some("Outer".to_string())),
        ]
    );
    Ok(())
}
