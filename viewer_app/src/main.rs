//! Cube viewer
//!
//! Opens a window, uploads a textured cube and spins it until Escape is
//! pressed or the window is closed. Settings come from `viewer.toml` and
//! the command line.

mod geometry;
mod window;

use clap::{Arg, ArgAction, Command};
use nalgebra::{Matrix4, Point3, UnitQuaternion, Vector3};
use render_core::config::{Config, RendererConfig};
use render_core::foundation::logging;
use render_core::scene::{Drawable, Transform};
use render_core::vulkan::initialization::adapter::{select_adapter, AdapterRequirements};
use render_core::vulkan::initialization::instance::{VulkanInstance, VulkanSurface};
use render_core::vulkan::initialization::DeviceContext;
use render_core::vulkan::rendering::pipeline::FrameUniforms;
use render_core::{Renderer, TextureHandle};
use std::path::Path;
use std::time::Instant;

use window::Window;

const DEFAULT_CONFIG: &str = "viewer_app/viewer.toml";
const CHECKERBOARD_SIZE: u32 = 256;
const SPIN_RADIANS_PER_SECOND: f32 = 0.8;

fn cli() -> Command {
    Command::new("viewer")
        .about("Spinning textured cube")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Configuration file (.toml or .ron)")
                .default_value(DEFAULT_CONFIG),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("PIXELS")
                .help("Window width")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_name("PIXELS")
                .help("Window height")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("frames")
                .long("frames")
                .value_name("COUNT")
                .help("Frames in flight")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("validation")
                .long("validation")
                .help("Enable validation layers")
                .action(ArgAction::SetTrue)
                .conflicts_with("no-validation"),
        )
        .arg(
            Arg::new("no-validation")
                .long("no-validation")
                .help("Disable validation layers")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("texture")
                .short('t')
                .long("texture")
                .value_name("PATH")
                .help("PNG to put on the cube instead of a checkerboard"),
        )
        .arg(
            Arg::new("exit-after")
                .long("exit-after")
                .value_name("FRAMES")
                .help("Quit after presenting this many frames")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn load_config(matches: &clap::ArgMatches) -> Result<RendererConfig, Box<dyn std::error::Error>> {
    let path = matches.get_one::<String>("config").map_or(DEFAULT_CONFIG, String::as_str);
    let mut config = RendererConfig::load_or_default(path)?;

    if let Some(&width) = matches.get_one::<u32>("width") {
        config.window.width = width;
    }
    if let Some(&height) = matches.get_one::<u32>("height") {
        config.window.height = height;
    }
    if let Some(&frames) = matches.get_one::<usize>("frames") {
        config.max_frames_in_flight = frames;
    }
    if matches.get_flag("validation") {
        config.enable_validation = Some(true);
    } else if matches.get_flag("no-validation") {
        config.enable_validation = Some(false);
    }
    config.validate()?;
    Ok(config)
}

fn load_texture(renderer: &mut Renderer, path: Option<&String>) -> Result<TextureHandle, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        let image = image::open(Path::new(path))?.to_rgba8();
        let (width, height) = image.dimensions();
        log::info!("Loaded texture {path} ({width}x{height})");
        return Ok(renderer.load_texture(image.as_raw(), width, height)?);
    }
    let pixels = geometry::checkerboard(CHECKERBOARD_SIZE, 8);
    Ok(renderer.load_texture(&pixels, CHECKERBOARD_SIZE, CHECKERBOARD_SIZE)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    let exit_after = matches.get_one::<u64>("exit-after").copied();

    // Declaration order is teardown order in reverse: renderer, surface, instance, window.
    let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
    let instance = VulkanInstance::new(
        &config.application_name,
        &window.required_instance_extensions()?,
        config.validation_enabled(),
    )?;
    let surface = VulkanSurface::from_raw(&instance, window.create_vulkan_surface(instance.handle())?);

    let adapters = instance.enumerate_adapters(&surface)?;
    let requirements = AdapterRequirements::default();
    let (adapter, families) = select_adapter(&adapters, &requirements)?;
    let ctx = DeviceContext::create_native(&instance, &surface, adapter, families, &requirements)?;
    let mut renderer = Renderer::from_config(ctx, &config)?;

    let texture = load_texture(&mut renderer, matches.get_one::<String>("texture"))?;
    let (vertices, indices) = geometry::cube();
    let mesh = renderer.create_mesh(&vertices, &indices)?;
    let mut cube = Drawable::new(mesh, texture);

    let view = Matrix4::look_at_rh(&Point3::new(0.0, 1.2, 2.5), &Point3::origin(), &Vector3::y());
    let start = Instant::now();

    let presented = renderer.run(
        |r| {
            let input = window.poll();
            if let Some((width, height)) = input.resized {
                r.resize(width, height);
            }
            input.quit || exit_after.is_some_and(|limit| r.frame_counter() >= limit)
        },
        |r, frame| {
            let angle = start.elapsed().as_secs_f32() * SPIN_RADIANS_PER_SECOND;
            cube.transform = Transform::default()
                .with_rotation(UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angle));
            let projection = Matrix4::new_perspective(r.aspect_ratio()?, 45f32.to_radians(), 0.1, 100.0);
            r.update_uniform(frame, &FrameUniforms::new(&view, &projection))?;
            r.record_draw(frame, &cube)
        },
    )?;

    let elapsed = start.elapsed().as_secs_f64();
    log::info!(
        "Presented {presented} frames in {elapsed:.1}s ({:.0} fps), last frame {:?}",
        presented as f64 / elapsed.max(f64::EPSILON),
        renderer.last_stats()
    );
    Ok(())
}
