//! Midgard: generates a static and a dynamic terrain and exports their maps as PNG.

mod config;
mod export;

use anyhow::{Context, Result};
use config::{Backend, MidgardConfig};
use engine_core::{GpuDevice, MeshHandle};
use hecs::World;
use procgen::{DynamicTerrain, FractalNoise, SoftwareDevice, StaticTerrain, Terrain};
use renderer::WgpuDevice;
use std::time::Instant;

fn run_static(world: &mut World, config: &MidgardConfig) -> Result<()> {
    let start = Instant::now();
    let mesh = MeshHandle::spawn(world);
    let mut terrain = StaticTerrain::with_noise(mesh, FractalNoise::new(config.seed));
    terrain.generate(
        world,
        config.width,
        config.depth,
        config.height_factor,
        config.flatness,
    )?;

    if let Some(preview) = config.preview {
        terrain.set_parameters(world, preview.height_factor, preview.flatness)?;
    }

    log::info!(
        "Static terrain: {} vertices, {} indices in {:.2?}",
        terrain.vertices().len(),
        terrain.indices().len(),
        start.elapsed()
    );

    let dir = &config.output_dir;
    export::save_png(terrain.compute_color_map(world)?, dir, "colorMap.png")?;
    export::save_png(terrain.compute_normal_map(), dir, "normalMap.png")?;
    export::save_png(&export::slope_to_rgb(terrain.compute_slope_map()), dir, "slopeMap.png")?;
    Ok(())
}

fn run_dynamic<D: GpuDevice>(device: D, world: &mut World, config: &MidgardConfig) -> Result<()> {
    let start = Instant::now();
    let mesh = MeshHandle::spawn(world);
    let mut terrain = DynamicTerrain::new(device, world, mesh)?;
    terrain.generate_tessellated(
        world,
        config.width,
        config.depth,
        config.height_factor,
        config.flatness,
        config.min_tess_level,
    )?;

    if let Some(preview) = config.preview {
        terrain.set_parameters(world, preview.height_factor, preview.flatness)?;
    }

    let noise_map = terrain.compute_noise_map(config.noise_factor)?;
    let color_map = terrain.compute_color_map()?;
    let slope_map = terrain.compute_slope_map()?;
    log::info!("Dynamic terrain maps computed in {:.2?}", start.elapsed());

    let dir = &config.output_dir;
    for (texture, name) in [
        (noise_map, "dynamicNoiseMap.png"),
        (color_map, "dynamicColorMap.png"),
        (slope_map, "dynamicSlopeMap.png"),
    ] {
        let data = terrain.device_mut().read_texture(texture)?;
        export::save_png(&export::texture_to_rgb(&data), dir, name)?;
    }
    Ok(())
}

fn software_device(config: &MidgardConfig) -> SoftwareDevice {
    SoftwareDevice::with_noise(FractalNoise::new(config.seed))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = MidgardConfig::load();
    log::info!("Starting Midgard: {:?}", config);

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;

    let mut world = World::new();
    run_static(&mut world, &config)?;

    if !config.dynamic {
        return Ok(());
    }

    match config.backend {
        Backend::Gpu => {
            let device = WgpuDevice::headless().context("GPU backend requested")?;
            run_dynamic(device, &mut world, &config)
        }
        Backend::Software => run_dynamic(software_device(&config), &mut world, &config),
        Backend::Auto => match WgpuDevice::headless() {
            Ok(device) => run_dynamic(device, &mut world, &config),
            Err(e) => {
                log::warn!("{}; falling back to the software device", e);
                run_dynamic(software_device(&config), &mut world, &config)
            }
        },
    }
}
