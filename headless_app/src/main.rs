//! Headless frame loop demo
//!
//! Drives a render context over the software device: uploads geometry,
//! updates a uniform buffer every frame, simulates window resizes and
//! shuts down cleanly. Pass a `.toml` or `.ron` render config as the first
//! argument to override the defaults.

use std::sync::Arc;

use render_core::config::ConfigError;
use render_core::prelude::*;

const FRAMES: u64 = 120;
const RESIZES: [(u64, u32, u32); 3] = [(40, 1024, 768), (70, 0, 0), (75, 1280, 720)];

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("Graphics error: {0}")]
    Gfx(#[from] GfxError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

struct FrameLoopApp {
    device: Arc<SoftwareDevice>,
    surface: HeadlessSurface,
    ctx: RenderContext,
    camera: Buffer,
    instances: Buffer,
    _vertices: Buffer,
    depth: Option<Image>,
    recreations: u32,
}

impl FrameLoopApp {
    fn new(config: RenderConfig) -> Result<Self, AppError> {
        let device = Arc::new(SoftwareDevice::with_config(SoftwareDeviceConfig {
            name: "frame_loop".to_string(),
            ..SoftwareDeviceConfig::default()
        }));
        let surface = HeadlessSurface::new(800, 600);
        let ctx = RenderContext::new(device.clone(), Box::new(surface.clone()), config)?;

        let triangle: [f32; 9] = [0.0, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0];
        let vertices = ctx.upload_buffer(
            BufferUsage::VERTEX,
            &triangle.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<_>>(),
            "triangle",
        )?;
        let camera = ctx.create_buffer(BufferDesc::uniform(64), "camera")?;
        let instances = ctx.create_buffer(BufferDesc::uniform(1024), "instances")?;

        let mut app = Self {
            device,
            surface,
            ctx,
            camera,
            instances,
            _vertices: vertices,
            depth: None,
            recreations: 0,
        };
        app.create_depth()?;
        Ok(app)
    }

    fn create_depth(&mut self) -> Result<(), AppError> {
        let extent = self.ctx.extent();
        self.depth = if extent.is_empty() {
            None
        } else {
            Some(self.ctx.create_target_image(ImageDesc::depth(extent), "depth")?)
        };
        Ok(())
    }

    /// Double the instance buffer; the old one is freed once the frames
    /// that may read it have completed
    fn grow_instances(&mut self) -> Result<(), AppError> {
        let size = self.instances.size() * 2;
        log::info!("Growing instance buffer to {size} bytes");
        let grown = self.ctx.create_buffer(BufferDesc::uniform(size), "instances")?;
        let old = std::mem::replace(&mut self.instances, grown);
        self.ctx.retire_buffer(old);
        Ok(())
    }

    fn recreate(&mut self) -> Result<(), AppError> {
        self.ctx.recreate_target()?;
        self.create_depth()?;
        self.recreations += 1;
        Ok(())
    }

    fn run(&mut self) -> Result<(), AppError> {
        let mut iterations = 0_u64;
        while self.ctx.frame_count() < FRAMES {
            iterations += 1;
            for &(at, width, height) in &RESIZES {
                if iterations == at {
                    log::info!("Simulating resize to {width}x{height}");
                    self.surface.resize(width, height);
                }
            }

            let info = match self.ctx.prepare_frame()? {
                PrepareOutcome::Ready(info) => info,
                PrepareOutcome::OutOfDate => {
                    self.recreate()?;
                    continue;
                }
            };

            #[allow(clippy::cast_precision_loss)]
            let time = info.frame_number as f32 / 60.0;
            let aspect = info.extent.width as f32 / info.extent.height as f32;
            self.camera.write_slice(0, &[time, aspect, 0.1, 100.0])?;

            if info.frame_number > 0 && info.frame_number % 30 == 0 {
                self.grow_instances()?;
            }

            let (_set, _layout) = self
                .ctx
                .descriptor_builder()
                .bind_whole_buffer(0, &self.camera, DescriptorType::UniformBuffer, ShaderStages::ALL_GRAPHICS)
                .bind_whole_buffer(1, &self.instances, DescriptorType::UniformBuffer, ShaderStages::VERTEX)
                .build()?;

            // Per-frame scratch data, freed once this slot comes around again
            let mut scratch = self.ctx.create_frame_buffer(BufferDesc::uniform(256), "scratch")?;
            scratch.write(0, &info.frame_number.to_le_bytes())?;
            scratch.release();

            let image = self.ctx.frame_image();
            let shade = (info.frame_number % 60) as f32 / 60.0;
            self.ctx
                .commands()
                .cmd_clear_color_image(image, [0.2, 0.3, shade, 1.0]);

            if self.ctx.submit_frame()? == SubmitOutcome::OutOfDate {
                self.recreate()?;
            }
        }
        Ok(())
    }

    fn report(&self) {
        log::info!(
            "Rendered {} frames, {} target recreations, {} bytes of device memory in use",
            self.ctx.frame_count(),
            self.recreations,
            self.device.memory_in_use()
        );
        for kind in [
            ResourceKind::Buffer,
            ResourceKind::Image,
            ResourceKind::DescriptorPool,
            ResourceKind::DescriptorSetLayout,
        ] {
            log::info!(
                "  {kind}: {} created, {} live",
                self.device.created_count(kind),
                self.device.live_count(kind)
            );
        }
    }

    fn shutdown(mut self) -> Result<(), AppError> {
        self.depth = None;
        self.ctx.shutdown()?;
        log::info!("Device memory after shutdown: {} bytes", self.device.memory_in_use());
        Ok(())
    }
}

fn load_config() -> Result<RenderConfig, AppError> {
    match std::env::args().nth(1) {
        Some(path) => Ok(RenderConfig::load_from_file(&path)?),
        None => Ok(RenderConfig::default()),
    }
}

fn main() -> Result<(), AppError> {
    let config = load_config()?;
    render_core::logging::init_with(&config.logging);
    log::info!("Starting headless frame loop");

    let mut app = FrameLoopApp::new(config)?;
    app.run()?;
    app.report();
    app.shutdown()?;

    log::info!("Frame loop finished");
    Ok(())
}
