use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use mesh_viewer::{AppSettings, State};
use winit::{
    dpi::PhysicalSize,
    event::*,
    keyboard::{KeyCode, PhysicalKey},
    window::WindowBuilder,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model file to show (.obj, .gltf or .glb)
    model: PathBuf,

    /// Skip texture loading and draw with a plain white material
    #[arg(long)]
    no_materials: bool,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    #[arg(long, default_value = "mesh-viewer")]
    title: String,
}

impl From<&Args> for AppSettings {
    fn from(args: &Args) -> Self {
        Self {
            width: args.width,
            height: args.height,
            title: args.title.clone(),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let settings = AppSettings::from(&args);

    let event_loop = winit::event_loop::EventLoop::new()?;

    let window = WindowBuilder::new()
        .with_title(settings.title.as_str())
        .with_inner_size(PhysicalSize::new(settings.width, settings.height))
        .build(&event_loop)?;

    let mut state = State::new(window, &args.model, !args.no_materials)?;

    event_loop.run(move |event, window_target| match event {
        Event::WindowEvent { window_id, event } if window_id == state.window().id() => match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                state.shutdown();
                window_target.exit();
            }
            WindowEvent::Resized(new_size) => {
                state.resize(new_size.width, new_size.height);
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = state.render() {
                    log::error!("Render error: {:#}", e);
                    state.shutdown();
                    window_target.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            state.update();
            state.window().request_redraw();
        }
        _ => {}
    })?;

    Ok(())
}
