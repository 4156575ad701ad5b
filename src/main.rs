use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use glam::Mat3;
use log::error;
use pollster::block_on;

use splat_bridge::{
    Bridge, BridgeConfig, Camera, CycleOutcome, Mesh, MeshRenderer, RenderSettings, SessionPolicy,
};

const USAGE: &str = "Usage: splat-bridge [--host <addr>] [--port <port>] [--exclusive] \
[--mesh <model.obj>] [--width <px>] [--height <px>] [--fov <degrees>] [--fps <rate>] \
[--frames <count>] [--no-render]";

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse(env::args().skip(1))?;
    let mut config = BridgeConfig::from_env().context("invalid bridge configuration")?;
    if let Some(host) = options.host.clone() {
        config.host = host;
    }
    if let Some(port) = options.port {
        config.port = port;
    }
    if options.exclusive {
        config.session_policy = SessionPolicy::Exclusive;
    }

    let bridge = Bridge::start(&config)?;
    println!("Listening on ws://{}", bridge.local_addr());

    let cycles = if options.no_render {
        run_without_renderer(&options)
    } else {
        match create_renderer(&options) {
            Ok(renderer) => run_render_loop(&bridge, renderer, &options),
            Err(err) => {
                eprintln!("{err:#}. Falling back to --no-render mode; clients will receive empty frames.");
                run_without_renderer(&options)
            }
        }
    };

    bridge.shutdown()?;
    println!("Stopped after {cycles} cycle(s)");
    Ok(())
}

fn create_renderer(options: &CliOptions) -> Result<MeshRenderer> {
    let mesh = match &options.mesh {
        Some(path) => Mesh::load_obj(path)?,
        None => Mesh::cube(),
    };
    println!("Loaded mesh with {} triangles", mesh.triangle_count());
    block_on(MeshRenderer::new(&mesh))
}

fn run_render_loop(bridge: &Bridge, renderer: MeshRenderer, options: &CliOptions) -> u64 {
    let settings = &options.settings;
    let mut camera = Camera::from_vertical_fov(
        Mat3::IDENTITY,
        settings.initial_translation,
        settings.fov_y.to_radians(),
        settings.width,
        settings.height,
    );
    camera.znear = settings.znear;
    camera.zfar = settings.zfar;
    camera.update_transforms();

    let mut producer = bridge.producer(camera, renderer, settings.background);
    let mut waiting_logged = false;
    pace(options, || match producer.run_cycle() {
        Ok(CycleOutcome::NotReady) if !waiting_logged => {
            println!("Waiting for the first pose...");
            waiting_logged = true;
        }
        Ok(_) => {}
        Err(err) => error!("render cycle failed: {err:?}"),
    })
}

fn run_without_renderer(options: &CliOptions) -> u64 {
    pace(options, || {})
}

/// Calls `cycle` at the configured rate until `--frames` cycles have run.
fn pace(options: &CliOptions, mut cycle: impl FnMut()) -> u64 {
    let interval = options.frame_interval;
    let mut count = 0;
    while options.frames.map_or(true, |limit| count < limit) {
        let started = Instant::now();
        cycle();
        count += 1;
        thread::sleep(interval.saturating_sub(started.elapsed()));
    }
    count
}

struct CliOptions {
    host: Option<String>,
    port: Option<u16>,
    exclusive: bool,
    mesh: Option<PathBuf>,
    settings: RenderSettings,
    frames: Option<u64>,
    no_render: bool,
    frame_interval: Duration,
}

impl CliOptions {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let mut options = Self {
            host: None,
            port: None,
            exclusive: false,
            mesh: None,
            settings: RenderSettings::default(),
            frames: None,
            no_render: false,
            frame_interval: Duration::ZERO,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" => options.host = Some(flag_value(&mut args, &arg)?),
                "--port" => options.port = Some(flag_value(&mut args, &arg)?),
                "--exclusive" => options.exclusive = true,
                "--mesh" => options.mesh = Some(flag_value(&mut args, &arg)?),
                "--width" => options.settings.width = flag_value(&mut args, &arg)?,
                "--height" => options.settings.height = flag_value(&mut args, &arg)?,
                "--fov" => options.settings.fov_y = flag_value(&mut args, &arg)?,
                "--fps" => options.settings.frames_per_second = flag_value(&mut args, &arg)?,
                "--frames" => options.frames = Some(flag_value(&mut args, &arg)?),
                "--no-render" => options.no_render = true,
                "--help" | "-h" => return Err(anyhow!(USAGE)),
                other => bail!("Unknown argument: {other}\n{USAGE}"),
            }
        }

        if options.settings.width == 0 || options.settings.height == 0 {
            bail!("--width and --height must be positive");
        }
        let fps = options.settings.frames_per_second;
        if !(fps.is_finite() && fps > 0.0) {
            bail!("--fps must be a positive number, got {fps}");
        }
        options.frame_interval = Duration::try_from_secs_f32(1.0 / fps)
            .map_err(|_| anyhow!("--fps {fps} is too low to pace frames"))?;
        Ok(options)
    }
}

fn flag_value<T>(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = args
        .next()
        .ok_or_else(|| anyhow!("{flag} expects a value\n{USAGE}"))?;
    raw.parse()
        .map_err(|err| anyhow!("invalid value {raw:?} for {flag}: {err}"))
}
