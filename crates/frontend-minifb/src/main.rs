//! FX asset player.
//!
//! Opens an asset/save file pair and plays a frame script out of it (or
//! draws a single bitmap), either in a scaled window or headless.
//!
//! - **GUI mode** (default): 60 fps window. `S` writes a PNG screenshot,
//!   `Esc` quits.
//! - **Headless mode** (`--headless`): runs a fixed number of ticks and prints
//!   ASCII snapshots of the screen, then cache statistics.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use arduboy_fx::{DrawMode, Framebuffer, Fx, FxConfig, SCREEN_HEIGHT, SCREEN_WIDTH};
use minifb::{Key, KeyRepeat, Scale, ScaleMode, Window, WindowOptions};
use structopt::StructOpt;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::util::SubscriberInitExt;

#[derive(StructOpt, Debug)]
#[structopt(name = "fx-player")]
#[structopt(about = r#"
Plays Arduboy FX frame scripts and bitmaps straight from an asset blob.
"#)]
struct Args {
    /// Asset blob (fxdata.bin)
    #[structopt(parse(from_os_str))]
    assets: PathBuf,

    /// Save blob; created and erased if missing
    #[structopt(long, parse(from_os_str), default_value = "fxsave.bin")]
    save: PathBuf,

    /// Cache page size in bytes (rounded up to a multiple of 512)
    #[structopt(long, default_value = "1024")]
    page_size: u32,

    /// Number of cache pages
    #[structopt(long, default_value = "38")]
    pages: u8,

    /// Address of a frame script to play
    #[structopt(long, parse(try_from_str = parse_addr))]
    script: Option<u32>,

    /// Extra ticks each script frame is held for
    #[structopt(long, default_value = "0")]
    hold: u8,

    /// Address of a single bitmap to draw at (0, 0)
    #[structopt(long, parse(try_from_str = parse_addr))]
    bitmap: Option<u32>,

    /// Run without a window
    #[structopt(long)]
    headless: bool,

    /// Ticks to run in headless mode
    #[structopt(long, default_value = "60")]
    frames: usize,

    /// Print the screen after this tick (headless, repeatable)
    #[structopt(long = "snapshot", number_of_values = 1)]
    snapshots: Vec<usize>,

    /// Window scale factor
    #[structopt(long, default_value = "4")]
    scale: usize,

    /// Log at DEBUG level
    #[structopt(long)]
    debug: bool,
}

#[derive(thiserror::Error, Debug)]
#[error("Failed to parse address {src}")]
struct AddrParseError {
    src: String,
}

/// Decimal, or hex with a `0x` prefix.
fn parse_addr(src: &str) -> Result<u32, AddrParseError> {
    let parsed = match src.strip_prefix("0x").or_else(|| src.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => src.parse(),
    };
    parsed.map_err(|_| AddrParseError { src: src.to_string() })
}

fn setup_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .compact()
        .finish()
        .init();
}

/// What one tick draws.
#[derive(Debug, Clone, Copy)]
enum Scene {
    Script,
    Bitmap(u32),
}

struct Player {
    fx: Fx,
    scene: Scene,
    screen: Framebuffer,
    ticks: u64,
    loops: u64,
}

impl Player {
    fn new(mut fx: Fx, args: &Args) -> anyhow::Result<Self> {
        let scene = match (args.script, args.bitmap) {
            (Some(addr), _) => {
                fx.set_frame(addr, args.hold);
                Scene::Script
            }
            (None, Some(addr)) => Scene::Bitmap(addr),
            (None, None) => bail!("nothing to play: pass --script or --bitmap"),
        };
        Ok(Player {
            fx,
            scene,
            screen: Framebuffer::new(),
            ticks: 0,
            loops: 0,
        })
    }

    fn tick(&mut self) {
        self.screen.clear();
        match self.scene {
            Scene::Script => {
                if !self.fx.draw_frame(&mut self.screen) {
                    self.loops += 1;
                    debug!("script finished at tick {} (loop {})", self.ticks, self.loops);
                }
            }
            Scene::Bitmap(addr) => self.fx.draw_bitmap(&mut self.screen, 0, 0, addr, 0, DrawMode::NORMAL),
        }
        self.ticks += 1;
    }

    fn report(&self) {
        let s = self.fx.cache_stats();
        info!(
            "{} ticks, {} loops; cache: {} hits, {} misses, {} prefetches, {} evictions",
            self.ticks, self.loops, s.hits, s.misses, s.prefetches, s.evictions
        );
    }
}

fn save_screenshot(screen: &Framebuffer, path: &str, scale: usize) -> anyhow::Result<()> {
    let png = arduboy_fx::png::encode_framebuffer(screen, scale as u32);
    fs::write(path, png).with_context(|| format!("writing {}", path))
}

fn main() -> anyhow::Result<()> {
    let args = Args::from_args();
    setup_logging(args.debug);

    let config = FxConfig::new()
        .with_cache(args.page_size, args.pages)
        .with_paths(&args.assets, &args.save);
    debug!("{:?}", config);

    let mut fx = Fx::open(config).with_context(|| format!("opening {}", args.assets.display()))?;
    if !fx.detect() {
        bail!("{} holds no data", args.assets.display());
    }
    let mut player = Player::new(fx, &args)?;

    if args.headless {
        run_headless(&mut player, &args);
    } else {
        run_gui(&mut player, args.scale.max(1))?;
    }
    player.report();
    player.fx.close();
    Ok(())
}

fn run_gui(player: &mut Player, scale: usize) -> anyhow::Result<()> {
    let scaled_w = SCREEN_WIDTH * scale;
    let scaled_h = SCREEN_HEIGHT * scale;
    let mut window = Window::new(
        "FX Player",
        scaled_w,
        scaled_h,
        WindowOptions {
            scale: Scale::X1,
            scale_mode: ScaleMode::AspectRatioStretch,
            resize: true,
            ..Default::default()
        },
    )
    .context("creating window")?;
    window.set_target_fps(60);

    let mut scaled_buf = vec![0u32; scaled_w * scaled_h];
    let mut screenshot_n = 0u32;

    while window.is_open() && !window.is_key_down(Key::Escape) {
        player.tick();

        if window.is_key_pressed(Key::S, KeyRepeat::No) {
            let f = format!("screenshot_{:04}.png", screenshot_n);
            match save_screenshot(&player.screen, &f, scale) {
                Ok(()) => {
                    info!("screenshot: {}", f);
                    screenshot_n += 1;
                }
                Err(e) => warn!("screenshot failed: {:#}", e),
            }
        }

        let pixels = player.screen.as_pixel_buffer();
        for y in 0..SCREEN_HEIGHT {
            for x in 0..SCREEN_WIDTH {
                let c = pixels[y * SCREEN_WIDTH + x];
                for sy in 0..scale {
                    let base = (y * scale + sy) * scaled_w + x * scale;
                    scaled_buf[base..base + scale].fill(c);
                }
            }
        }
        window
            .update_with_buffer(&scaled_buf, scaled_w, scaled_h)
            .context("presenting frame")?;
    }
    Ok(())
}

fn run_headless(player: &mut Player, args: &Args) {
    debug!("running {} ticks", args.frames);
    for tick in 1..=args.frames {
        player.tick();
        if args.snapshots.contains(&tick) || (args.debug && tick == args.frames) {
            println!("\n  === Tick {} ===", tick);
            print_display(&player.screen);
        }
    }
}

fn print_display(screen: &Framebuffer) {
    println!("  ({} px lit)", screen.lit_count());
    for line in screen.to_ascii().lines() {
        println!("  |{}|", line);
    }
}
