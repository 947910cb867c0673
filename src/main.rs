use std::io::{self, BufRead, Write};

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use teleop_link::config::{CameraChoice, Role, SessionConfig, DEFAULT_SIGNALING_URL};
use teleop_link::controller::RoleController;
use teleop_link::video::device::enumerate_devices;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Session role
#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    /// Capture and stream video, execute received commands
    Robot,
    /// Receive video and drive the robot
    Operator,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Robot => Role::Robot,
            RoleArg::Operator => Role::Operator,
        }
    }
}

/// Camera backend for the robot role
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum CameraArg {
    /// Standard V4L2 color camera
    #[default]
    Rgb,
    /// Depth camera, color stream
    RealsenseRgb,
    /// Depth camera, visualized depth stream
    RealsenseDepth,
}

impl From<CameraArg> for CameraChoice {
    fn from(arg: CameraArg) -> Self {
        match arg {
            CameraArg::Rgb => CameraChoice::Rgb,
            CameraArg::RealsenseRgb => CameraChoice::RealsenseRgb,
            CameraArg::RealsenseDepth => CameraChoice::RealsenseDepth,
        }
    }
}

/// teleop-link command line arguments
#[derive(Parser, Debug)]
#[command(name = "teleop-link")]
#[command(version, about = "WebRTC robot teleoperation link", long_about = None)]
struct CliArgs {
    /// Session role (prompts interactively when omitted)
    #[arg(long, value_enum)]
    role: Option<RoleArg>,

    /// Camera backend (robot role only)
    #[arg(long, value_enum, default_value_t = CameraArg::Rgb)]
    camera: CameraArg,

    /// V4L2 device index for the rgb camera
    #[arg(long, value_name = "N", default_value_t = 0)]
    camera_index: u32,

    /// Capture width
    #[arg(long, value_name = "PIXELS", default_value_t = 640)]
    width: u32,

    /// Capture height
    #[arg(long, value_name = "PIXELS", default_value_t = 480)]
    height: u32,

    /// Target frame rate
    #[arg(long, value_name = "FPS", default_value_t = 30)]
    fps: u32,

    /// Rendezvous WebSocket URL
    #[arg(long, value_name = "URL", default_value = DEFAULT_SIGNALING_URL)]
    signaling_url: String,

    /// STUN server URL, repeatable (defaults to the Google STUN set)
    #[arg(long = "stun", value_name = "URL")]
    stun: Vec<String>,

    /// List video capture devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting teleop-link v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        return list_devices().await;
    }

    let (role, camera) = match args.role {
        Some(role) => (role.into(), args.camera.into()),
        None => prompt_role_and_camera()?,
    };

    let mut config = SessionConfig::default()
        .with_signaling_url(args.signaling_url)
        .with_camera(camera)
        .with_camera_index(args.camera_index)
        .with_resolution(args.width, args.height)
        .with_fps(args.fps);
    if !args.stun.is_empty() {
        config = config.with_stun_servers(args.stun);
    }

    // First Ctrl-C requests a graceful teardown; the session also tears
    // itself down on fatal errors through the same path.
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                signal_token.cancel();
            }
            Err(e) => tracing::warn!("Failed to install CTRL+C handler: {}", e),
        }
    });

    let controller = RoleController::new(role, config);
    controller.run(shutdown).await?;

    tracing::info!("Session shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    // Build filter string based on effective level
    let filter = match effective_level {
        LogLevel::Error => "teleop_link=error,webrtc=error",
        LogLevel::Warn => "teleop_link=warn,webrtc=error",
        LogLevel::Info => "teleop_link=info,webrtc=error",
        LogLevel::Verbose => "teleop_link=debug,webrtc=error",
        LogLevel::Debug => "teleop_link=debug,webrtc=info",
        LogLevel::Trace => "teleop_link=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Interactive role and camera selection, used when `--role` is absent
fn prompt_role_and_camera() -> anyhow::Result<(Role, CameraChoice)> {
    let stdin = io::stdin();
    let mut line = String::new();

    println!("Select role:");
    println!("  1) robot     (capture and stream video)");
    println!("  2) operator  (receive video, send commands)");
    print!("Role [1/2]: ");
    io::stdout().flush()?;
    stdin.lock().read_line(&mut line)?;

    let role = match line.trim() {
        "1" => Role::Robot,
        "2" => Role::Operator,
        other => other
            .parse::<Role>()
            .map_err(|_| anyhow::anyhow!("Unrecognized role choice: {:?}", other))?,
    };

    if role != Role::Robot {
        return Ok((role, CameraChoice::Rgb));
    }

    println!("Select camera:");
    println!("  1) rgb             (standard V4L2 camera)");
    println!("  2) realsense-rgb   (depth camera, color stream)");
    println!("  3) realsense-depth (depth camera, visualized depth)");
    print!("Camera [1-3]: ");
    io::stdout().flush()?;
    line.clear();
    stdin.lock().read_line(&mut line)?;

    let camera = match line.trim() {
        "1" => CameraChoice::Rgb,
        "2" => CameraChoice::RealsenseRgb,
        "3" => CameraChoice::RealsenseDepth,
        other => match other.parse::<CameraChoice>() {
            Ok(camera) => camera,
            Err(_) => {
                println!("Unrecognized camera choice {:?}, using rgb", other);
                CameraChoice::Rgb
            }
        },
    };

    Ok((role, camera))
}

/// Probe /dev/video* and print what each node offers
async fn list_devices() -> anyhow::Result<()> {
    let devices = tokio::task::spawn_blocking(enumerate_devices).await??;

    if devices.is_empty() {
        println!("No video capture devices found");
        return Ok(());
    }

    for device in devices {
        let depth_marker = if device.has_depth() {
            "  [depth sensor]"
        } else {
            ""
        };
        println!(
            "{}  \"{}\" driver={} bus={}{}",
            device.path.display(),
            device.name,
            device.driver,
            device.bus_info,
            depth_marker
        );

        for format in &device.formats {
            let resolutions: Vec<String> = format
                .resolutions
                .iter()
                .map(|r| format!("{}x{} @ {:?}", r.width, r.height, r.fps))
                .collect();
            println!("    {}: {}", format.format, resolutions.join(", "));
        }
    }

    Ok(())
}
