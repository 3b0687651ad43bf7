use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[zbus::proxy(
    interface = "org.presence.Attendance1",
    default_service = "org.presence.Attendance1",
    default_path = "/org/presence/Attendance1"
)]
trait Attendance {
    async fn confirm(&self, name: &str) -> zbus::Result<(bool, String)>;
    async fn check_in(&self, name: &str, email: &str) -> zbus::Result<(bool, String)>;
    async fn check_out(&self, name: &str, email: &str) -> zbus::Result<(bool, String)>;
    async fn start_session(&self, name: &str, email: &str) -> zbus::Result<bool>;
    async fn session_status(&self, email: &str) -> zbus::Result<String>;
    async fn recognize(&self) -> zbus::Result<String>;
    async fn reload_roster(&self) -> zbus::Result<u32>;
    async fn update_photo(&self, name: &str, email: &str) -> zbus::Result<String>;
    async fn upload_photo(&self, name: &str, email: &str, image: &[u8]) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "presence", about = "Face-recognition attendance desk CLI")]
struct Cli {
    /// Talk to the daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the camera sees you
    Confirm {
        /// Employee name as it appears in the roster
        name: String,
    },
    /// Check in for today
    CheckIn { name: String, email: String },
    /// Check out for today
    CheckOut { name: String, email: String },
    /// Resume time tracking after a restart
    StartSession { name: String, email: String },
    /// Show today's total and idle time
    Session { email: String },
    /// Classify the faces currently in front of the camera
    Recognize,
    /// Print recognized faces once per second until interrupted
    Watch,
    /// Rebuild the roster from the reference image directory
    Reload,
    /// Replace your reference photo and re-encode the roster
    UpdatePhoto {
        name: String,
        email: String,
        /// Upload this image instead of taking a photo with the camera
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Show daemon status
    Status,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// V4L2 device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Frames to capture
        #[arg(short, long, default_value_t = 5)]
        frames: usize,
        /// Save the last frame as PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

async fn connect(session_bus: bool) -> Result<AttendanceProxy<'static>> {
    let session_bus = session_bus
        || std::env::var("PRESENCE_BUS").is_ok_and(|v| v.eq_ignore_ascii_case("session"));
    tracing::debug!(session_bus, "connecting to presenced");
    let conn = if session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to D-Bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("presenced is not reachable")
}

fn print_reply(label: &str, name: &str, (success, status): (bool, String)) {
    println!("{label} Status For {name} : {status}");
    if !success {
        std::process::exit(1);
    }
}

fn print_faces(json: &str) -> Result<()> {
    let faces: Vec<serde_json::Value> = serde_json::from_str(json)?;
    if faces.is_empty() {
        println!("no faces");
    }
    for face in faces {
        let label = face["identity"].as_str().unwrap_or("?");
        match face["distance"].as_f64() {
            Some(d) => println!("{label} (distance {d:.3})"),
            None => println!("{label}"),
        }
    }
    Ok(())
}

fn run_camera_test(device: &str, frames: usize, output: Option<PathBuf>) -> Result<()> {
    let devices = presence_hw::Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in &devices {
        println!("  {}: {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    println!("Opening {device}...");
    let mut camera = presence_hw::Camera::open(device)?;
    println!(
        "  {}x{} {:?}",
        camera.width,
        camera.height,
        camera.pixel_format()
    );

    let mut last = None;
    for i in 0..frames {
        let frame = camera.capture_frame()?;
        println!(
            "  frame {i}: seq={} brightness={:.1} dark={}",
            frame.sequence,
            frame.avg_brightness(),
            frame.is_dark
        );
        last = Some(frame);
    }

    if let (Some(path), Some(frame)) = (output, last) {
        frame
            .to_image()?
            .save_with_format(&path, image::ImageFormat::Png)
            .with_context(|| format!("saving {}", path.display()))?;
        println!("Saved {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Confirm { name } => {
            let proxy = connect(cli.session_bus).await?;
            let (success, status) = proxy.confirm(&name).await?;
            println!("{status}");
            if !success {
                std::process::exit(1);
            }
        }
        Commands::CheckIn { name, email } => {
            let proxy = connect(cli.session_bus).await?;
            print_reply("Checked In", &name, proxy.check_in(&name, &email).await?);
        }
        Commands::CheckOut { name, email } => {
            let proxy = connect(cli.session_bus).await?;
            print_reply("Checked Out", &name, proxy.check_out(&name, &email).await?);
        }
        Commands::StartSession { name, email } => {
            let proxy = connect(cli.session_bus).await?;
            if proxy.start_session(&name, &email).await? {
                println!("Tracking time for {name}");
            } else {
                println!("{name} is not checked in today");
                std::process::exit(1);
            }
        }
        Commands::Session { email } => {
            let proxy = connect(cli.session_bus).await?;
            let view: serde_json::Value =
                serde_json::from_str(&proxy.session_status(&email).await?)?;
            if view.is_null() {
                println!("{email} has not checked in today");
            } else {
                println!("Total Time: {}", view["total"].as_str().unwrap_or("?"));
                println!("Idle Time:  {}", view["idle"].as_str().unwrap_or("?"));
                println!(
                    "Tracking:   {}",
                    if view["active"].as_bool().unwrap_or(false) { "running" } else { "stopped" }
                );
            }
        }
        Commands::Recognize => {
            let proxy = connect(cli.session_bus).await?;
            print_faces(&proxy.recognize().await?)?;
        }
        Commands::Watch => {
            let proxy = connect(cli.session_bus).await?;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    result = proxy.recognize() => {
                        match result {
                            Ok(json) => print_faces(&json)?,
                            Err(e) => eprintln!("recognize failed: {e}"),
                        }
                    }
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        Commands::Reload => {
            let proxy = connect(cli.session_bus).await?;
            let size = proxy.reload_roster().await?;
            println!("Roster reloaded: {size} reference faces");
        }
        Commands::UpdatePhoto { name, email, from } => {
            let proxy = connect(cli.session_bus).await?;
            let json = match from {
                Some(path) => {
                    let image = std::fs::read(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    proxy.upload_photo(&name, &email, &image).await?
                }
                None => proxy.update_photo(&name, &email).await?,
            };
            let update: serde_json::Value = serde_json::from_str(&json)?;
            println!(
                "Reference photo for {name} saved to {}",
                update["path"].as_str().unwrap_or("?")
            );
            println!("Roster reloaded: {} reference faces", update["roster_size"]);
        }
        Commands::Status => match connect(cli.session_bus).await {
            Ok(proxy) => {
                let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            Err(e) => {
                println!("presenced: not connected ({e:#})");
                std::process::exit(1);
            }
        },
        Commands::Test {
            device,
            frames,
            output,
        } => {
            println!("Running camera diagnostics...");
            run_camera_test(&device, frames, output)?;
        }
    }

    Ok(())
}
