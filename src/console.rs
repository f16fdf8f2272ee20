//! Operator console
//!
//! Line-oriented front end over the capture controller. Commands are read from
//! stdin; notifications are printed as they are raised.

use crate::camera::{CommandCamera, DirectoryCamera, FrameSource};
use crate::config::{CameraSourceKind, Config};
use crate::database::{self, DatabaseError};
use crate::export::{self, ExportFormat};
use crate::notification::NotificationBus;
use crate::recognition::{AttendanceApiClient, Subject};
use crate::session::CaptureController;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

/// Number of committed sessions shown by `history`
const HISTORY_LIMIT: u32 = 20;

pub const HELP_TEXT: &str = "\
Commands:
  subjects                 reload and list subjects
  select <id>              choose the subject for this session
  start | stop             begin or end recurring capture
  capture                  capture a single frame (while stopped)
  clear                    empty the roster
  roster                   list recognized students
  status                   show scheduler, camera and session state
  dismiss                  close the current notice
  retry-camera             probe the camera again after a failure
  commit                   save the roster to the local database
  history                  list committed sessions
  export <csv|json|txt> [path]
  help                     show this text
  quit                     leave the console";

/// Command line arguments
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "attendance-console",
    version,
    about = "Operator console for face-recognition attendance capture"
)]
pub struct Args {
    /// Config file to use instead of ~/.attendance-console/config.json
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Recognition service base URL
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Replay still images from this directory instead of a camera
    #[arg(long, conflicts_with = "device")]
    pub stills_dir: Option<PathBuf>,

    /// Capture device path (e.g. /dev/video0)
    #[arg(long)]
    pub device: Option<String>,
}

impl Args {
    /// Apply command line overrides on top of the loaded config
    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.backend_url {
            config.backend.base_url = url.clone();
        }
        if let Some(dir) = &self.stills_dir {
            config.camera.source = CameraSourceKind::Directory;
            config.camera.stills_dir = Some(dir.to_string_lossy().to_string());
        }
        if let Some(device) = &self.device {
            config.camera.source = CameraSourceKind::Device;
            config.camera.device = device.clone();
        }
    }
}

/// Build the frame source selected by the camera config
pub fn build_frame_source(config: &Config) -> Result<Arc<dyn FrameSource>> {
    let camera = &config.camera;
    match camera.source {
        CameraSourceKind::Device => Ok(Arc::new(CommandCamera::new(
            camera.grabber_program.clone(),
            camera.grabber_args.clone(),
            Some(PathBuf::from(&camera.device)),
        )
        .with_grab_timeout(config.capture.controller_settings().interval))),
        CameraSourceKind::Directory => {
            let dir = camera
                .stills_dir
                .as_ref()
                .ok_or_else(|| anyhow!("camera.stills_dir must be set for the directory source"))?;
            Ok(Arc::new(DirectoryCamera::new(dir)))
        }
    }
}

/// A parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subjects,
    Select(String),
    Start,
    Stop,
    Capture,
    Clear,
    Roster,
    Status,
    Dismiss,
    RetryCamera,
    Commit,
    History,
    Export {
        format: ExportFormat,
        path: Option<PathBuf>,
    },
    Help,
    Quit,
}

/// Parse one input line; `Ok(None)` for a blank line
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "subjects" => Command::Subjects,
        "select" => {
            let id = parts.next().ok_or("usage: select <subject id>")?;
            Command::Select(id.to_string())
        }
        "start" => Command::Start,
        "stop" => Command::Stop,
        "capture" => Command::Capture,
        "clear" => Command::Clear,
        "roster" => Command::Roster,
        "status" => Command::Status,
        "dismiss" => Command::Dismiss,
        "retry-camera" => Command::RetryCamera,
        "commit" => Command::Commit,
        "history" => Command::History,
        "export" => {
            let format = parts
                .next()
                .ok_or("usage: export <csv|json|txt> [path]")?
                .parse::<ExportFormat>()
                .map_err(|e| e.to_string())?;
            Command::Export {
                format,
                path: parts.next().map(PathBuf::from),
            }
        }
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command: {} (type 'help')", other)),
    };
    Ok(Some(command))
}

/// Result of executing a command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    pub text: String,
    pub quit: bool,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quit: false,
        }
    }

    fn empty() -> Self {
        Self::default()
    }
}

/// Console state
pub struct Console {
    controller: CaptureController,
    client: AttendanceApiClient,
    subjects: Vec<Subject>,
    database_path: PathBuf,
    database: Option<Connection>,
}

impl Console {
    pub fn new(
        controller: CaptureController,
        client: AttendanceApiClient,
        database_path: PathBuf,
    ) -> Self {
        Self {
            controller,
            client,
            subjects: Vec::new(),
            database_path,
            database: None,
        }
    }

    pub fn controller(&self) -> &CaptureController {
        &self.controller
    }

    /// Subjects known to the console
    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    /// Replace the known subjects without asking the backend
    pub fn set_subjects(&mut self, subjects: Vec<Subject>) {
        self.subjects = subjects;
    }

    pub async fn client_is_available(&self) -> bool {
        self.client.is_available().await
    }

    /// Fetch subjects from the backend
    pub async fn reload_subjects(&mut self) -> Result<usize> {
        let subjects = self
            .client
            .list_subjects()
            .await
            .context("Failed to load subjects")?;
        self.subjects = subjects;
        Ok(self.subjects.len())
    }

    fn database(&mut self) -> Result<&mut Connection, DatabaseError> {
        let conn = match self.database.take() {
            Some(conn) => conn,
            None => database::open_database(&self.database_path)?,
        };
        Ok(self.database.insert(conn))
    }

    /// Run one command
    pub async fn execute(&mut self, command: Command) -> Result<Reply> {
        let reply = match command {
            Command::Subjects => {
                self.reload_subjects().await?;
                Reply::text(self.format_subjects())
            }
            Command::Select(id) => {
                if self.subjects.is_empty() {
                    self.reload_subjects().await?;
                }
                let subject = self
                    .subjects
                    .iter()
                    .find(|s| s.id == id || s.code.eq_ignore_ascii_case(&id))
                    .cloned()
                    .ok_or_else(|| anyhow!("No subject with id or code '{}'", id))?;
                let label = subject.display_name();
                match self.controller.select_subject(subject) {
                    Ok(()) => Reply::text(format!("Selected {}", label)),
                    Err(_) => Reply::empty(),
                }
            }
            Command::Start => {
                let _ = self.controller.start();
                Reply::empty()
            }
            Command::Stop => match self.controller.stop() {
                Ok(()) => Reply::empty(),
                Err(_) => Reply::text("Recognition is not running"),
            },
            Command::Capture => match self.controller.capture_once() {
                Err(crate::error::CaptureError::CycleInFlight) => {
                    Reply::text("A capture is already in progress")
                }
                _ => Reply::empty(),
            },
            Command::Clear => {
                self.controller.clear();
                Reply::empty()
            }
            Command::Roster => Reply::text(self.format_roster()),
            Command::Status => Reply::text(self.format_status()),
            Command::Dismiss => {
                self.controller.notifications().dismiss();
                Reply::empty()
            }
            Command::RetryCamera => {
                let state = self.controller.retry_camera().await;
                Reply::text(state.description())
            }
            Command::Commit => {
                let snapshot = self.controller.snapshot();
                let conn = self.database()?;
                let committed = database::commit_session(conn, &snapshot)?;
                Reply::text(format!(
                    "Committed {} student(s) for {} as {}",
                    committed.student_count, committed.subject_code, committed.id
                ))
            }
            Command::History => {
                let conn = self.database()?;
                let sessions = database::list_committed_sessions(conn, Some(HISTORY_LIMIT))?;
                if sessions.is_empty() {
                    Reply::text("No committed sessions")
                } else {
                    let lines: Vec<String> = sessions
                        .iter()
                        .map(|s| {
                            format!(
                                "{}  {:<10} {:>4} student(s)  {}",
                                s.committed_at, s.subject_code, s.student_count, s.id
                            )
                        })
                        .collect();
                    Reply::text(lines.join("\n"))
                }
            }
            Command::Export { format, path } => {
                let snapshot = self.controller.snapshot();
                let path = path.unwrap_or_else(|| {
                    PathBuf::from(export::default_export_file_name(&snapshot, format))
                });
                let count = export::export_roster(&snapshot, format, &path)?;
                Reply::text(format!("Exported {} student(s) to {}", count, path.display()))
            }
            Command::Help => Reply::text(HELP_TEXT),
            Command::Quit => {
                self.controller.detach();
                Reply {
                    text: String::new(),
                    quit: true,
                }
            }
        };
        Ok(reply)
    }

    fn format_subjects(&self) -> String {
        if self.subjects.is_empty() {
            return "No subjects available".to_string();
        }
        self.subjects
            .iter()
            .map(|s| format!("{:>4}  {:<10} {}", s.id, s.code, s.name))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_roster(&self) -> String {
        let snapshot = self.controller.snapshot();
        let mut lines = vec![format!("Recognized Students ({})", snapshot.roster.len())];
        for student in &snapshot.roster {
            lines.push(format!(
                "  {}  {:<30} {}",
                student
                    .recognized_at
                    .with_timezone(&chrono::Local)
                    .format("%H:%M:%S"),
                student.name,
                student.roll_number
            ));
        }
        lines.join("\n")
    }

    fn format_status(&self) -> String {
        let snapshot = self.controller.snapshot();
        let subject = snapshot
            .subject
            .as_ref()
            .map(|s| s.display_name())
            .unwrap_or_else(|| "none".to_string());
        format!(
            "Scheduler: {} (for {}s)\nRuns started: {}\nCamera: {}\nSubject: {}\nRoster: {} student(s)\nCycle in flight: {}",
            self.controller.state().description(),
            self.controller.time_in_state().as_secs(),
            self.controller.runs_started(),
            self.controller.camera_state().description(),
            subject,
            snapshot.roster.len(),
            if self.controller.is_cycle_in_flight() {
                "yes"
            } else {
                "no"
            }
        )
    }
}

/// Print notices as they are raised
pub fn spawn_notification_printer(bus: &NotificationBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let notice = rx.borrow_and_update().clone();
            if let Some(notice) = notice.filter(|n| n.is_open) {
                println!("[{}] {}", notice.severity.label(), notice.message);
            }
        }
    })
}

/// Read commands from stdin until `quit` or end of input
pub async fn run_repl(console: &mut Console) -> Result<()> {
    println!("Type 'help' for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };

        match console.execute(command).await {
            Ok(reply) => {
                if !reply.text.is_empty() {
                    println!("{}", reply.text);
                }
                if reply.quit {
                    return Ok(());
                }
            }
            Err(e) => {
                tracing::warn!("Command failed: {:#}", e);
                println!("Error: {:#}", e);
            }
        }
    }

    // End of input behaves like quit
    console.controller().detach();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("start").unwrap(), Some(Command::Start));
        assert_eq!(parse_command("  STOP ").unwrap(), Some(Command::Stop));
        assert_eq!(
            parse_command("retry-camera").unwrap(),
            Some(Command::RetryCamera)
        );
        assert_eq!(parse_command("exit").unwrap(), Some(Command::Quit));
        assert_eq!(parse_command("").unwrap(), None);
    }

    #[test]
    fn test_parse_select() {
        assert_eq!(
            parse_command("select 12").unwrap(),
            Some(Command::Select("12".to_string()))
        );
        assert!(parse_command("select").is_err());
    }

    #[test]
    fn test_parse_export() {
        assert_eq!(
            parse_command("export csv /tmp/out.csv").unwrap(),
            Some(Command::Export {
                format: ExportFormat::Csv,
                path: Some(PathBuf::from("/tmp/out.csv")),
            })
        );
        assert_eq!(
            parse_command("export json").unwrap(),
            Some(Command::Export {
                format: ExportFormat::Json,
                path: None,
            })
        );
        assert!(parse_command("export pdf").is_err());
    }

    #[test]
    fn test_parse_unknown() {
        let err = parse_command("dance").unwrap_err();
        assert!(err.contains("Unknown command"));
    }

    #[test]
    fn test_args_override_config() {
        let args = Args::parse_from([
            "attendance-console",
            "--backend-url",
            "http://10.0.0.5:5000",
            "--stills-dir",
            "/srv/stills",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.backend.base_url, "http://10.0.0.5:5000");
        assert_eq!(config.camera.source, CameraSourceKind::Directory);
        assert_eq!(config.camera.stills_dir.as_deref(), Some("/srv/stills"));
    }

    #[test]
    fn test_stills_dir_conflicts_with_device() {
        let result = Args::try_parse_from([
            "attendance-console",
            "--stills-dir",
            "/srv/stills",
            "--device",
            "/dev/video1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_directory_source_requires_dir() {
        let mut config = Config::default();
        config.camera.source = CameraSourceKind::Directory;
        assert!(build_frame_source(&config).is_err());

        config.camera.stills_dir = Some("/srv/stills".to_string());
        let source = build_frame_source(&config).unwrap();
        assert!(source.name().contains("/srv/stills"));
    }

    #[tokio::test]
    async fn test_status_reports_scheduler_and_runs() {
        use crate::camera::{AcquireSettings, CapabilityProbe, FrameAcquirer};
        use crate::session::ControllerSettings;
        use std::time::Duration;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let source: Arc<dyn FrameSource> = Arc::new(DirectoryCamera::new(dir.path()));
        let client = AttendanceApiClient::with_config("http://127.0.0.1:9", 1).unwrap();
        let controller = CaptureController::new(
            FrameAcquirer::new(source, CapabilityProbe::new(), AcquireSettings::default()),
            Arc::new(client.clone()),
            NotificationBus::new(None),
            ControllerSettings {
                interval: Duration::from_secs(3600),
                no_frame_warning_streak: 3,
            },
        );
        let mut console = Console::new(controller, client, dir.path().join("attendance.db"));

        let idle = console.execute(Command::Status).await.unwrap().text;
        assert!(idle.contains("Scheduler: Idle"));
        assert!(idle.contains("Runs started: 0"));
        assert!(idle.contains("Subject: none"));

        console.controller().on_camera_ready();
        console
            .controller()
            .select_subject(Subject {
                id: "3".to_string(),
                name: "Biology".to_string(),
                code: "BIO1".to_string(),
                faculty: None,
                description: None,
            })
            .unwrap();
        console.controller().start().unwrap();
        console.controller().settle().await;

        let running = console.execute(Command::Status).await.unwrap().text;
        assert!(running.contains("Runs started: 1"));
        assert!(running.contains("Subject: Biology (BIO1)"));
        console.controller().stop().unwrap();
    }

    #[test]
    fn test_device_source_name() {
        let config = Config::default();
        let source = build_frame_source(&config).unwrap();
        assert_eq!(source.name(), "ffmpeg (/dev/video0)");
    }
}
