//! Frame source implementations
//!
//! - [`CommandCamera`] shells out to an external grabber (ffmpeg on a v4l2
//!   device by default) and decodes the still it writes to stdout.
//! - [`DirectoryCamera`] replays stills from a directory in rotation.

use super::{CameraError, FrameSource};
use image::DynamicImage;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use wait_timeout::ChildExt;

/// Default grabber program
pub const DEFAULT_GRABBER_PROGRAM: &str = "ffmpeg";

/// Default capture device
pub const DEFAULT_DEVICE: &str = "/dev/video0";

/// Default deadline for one grab, matching the default capture interval
pub const DEFAULT_GRAB_TIMEOUT: Duration = Duration::from_millis(3000);

/// Placeholder replaced by the device path in grabber arguments
const DEVICE_PLACEHOLDER: &str = "{device}";

/// Default grabber arguments: one MJPEG frame from a v4l2 device to stdout
pub fn default_grabber_args() -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "v4l2",
        "-i",
        DEVICE_PLACEHOLDER,
        "-frames:v",
        "1",
        "-f",
        "image2pipe",
        "-vcodec",
        "mjpeg",
        "-",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Camera backed by an external grabber command
#[derive(Debug, Clone)]
pub struct CommandCamera {
    program: String,
    args: Vec<String>,
    device: Option<PathBuf>,
    grab_timeout: Duration,
}

impl CommandCamera {
    /// ffmpeg grabbing from `device`
    pub fn ffmpeg(device: impl Into<PathBuf>) -> Self {
        Self::new(DEFAULT_GRABBER_PROGRAM, default_grabber_args(), Some(device.into()))
    }

    /// Arbitrary grabber; `{device}` in `args` is replaced by the device path
    pub fn new(program: impl Into<String>, args: Vec<String>, device: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            device,
            grab_timeout: DEFAULT_GRAB_TIMEOUT,
        }
    }

    /// Kill the grabber if it has not exited within `timeout`
    pub fn with_grab_timeout(mut self, timeout: Duration) -> Self {
        self.grab_timeout = timeout;
        self
    }

    pub fn grab_timeout(&self) -> Duration {
        self.grab_timeout
    }

    /// Arguments with the device placeholder substituted
    pub fn resolved_args(&self) -> Vec<String> {
        let device = self
            .device
            .as_ref()
            .map(|d| d.to_string_lossy().to_string())
            .unwrap_or_default();
        self.args
            .iter()
            .map(|arg| arg.replace(DEVICE_PLACEHOLDER, &device))
            .collect()
    }
}

impl FrameSource for CommandCamera {
    fn name(&self) -> String {
        match &self.device {
            Some(device) => format!("{} ({})", self.program, device.display()),
            None => self.program.clone(),
        }
    }

    fn open(&self) -> Result<(), CameraError> {
        let Some(device) = &self.device else {
            return Ok(());
        };

        match std::fs::File::open(device) {
            Ok(_) => {
                tracing::debug!("Camera device {} is readable", device.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(CameraError::PermissionDenied(
                format!("cannot read {}", device.display()),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CameraError::Device(format!(
                "camera device {} not found",
                device.display()
            ))),
            Err(e) => Err(CameraError::Device(format!(
                "cannot open {}: {}",
                device.display(),
                e
            ))),
        }
    }

    fn grab(&self) -> Result<Option<DynamicImage>, CameraError> {
        let mut child = Command::new(&self.program)
            .args(self.resolved_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CameraError::Device(format!("failed to run {}: {}", self.program, e)))?;

        // Drain both pipes while waiting so a large frame cannot fill them
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match child.wait_timeout(self.grab_timeout) {
            Ok(Some(status)) => status,
            outcome => {
                let _ = child.kill();
                let _ = child.wait();
                collect(stdout);
                collect(stderr);
                return Err(match outcome {
                    Err(e) => CameraError::Device(format!(
                        "failed to wait for {}: {}",
                        self.program, e
                    )),
                    Ok(_) => {
                        tracing::warn!(
                            "{} produced no frame within {:?}, killed",
                            self.program,
                            self.grab_timeout
                        );
                        CameraError::Timeout(self.grab_timeout.as_millis() as u64)
                    }
                });
            }
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            let detail = stderr.lines().next().unwrap_or("no output").trim().to_string();
            return Err(CameraError::Device(format!(
                "{} exited with {}: {}",
                self.program, status, detail
            )));
        }

        if stdout.is_empty() {
            return Ok(None);
        }

        Ok(Some(image::load_from_memory(&stdout)?))
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Camera that replays stills from a directory
#[derive(Debug)]
pub struct DirectoryCamera {
    dir: PathBuf,
    cursor: AtomicUsize,
}

impl DirectoryCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Still images in the directory, sorted by file name
    pub fn list_stills(&self) -> Result<Vec<PathBuf>, CameraError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            CameraError::Device(format!("cannot read {}: {}", self.dir.display(), e))
        })?;

        let mut stills: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_still(path))
            .collect();
        stills.sort();
        Ok(stills)
    }
}

impl FrameSource for DirectoryCamera {
    fn name(&self) -> String {
        format!("stills ({})", self.dir.display())
    }

    fn open(&self) -> Result<(), CameraError> {
        let stills = self.list_stills()?;
        tracing::info!(
            "Replaying {} still(s) from {}",
            stills.len(),
            self.dir.display()
        );
        Ok(())
    }

    fn grab(&self) -> Result<Option<DynamicImage>, CameraError> {
        let stills = self.list_stills()?;
        if stills.is_empty() {
            return Ok(None);
        }

        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % stills.len();
        Ok(Some(image::open(&stills[index])?))
    }
}

fn is_still(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_still(dir: &Path, name: &str, width: u32) {
        RgbImage::from_pixel(width, 10, Rgb([10, 20, 30]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_is_still() {
        assert!(is_still(Path::new("a.jpg")));
        assert!(is_still(Path::new("a.JPEG")));
        assert!(is_still(Path::new("a.png")));
        assert!(!is_still(Path::new("a.txt")));
        assert!(!is_still(Path::new("noext")));
    }

    #[test]
    fn test_default_args_substitute_device() {
        let camera = CommandCamera::ffmpeg("/dev/video2");
        let args = camera.resolved_args();
        assert!(args.contains(&"/dev/video2".to_string()));
        assert!(!args.iter().any(|a| a.contains(DEVICE_PLACEHOLDER)));
        assert_eq!(camera.name(), "ffmpeg (/dev/video2)");
    }

    #[test]
    fn test_command_camera_missing_device() {
        let camera = CommandCamera::ffmpeg("/dev/this-camera-does-not-exist");
        let err = camera.open().unwrap_err();
        assert!(matches!(err, CameraError::Device(_)));
        assert!(err.to_string().contains("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_camera_empty_output_is_no_frame() {
        let camera = CommandCamera::new("true", Vec::new(), None);
        assert!(camera.open().is_ok());
        assert!(camera.grab().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_camera_failure_is_device_error() {
        let camera = CommandCamera::new("false", Vec::new(), None);
        assert!(matches!(camera.grab(), Err(CameraError::Device(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_camera_stuck_grabber_is_killed() {
        let camera = CommandCamera::new("sleep", vec!["30".to_string()], None)
            .with_grab_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = camera.grab().unwrap_err();
        assert!(matches!(err, CameraError::Timeout(200)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_camera_decodes_stdout() {
        let dir = TempDir::new().unwrap();
        write_still(dir.path(), "frame.png", 8);
        let path = dir.path().join("frame.png").to_string_lossy().to_string();

        let camera = CommandCamera::new("cat", vec![path], None);
        let image = camera.grab().unwrap().unwrap();
        assert_eq!(image.width(), 8);
    }

    #[test]
    fn test_directory_camera_rotates_stills() {
        let dir = TempDir::new().unwrap();
        write_still(dir.path(), "01.png", 4);
        write_still(dir.path(), "02.png", 6);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let camera = DirectoryCamera::new(dir.path());
        camera.open().unwrap();
        assert_eq!(camera.list_stills().unwrap().len(), 2);

        let widths: Vec<u32> = (0..3)
            .map(|_| camera.grab().unwrap().unwrap().width())
            .collect();
        assert_eq!(widths, vec![4, 6, 4]);
    }

    #[test]
    fn test_directory_camera_empty_dir_has_no_frame() {
        let dir = TempDir::new().unwrap();
        let camera = DirectoryCamera::new(dir.path());
        camera.open().unwrap();
        assert!(camera.grab().unwrap().is_none());
    }

    #[test]
    fn test_directory_camera_missing_dir() {
        let camera = DirectoryCamera::new("/definitely/not/a/real/dir");
        assert!(matches!(camera.open(), Err(CameraError::Device(_))));
    }
}
