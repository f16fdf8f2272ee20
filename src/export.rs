//! Roster export.
//!
//! Writes the current session roster to JSON, CSV or plain text. Export works
//! from a [`SessionSnapshot`], so it never blocks the capture path.

use crate::session::{RecognizedStudent, SessionSnapshot};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// Status written for every roster entry.
const STATUS_PRESENT: &str = "present";

/// Export error types.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("No data to export")]
    EmptyRoster,

    #[error("Unknown export format: {0}")]
    UnknownFormat(String),

    #[error("Failed to write export file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to create JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Export format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Txt,
}

impl ExportFormat {
    /// File extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Txt => "txt",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "txt" | "text" => Ok(ExportFormat::Txt),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

/// A roster entry as written to an export file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    pub id: String,
    pub name: String,
    pub roll_number: String,
    /// Local time of first recognition (HH:MM:SS).
    pub time: String,
    /// Full first-recognition timestamp (RFC 3339).
    pub recognized_at: String,
    pub status: String,
}

impl From<&RecognizedStudent> for ExportRecord {
    fn from(student: &RecognizedStudent) -> Self {
        Self {
            id: student.id.clone(),
            name: student.name.clone(),
            roll_number: student.roll_number.clone(),
            time: student
                .recognized_at
                .with_timezone(&Local)
                .format("%H:%M:%S")
                .to_string(),
            recognized_at: student.recognized_at.to_rfc3339(),
            status: STATUS_PRESENT.to_string(),
        }
    }
}

/// JSON document layout.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonExport<'a> {
    subject_code: Option<&'a str>,
    subject_name: Option<&'a str>,
    exported_at: String,
    students: Vec<ExportRecord>,
}

// =============================================================================
// Rendering
// =============================================================================

fn records(snapshot: &SessionSnapshot) -> Vec<ExportRecord> {
    snapshot.roster.iter().map(ExportRecord::from).collect()
}

/// Renders the roster as a JSON document.
pub fn render_json(snapshot: &SessionSnapshot) -> Result<String, ExportError> {
    let doc = JsonExport {
        subject_code: snapshot.subject.as_ref().map(|s| s.code.as_str()),
        subject_name: snapshot.subject.as_ref().map(|s| s.name.as_str()),
        exported_at: Local::now().to_rfc3339(),
        students: records(snapshot),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Renders the roster as CSV.
pub fn render_csv(snapshot: &SessionSnapshot) -> String {
    let mut out = String::from("ID,Name,Roll Number,Time,Status\n");
    for record in records(snapshot) {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            escape_csv(&record.id),
            escape_csv(&record.name),
            escape_csv(&record.roll_number),
            escape_csv(&record.time),
            escape_csv(&record.status),
        ));
    }
    out
}

/// Renders the roster as plain text.
pub fn render_txt(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    if let Some(subject) = &snapshot.subject {
        out.push_str(&format!("Subject: {}\n", subject.display_name()));
    }
    out.push_str(&format!("Students: {}\n", snapshot.roster.len()));
    out.push_str(&format!("{}\n", "-".repeat(60)));

    for record in records(snapshot) {
        out.push_str(&format!(
            "{}  {:<30} {:<12} {}\n",
            record.time, record.name, record.roll_number, record.status
        ));
    }
    out
}

/// Escapes a string for CSV format (handles quotes and commas).
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

// =============================================================================
// Export Functions
// =============================================================================

/// Writes the roster of `snapshot` to `path`.
///
/// Returns the number of students written.
pub fn export_roster(
    snapshot: &SessionSnapshot,
    format: ExportFormat,
    path: &Path,
) -> Result<usize, ExportError> {
    if snapshot.roster.is_empty() {
        return Err(ExportError::EmptyRoster);
    }

    let contents = match format {
        ExportFormat::Json => render_json(snapshot)?,
        ExportFormat::Csv => render_csv(snapshot),
        ExportFormat::Txt => render_txt(snapshot),
    };

    let mut file = File::create(path).map_err(|e| {
        tracing::error!("Failed to create export file: {}", e);
        e
    })?;
    file.write_all(contents.as_bytes())?;

    tracing::info!(
        "Exported {} students to {}: {:?}",
        snapshot.roster.len(),
        format.extension().to_uppercase(),
        path
    );
    Ok(snapshot.roster.len())
}

/// File name for an export taken on `date`.
pub fn export_file_name_for_date(
    snapshot: &SessionSnapshot,
    format: ExportFormat,
    date: NaiveDate,
) -> String {
    let date = date.format("%Y-%m-%d");
    match &snapshot.subject {
        Some(subject) => format!(
            "attendance_{}_{}.{}",
            sanitise_file_component(&subject.code),
            date,
            format.extension()
        ),
        None => format!("attendance_{}.{}", date, format.extension()),
    }
}

/// File name for an export taken today.
pub fn default_export_file_name(snapshot: &SessionSnapshot, format: ExportFormat) -> String {
    export_file_name_for_date(snapshot, format, Local::now().date_naive())
}

fn sanitise_file_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::Subject;
    use chrono::{TimeZone, Utc};

    fn snapshot(students: &[(&str, &str)]) -> SessionSnapshot {
        SessionSnapshot {
            subject: Some(Subject {
                id: "5".to_string(),
                name: "Data Structures".to_string(),
                code: "CS 201".to_string(),
                faculty: None,
                description: None,
            }),
            is_running: false,
            epoch: 0,
            roster: students
                .iter()
                .map(|(id, name)| RecognizedStudent {
                    id: id.to_string(),
                    name: name.to_string(),
                    roll_number: format!("R{}", id),
                    recognized_at: Utc.with_ymd_and_hms(2025, 3, 4, 9, 15, 0).unwrap(),
                })
                .collect(),
        }
    }

    // =========================================================================
    // CSV escape function tests
    // =========================================================================

    #[test]
    fn test_escape_csv_simple() {
        assert_eq!(escape_csv("hello"), "hello");
    }

    #[test]
    fn test_escape_csv_with_comma() {
        assert_eq!(escape_csv("Doe, Jane"), "\"Doe, Jane\"");
    }

    #[test]
    fn test_escape_csv_with_quotes() {
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_escape_csv_with_newline() {
        assert_eq!(escape_csv("a\nb"), "\"a\nb\"");
    }

    // =========================================================================
    // Format tests
    // =========================================================================

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("text".parse::<ExportFormat>().unwrap(), ExportFormat::Txt);
        assert!(matches!(
            "xlsx".parse::<ExportFormat>(),
            Err(ExportError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_export_format_serialisation() {
        assert_eq!(
            serde_json::to_string(&ExportFormat::Csv).unwrap(),
            "\"csv\""
        );
    }

    // =========================================================================
    // Rendering tests
    // =========================================================================

    #[test]
    fn test_render_csv() {
        let snap = snapshot(&[("1", "Ana"), ("2", "Lee, Sam")]);
        let csv = render_csv(&snap);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "ID,Name,Roll Number,Time,Status");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("1,Ana,R1,"));
        assert!(lines[1].ends_with(",present"));
        assert!(lines[2].starts_with("2,\"Lee, Sam\",R2,"));
    }

    #[test]
    fn test_render_csv_uses_local_time() {
        let snap = snapshot(&[("1", "Ana")]);
        let expected = snap.roster[0]
            .recognized_at
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string();
        assert!(render_csv(&snap).contains(&expected));
    }

    #[test]
    fn test_render_json() {
        let snap = snapshot(&[("1", "Ana")]);
        let value: serde_json::Value = serde_json::from_str(&render_json(&snap).unwrap()).unwrap();
        assert_eq!(value["subjectCode"], "CS 201");
        assert_eq!(value["students"][0]["rollNumber"], "R1");
        assert_eq!(value["students"][0]["status"], "present");
    }

    #[test]
    fn test_render_txt() {
        let txt = render_txt(&snapshot(&[("1", "Ana")]));
        assert!(txt.starts_with("Subject: Data Structures (CS 201)\n"));
        assert!(txt.contains("Students: 1"));
        assert!(txt.contains("Ana"));
    }

    // =========================================================================
    // File name tests
    // =========================================================================

    #[test]
    fn test_export_file_name() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        let snap = snapshot(&[]);
        assert_eq!(
            export_file_name_for_date(&snap, ExportFormat::Csv, date),
            "attendance_CS_201_2025-03-04.csv"
        );

        let mut no_subject = snap.clone();
        no_subject.subject = None;
        assert_eq!(
            export_file_name_for_date(&no_subject, ExportFormat::Json, date),
            "attendance_2025-03-04.json"
        );
    }
}
