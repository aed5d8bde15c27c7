use std::fs;
use std::path::PathBuf;

use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::markers::ResolvedPoint;

pub const KML_FILE_NAME: &str = "markers.kml";
pub const KML_MIME: &str = "application/vnd.google-earth.kml+xml";
pub const CSV_FILE_NAME: &str = "markers.csv";
pub const CSV_MIME: &str = "text/csv";

const KML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<kml xmlns=\"http://www.opengis.net/kml/2.2\">\n<Document>\n";
const KML_FOOTER: &str = "</Document>\n</kml>\n";

/// Escapes the five XML special characters and drops characters XML 1.0 cannot carry.
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '\'' => escaped.push_str("&apos;"),
            '"' => escaped.push_str("&quot;"),
            '\r' => escaped.push_str("&#13;"),
            '\t' | '\n' => escaped.push(c),
            c if c.is_control() && (c as u32) < 0x20 => {}
            '\u{fffe}' | '\u{ffff}' => {}
            c => escaped.push(c),
        }
    }
    escaped
}

/// Renders points as a KML document, one placemark per point in the given order.
pub fn to_geo_markup(points: &[ResolvedPoint]) -> String {
    let mut document = String::from(KML_HEADER);
    for point in points {
        document.push_str("  <Placemark>\n");
        document.push_str(&format!("    <name>{}</name>\n", escape_xml(point.id())));
        document.push_str(&format!(
            "    <description>{}</description>\n",
            escape_xml(point.description())
        ));
        document.push_str(&format!(
            "    <Point>\n      <coordinates>{},{},0</coordinates>\n    </Point>\n",
            point.lng(),
            point.lat()
        ));
        document.push_str("  </Placemark>\n");
    }
    document.push_str(KML_FOOTER);
    document
}

/// Writes points back to the tabular input format (`id,message`) with coordinates as
/// extra columns.
pub fn to_csv(points: &[ResolvedPoint]) -> AppResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["id", "message", "lat", "lng"])?;
    for point in points {
        writer.write_record([
            point.id().to_string(),
            point.description().to_string(),
            point.lat().to_string(),
            point.lng().to_string(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| AppError::Export(format!("failed to finish CSV export: {err}")))?;
    String::from_utf8(bytes)
        .map_err(|err| AppError::Export(format!("CSV export is not UTF-8: {err}")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ExportArtifact {
    pub fn kml(points: &[ResolvedPoint]) -> Self {
        Self {
            file_name: KML_FILE_NAME.to_string(),
            mime_type: KML_MIME.to_string(),
            bytes: to_geo_markup(points).into_bytes(),
        }
    }

    pub fn csv(points: &[ResolvedPoint]) -> AppResult<Self> {
        Ok(Self {
            file_name: CSV_FILE_NAME.to_string(),
            mime_type: CSV_MIME.to_string(),
            bytes: to_csv(points)?.into_bytes(),
        })
    }
}

/// Destination for exported files.
pub trait DownloadSink {
    fn deliver(&self, artifact: &ExportArtifact) -> AppResult<PathBuf>;
}

pub struct DirectoryDownloadSink {
    dir: PathBuf,
}

impl DirectoryDownloadSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DownloadSink for DirectoryDownloadSink {
    fn deliver(&self, artifact: &ExportArtifact) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(&artifact.file_name);
        fs::write(&path, &artifact.bytes)?;
        info!(
            path = %path.display(),
            mime = %artifact.mime_type,
            bytes = artifact.bytes.len(),
            "exported markers"
        );
        Ok(path)
    }
}
