use csv::{ReaderBuilder, StringRecord};
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::errors::{AppError, AppResult};
use crate::markers::{Coordinates, ResolvedPoint};

const ID_COLUMN: &str = "id";
const DESCRIPTION_COLUMNS: &[&str] = &["message", "description"];

/// One validated input row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub description: String,
}

impl Record {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }
}

struct ColumnMap {
    id: usize,
    description: usize,
}

impl ColumnMap {
    fn locate(headers: &StringRecord) -> Option<Self> {
        let normalized: Vec<String> = headers
            .iter()
            .map(|name| name.trim_start_matches('\u{feff}').trim().to_ascii_lowercase())
            .collect();
        let position = |wanted: &str| normalized.iter().position(|name| name == wanted);

        let id = position(ID_COLUMN)?;
        let description = DESCRIPTION_COLUMNS.iter().find_map(|name| position(*name))?;
        Some(Self { id, description })
    }

    fn extract(&self, row: &StringRecord) -> Option<Record> {
        let id = non_empty(row.get(self.id))?;
        let description = non_empty(row.get(self.description))?;
        Some(Record::new(id, description))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Parses a delimited table with a header row into records. Rows without a usable id
/// or message are skipped without error.
pub fn parse_rows(bytes: &[u8]) -> AppResult<Vec<Record>> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();

    let Some(columns) = ColumnMap::locate(&headers) else {
        warn!(
            headers = ?headers.iter().collect::<Vec<_>>(),
            "input has no id/message columns; every row will be skipped"
        );
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    let mut skipped = 0_usize;
    for (index, row) in reader.records().enumerate() {
        match row {
            Ok(row) => match columns.extract(&row) {
                Some(record) => records.push(record),
                None => {
                    skipped += 1;
                    trace!(row = index + 1, "skipping row without id or message");
                }
            },
            Err(err) => {
                skipped += 1;
                trace!(?err, row = index + 1, "skipping unreadable row");
            }
        }
    }

    debug!(accepted = records.len(), skipped, "parsed input rows");
    Ok(records)
}

/// Reads placemarks back out of an exported KML document.
pub fn parse_geo_markup(bytes: &[u8]) -> AppResult<Vec<ResolvedPoint>> {
    let xml = std::str::from_utf8(bytes)
        .map_err(|err| AppError::Parse(format!("invalid UTF-8 in KML: {err}")))?;
    let document =
        Document::parse(xml).map_err(|err| AppError::Parse(format!("invalid KML: {err}")))?;

    document
        .descendants()
        .filter(|node| node.tag_name().name() == "Placemark")
        .map(parse_placemark)
        .collect()
}

fn parse_placemark(node: Node<'_, '_>) -> AppResult<ResolvedPoint> {
    let name = child_text(node, "name").unwrap_or_default();
    let description = child_text(node, "description").unwrap_or_default();

    let coordinates = node
        .descendants()
        .find(|child| child.tag_name().name() == "coordinates")
        .and_then(|child| child.text())
        .map(|value| value.trim().to_string())
        .ok_or_else(|| AppError::Parse(format!("placemark {name:?} has no coordinates")))?;

    let coords = parse_coordinates(&coordinates)
        .ok_or_else(|| AppError::Parse(format!("placemark {name:?} has invalid coordinates")))?;

    ResolvedPoint::new(name.clone(), description, coords)
        .ok_or_else(|| AppError::Parse(format!("placemark {name:?} is out of range")))
}

fn child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|child| child.tag_name().name() == tag)
        .and_then(|child| child.text())
        .map(str::to_string)
}

// KML tuples are `lng,lat[,alt]`.
fn parse_coordinates(value: &str) -> Option<Coordinates> {
    let entry = value.split_whitespace().next()?;
    let mut parts = entry.split(',');
    let lng = parts.next()?.trim().parse().ok()?;
    let lat = parts.next()?.trim().parse().ok()?;
    Some(Coordinates::new(lat, lng))
}
