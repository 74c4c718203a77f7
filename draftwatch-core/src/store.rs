//! Parameter Persistence
//!
//! Reads and writes the trained threshold table as a small CSV file under
//! the model root. The format is deliberately boring so an operator can
//! inspect or hand-edit it:
//!
//! ```csv
//! room,delta_temperature_threshold,delta_humidity_threshold
//! bedroom,1.25,4.5
//! kitchen,0.75,6.25
//! ```
//!
//! ## Trust rules
//!
//! Loading never panics and never returns a partial table. A file that is
//! absent or zero-length is the normal first-run state
//! ([`LoadOutcome::Missing`]). Any defect inside an existing file rejects
//! the whole table ([`LoadOutcome::Malformed`]): a half-trusted parameter
//! set would silently disable some rooms while appearing healthy.
//!
//! ## Write rules
//!
//! [`ParameterStore::save`] creates missing parent directories and
//! replaces the file atomically via a sibling temp file and rename, so a
//! concurrent load sees either the previous table or the new one, never a
//! torn write.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::constants::{PARAMETER_CSV_HEADER, PARAMETER_FILE_NAME, PARAMETER_SUBDIR};
use crate::params::{LoadOutcome, ParameterSet, ThresholdParams};
use crate::reading::RoomId;

/// Upper bound on CSV fields per line; anything wider is malformed.
const MAX_FIELDS: usize = 8;

/// File-backed store for the trained parameter table.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    path: PathBuf,
}

impl ParameterStore {
    /// Create a store rooted at the given model directory.
    ///
    /// The table lives at `<model_root>/windowpredictor/modelparameter.csv`.
    /// Nothing is touched on disk until the first [`save`](Self::save).
    pub fn new<P: AsRef<Path>>(model_root: P) -> Self {
        Self {
            path: model_root
                .as_ref()
                .join(PARAMETER_SUBDIR)
                .join(PARAMETER_FILE_NAME),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the parameter table.
    ///
    /// Classifies every possible state of the backing file; see the
    /// module docs for the trust rules. This never returns an `Err`:
    /// storage trouble is a state of the model, not a failure of the
    /// caller.
    pub fn load(&self) -> LoadOutcome {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return LoadOutcome::Missing,
            Err(e) => return LoadOutcome::Io(e.to_string()),
        };

        if text.trim().is_empty() {
            return LoadOutcome::Missing;
        }

        parse_parameter_csv(&text)
    }

    /// Persist the parameter table, replacing any previous file.
    ///
    /// Creates the parent directories on first use. The write goes to a
    /// sibling temp file first and is moved into place with a rename.
    pub fn save(&self, params: &ParameterSet) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut contents = String::new();
        let _ = writeln!(contents, "{}", PARAMETER_CSV_HEADER);
        for (room, thresholds) in params.iter() {
            let _ = writeln!(
                contents,
                "{},{},{}",
                room, thresholds.delta_temperature_threshold, thresholds.delta_humidity_threshold
            );
        }

        let tmp = self.path.with_extension("csv.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)
    }
}

/// Split one CSV line into trimmed fields without risking overflow.
fn split_fields(line: &str) -> Option<heapless::Vec<&str, MAX_FIELDS>> {
    let mut fields = heapless::Vec::new();
    for field in line.split(',') {
        if fields.push(field.trim()).is_err() {
            return None;
        }
    }
    Some(fields)
}

fn parse_parameter_csv(text: &str) -> LoadOutcome {
    let mut room_col = None;
    let mut temp_col = None;
    let mut hum_col = None;
    let mut header_seen = false;
    let mut params = ParameterSet::new();

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields = match split_fields(line) {
            Some(fields) => fields,
            None => {
                return LoadOutcome::Malformed(format!("line {}: too many fields", line_no + 1))
            }
        };

        if !header_seen {
            // Columns are matched by name, not position, like any other
            // tabular reader of this file would.
            for (idx, name) in fields.iter().enumerate() {
                match *name {
                    "room" => room_col = Some(idx),
                    "delta_temperature_threshold" => temp_col = Some(idx),
                    "delta_humidity_threshold" => hum_col = Some(idx),
                    _ => {}
                }
            }

            if room_col.is_none() || temp_col.is_none() || hum_col.is_none() {
                return LoadOutcome::Malformed("header is missing a required column".into());
            }

            header_seen = true;
            continue;
        }

        let (row_room, thresholds) = match parse_row(&fields, room_col, temp_col, hum_col) {
            Ok(row) => row,
            Err(reason) => {
                return LoadOutcome::Malformed(format!("line {}: {}", line_no + 1, reason))
            }
        };

        if params.insert(row_room, thresholds).is_some() {
            return LoadOutcome::Malformed(format!(
                "line {}: duplicate room {}",
                line_no + 1,
                row_room
            ));
        }
    }

    if !header_seen {
        return LoadOutcome::Malformed("no header line found".into());
    }
    if params.is_empty() {
        return LoadOutcome::Malformed("header present but no parameter rows".into());
    }

    LoadOutcome::Loaded(params)
}

fn parse_row(
    fields: &[&str],
    room_col: Option<usize>,
    temp_col: Option<usize>,
    hum_col: Option<usize>,
) -> Result<(RoomId, ThresholdParams), &'static str> {
    let field = |col: Option<usize>| col.and_then(|idx| fields.get(idx).copied());

    let room = field(room_col)
        .and_then(RoomId::new)
        .ok_or("missing or invalid room name")?;

    let parse_threshold = |col: Option<usize>| -> Result<f32, &'static str> {
        let value: f32 = field(col)
            .ok_or("missing threshold value")?
            .parse()
            .map_err(|_| "non-numeric threshold value")?;
        if !value.is_finite() {
            return Err("non-finite threshold value");
        }
        Ok(value)
    };

    let thresholds = ThresholdParams::new(parse_threshold(temp_col)?, parse_threshold(hum_col)?);
    Ok((room, thresholds))
}
