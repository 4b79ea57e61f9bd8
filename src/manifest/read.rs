use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use log::{info, warn};

use crate::error::InputError;

/// A manifest as read from disk, before any interpretation
#[derive(Debug, Clone, Default)]
pub struct RawManifest {
    /// where the rows came from, for messages
    pub source: String,
    pub rows: Vec<RawRow>,
}

/// One `(sample, codes)` row; sample first, code field second
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub line: u64,
    pub fields: Vec<String>,
}

/// How the rows of a manifest file are laid out
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Layout {
    /// tab separated `sample<TAB>codes`, no header; `#` lines are comments
    Tabular,
    /// booking system export: a batch id line, a `;` separated header line, then one row per
    /// booking with the sample id split over instrument and specimen columns
    Booking,
}

const INSTRUMENT: &str = "Instrument ID";
const SPECIMEN: &str = "Specimen ID";
const REANALYSIS_INSTRUMENT: &str = "Re-analysis Instrument ID";
const REANALYSIS_SPECIMEN: &str = "Re-analysis Specimen ID";
const TEST_CODES: &str = "Test Codes";

pub fn read_manifest(path: &Path) -> Result<RawManifest, InputError> {
    info!("Reading manifest {}", path.display());
    let file = File::open(path).map_err(|source| InputError::Read { path: path.to_path_buf(), source })?;
    let manifest = parse_manifest(&path.display().to_string(), file)?;
    info!("Manifest {} has {} row(s)", manifest.source, manifest.rows.len());
    Ok(manifest)
}

/// Parse a manifest of either layout into raw rows
pub fn parse_manifest<R: Read>(source: &str, mut reader: R) -> Result<RawManifest, InputError> {
    let path = PathBuf::from(source);
    let mut text = String::new();
    reader.read_to_string(&mut text).map_err(|err| InputError::Read { path: path.clone(), source: err })?;

    let rows = match detect_layout(&text) {
        Layout::Tabular => parse_tabular(&path, &text),
        Layout::Booking => parse_booking(&path, &text),
    }?;
    Ok(RawManifest { source: source.to_string(), rows })
}

/// Booking exports are `;` separated below their batch id line and carry no tabs
pub fn detect_layout(text: &str) -> Layout {
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let booking = lines.len() >= 2 && !text.contains('\t') && lines[1..].iter().all(|line| line.contains(';'));
    match booking {
        true => Layout::Booking,
        false => Layout::Tabular,
    }
}

fn parse_tabular(path: &Path, text: &str) -> Result<Vec<RawRow>, InputError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(|source| InputError::Parse { path: path.to_path_buf(), source })?;
        let line = record.position().map_or(0, |position| position.line());
        let fields: Vec<String> = record.iter().map(|field| field.trim().to_string()).collect();
        if fields.iter().all(|field| field.is_empty()) {
            continue;
        }
        rows.push(RawRow { line, fields });
    }
    Ok(rows)
}

/// One row per booked code, so booking rows look like tabular ones to the normaliser
fn parse_booking(path: &Path, text: &str) -> Result<Vec<RawRow>, InputError> {
    let (batch, body) = text.split_once('\n').unwrap_or((text, ""));
    info!("Booking manifest batch {}", batch.trim());

    let mut csv_reader = csv::ReaderBuilder::new().delimiter(b';').has_headers(true).flexible(true).from_reader(body.as_bytes());
    let header = csv_reader.headers().map_err(|source| InputError::Parse { path: path.to_path_buf(), source })?.clone();
    let columns = BookingColumns::find(&header).map_err(|missing| InputError::Layout {
        path: path.to_path_buf(),
        reason: format!("missing column(s): {}", missing.join(", ")),
    })?;

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(|source| InputError::Parse { path: path.to_path_buf(), source })?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        // the batch id line sits above the csv body
        let line = record.position().map_or(0, |position| position.line() + 1);
        let sample = columns.sample(&record);
        if sample.is_empty() {
            warn!("{} line {}: no instrument and specimen id", path.display(), line);
        }

        let codes: Vec<String> = columns
            .get(&record, columns.codes)
            .split(',')
            .map(strip_spaces)
            .filter(|code| !code.is_empty())
            .collect();
        match codes.is_empty() {
            true => rows.push(RawRow { line, fields: vec![sample, String::new()] }),
            false => rows.extend(codes.into_iter().map(|code| RawRow { line, fields: vec![sample.clone(), code] })),
        }
    }
    Ok(rows)
}

struct BookingColumns {
    instrument: usize,
    specimen: usize,
    reanalysis_instrument: usize,
    reanalysis_specimen: usize,
    codes: usize,
}

impl BookingColumns {
    fn find(header: &StringRecord) -> Result<BookingColumns, Vec<&'static str>> {
        let position = |name: &str| header.iter().position(|column| column.trim() == name);
        let wanted = [INSTRUMENT, SPECIMEN, REANALYSIS_INSTRUMENT, REANALYSIS_SPECIMEN, TEST_CODES];
        let found: Vec<Option<usize>> = wanted.iter().map(|&name| position(name)).collect();
        match found.as_slice() {
            [Some(instrument), Some(specimen), Some(reanalysis_instrument), Some(reanalysis_specimen), Some(codes)] => Ok(BookingColumns {
                instrument: *instrument,
                specimen: *specimen,
                reanalysis_instrument: *reanalysis_instrument,
                reanalysis_specimen: *reanalysis_specimen,
                codes: *codes,
            }),
            _ => Err(wanted.iter().zip(&found).filter(|(_, at)| at.is_none()).map(|(name, _)| *name).collect()),
        }
    }

    fn get<'r>(&self, record: &'r StringRecord, column: usize) -> &'r str {
        record.get(column).unwrap_or_default()
    }

    /// `<instrument>-<specimen>`, with the re-analysis pair taking precedence when complete;
    /// empty when neither pair is
    fn sample(&self, record: &StringRecord) -> String {
        let pair = |instrument: usize, specimen: usize| {
            let instrument = strip_spaces(self.get(record, instrument));
            let specimen = specimen_id(self.get(record, specimen));
            match instrument.is_empty() || specimen.is_empty() {
                true => None,
                false => Some(format!("{}-{}", instrument, specimen)),
            }
        };
        pair(self.reanalysis_instrument, self.reanalysis_specimen)
            .or_else(|| pair(self.instrument, self.specimen))
            .unwrap_or_default()
    }
}

fn strip_spaces(field: &str) -> String {
    field.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Specimen ids are exported as `SP-12345.6`; samples are named `123456`
fn specimen_id(field: &str) -> String {
    strip_spaces(field).replace("SP-", "").replace('.', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOKING: &str = "batch-42;;;;;\n\
        Instrument ID;Specimen ID;Re-analysis Instrument ID;Re-analysis Specimen ID;Test Codes;Priority\n\
        123456789;SP-24R00.111;;;R207.1, R208.1, , ,;routine\n\
        ;;987654321;SP-23R00222;_HGNC:1100, , ,;urgent\n\
        ;;;;R207.1;routine\n";

    #[test]
    fn reads_rows_with_line_numbers() {
        let text = "# sample\tcodes\n123-456\tR207.1\n\nX1\tR134.1,BRCA1\n \t \n";
        let manifest = parse_manifest("booked.tsv", text.as_bytes()).unwrap();
        assert_eq!(manifest.rows.len(), 2);
        assert_eq!(manifest.rows[0].fields, vec!["123-456".to_string(), "R207.1".to_string()]);
        assert!(manifest.rows[0].line < manifest.rows[1].line);
        assert_eq!(manifest.rows[1].fields[1], "R134.1,BRCA1");
    }

    #[test]
    fn layout_is_told_from_delimiters() {
        assert_eq!(detect_layout(BOOKING), Layout::Booking);
        assert_eq!(detect_layout("X1\tR207.1\n"), Layout::Tabular);
        assert_eq!(detect_layout("X1\tR207.1;R208.1\nX2\tR1.1;R2.1\n"), Layout::Tabular);
    }

    #[test]
    fn booking_rows_join_instrument_and_specimen() {
        let manifest = parse_manifest("booking.csv", BOOKING.as_bytes()).unwrap();
        let rows: Vec<(&str, &str)> = manifest.rows.iter().map(|row| (row.fields[0].as_str(), row.fields[1].as_str())).collect();
        assert_eq!(
            rows,
            vec![
                ("123456789-24R00111", "R207.1"),
                ("123456789-24R00111", "R208.1"),
                ("987654321-23R00222", "_HGNC:1100"),
                ("", "R207.1"),
            ]
        );
        assert_eq!(manifest.rows[0].line, 3);
        assert_eq!(manifest.rows[3].line, 5);
    }

    #[test]
    fn booking_without_required_columns_is_rejected() {
        let text = "batch-42;;\nInstrument ID;Specimen ID;Test Codes\n123;SP-1;R207.1\n";
        let err = parse_manifest("booking.csv", text.as_bytes()).unwrap_err();
        assert!(matches!(err, InputError::Layout { ref reason, .. } if reason.contains("Re-analysis Instrument ID")));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = read_manifest(Path::new("/nonexistent/manifest.tsv")).unwrap_err();
        assert!(matches!(err, InputError::Read { .. }));
    }
}
