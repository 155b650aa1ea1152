use crate::pipeline::PipelineError;

/// An untyped snapshot of the source spreadsheet: header row plus data rows.
///
/// Rows may be shorter or longer than the header; cells are already trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Position of a header, compared case-insensitively.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    }

    /// First header in `names` that is present.
    pub fn column_any(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|n| self.column(n))
    }

    /// Content digest identifying this exact snapshot.
    pub fn fingerprint(&self) -> String {
        let mut h = blake3::Hasher::new();
        h.update(&(self.headers.len() as u64).to_le_bytes());
        for header in &self.headers {
            hash_str(&mut h, header);
        }
        h.update(&(self.rows.len() as u64).to_le_bytes());
        for row in &self.rows {
            h.update(&(row.len() as u32).to_le_bytes());
            for cell in row {
                hash_str(&mut h, cell);
            }
        }
        h.finalize().to_hex().to_string()
    }
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    let len = s.len() as u32;
    hasher.update(&len.to_le_bytes());
    hasher.update(s.as_bytes());
}

/// Cell text with invalid UTF-8 sequences replaced by U+FFFD.
fn lossy(cell: &[u8]) -> String {
    String::from_utf8_lossy(cell).into_owned()
}

/// Parse a CSV export into a [`RawTable`].
///
/// Ragged rows are tolerated; rows whose cells are all blank are skipped.
/// A stray non-UTF-8 byte only affects its own cell.
pub fn parse_csv_table(bytes: &[u8]) -> Result<RawTable, PipelineError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = rdr
        .byte_headers()
        .map_err(|e| PipelineError::Source(format!("failed to read CSV headers: {e}")))?
        .iter()
        .map(|h| lossy(h).trim_start_matches('\u{feff}').to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(PipelineError::DataUnavailable("CSV has no header row".to_string()));
    }

    let mut rows = Vec::new();
    let mut lossy_rows = 0usize;
    for result in rdr.byte_records() {
        let record = result.map_err(|e| PipelineError::Source(format!("failed to read CSV record: {e}")))?;
        if record.iter().all(|c| c.is_empty()) {
            continue;
        }
        if std::str::from_utf8(record.as_slice()).is_err() {
            lossy_rows += 1;
        }
        rows.push(record.iter().map(lossy).collect());
    }
    if lossy_rows > 0 {
        tracing::warn!(lossy_rows, "replaced invalid UTF-8 in CSV cells");
    }

    Ok(RawTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ragged_rows_and_skips_blank_lines() {
        let table = parse_csv_table(b"\xEF\xBB\xBFTimestamp, Location ,kW_Total\n2024-01-01 00:00:00,Shed_01\n,,\n2024-01-01 00:05:00,Shed_01,3.5,extra\n")
            .unwrap();
        assert_eq!(table.headers, vec!["Timestamp", "Location", "kW_Total"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get(2), None);
        assert_eq!(table.rows[1][2], "3.5");
        assert_eq!(table.column("location"), Some(1));
        assert_eq!(table.column_any(&["Device_ID", "LOCATION"]), Some(1));
    }

    #[test]
    fn fingerprint_is_deterministic_and_content_sensitive() {
        let a = parse_csv_table(b"a,b\n1,2\n").unwrap();
        let b = parse_csv_table(b"a,b\n1,2\n").unwrap();
        let c = parse_csv_table(b"a,b\n1,3\n").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());

        // Cell boundaries matter, not just concatenated text.
        let d = RawTable::new(vec!["ab".into()], vec![]);
        let e = RawTable::new(vec!["a".into(), "b".into()], vec![]);
        assert_ne!(d.fingerprint(), e.fingerprint());
    }

    #[test]
    fn invalid_utf8_cell_keeps_the_rest_of_the_table() {
        let table = parse_csv_table(
            b"Timestamp,Location,Energy_kWh\n\
              2024-06-10 10:00:00,Shed_01,100\n\
              2024-06-10 10:05:00,Shed_01,101\n\
              2024-06-10 10:10:00,Shed_\xB001,102\n\
              2024-06-10 10:15:00,Shed_01,103\n",
        )
        .unwrap();

        assert_eq!(table.rows.len(), 4);
        assert_eq!(table.rows[2][1], "Shed_\u{FFFD}01");
        assert_eq!(table.rows[2][2], "102");
        assert_eq!(table.rows[3][0], "2024-06-10 10:15:00");
    }

    #[test]
    fn empty_input_is_data_unavailable() {
        assert!(matches!(parse_csv_table(b""), Err(PipelineError::DataUnavailable(_))));
    }
}
