//! Frequency table loading.
//!
//! The front end's frequency selector is fed from a small CSV table: one row
//! per option with a numeric `Frequency` column, an optional `Name` column,
//! and any number of flag columns. A non-empty marker in any flag column
//! makes the row selectable. Malformed rows are the loader's concern and are
//! skipped here; the engine only ever sees well-formed options.

use crate::error::StimResult;
use std::collections::HashSet;
use std::path::Path;

/// One selectable entry of the frequency table.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyOption {
    /// Output frequency, Hz (always positive)
    pub frequency: f64,
    /// Display name shown in the selector
    pub name: String,
    /// Whether the front end offers this row
    pub selectable: bool,
}

/// The loaded, deduplicated, order-preserving frequency list.
#[derive(Debug, Clone, Default)]
pub struct FrequencyTable {
    options: Vec<FrequencyOption>,
}

impl FrequencyTable {
    /// Load a table from a CSV file.
    ///
    /// Rows with a missing, unparseable, or non-positive frequency are
    /// skipped. Duplicate frequencies keep the first occurrence; file order
    /// is preserved otherwise.
    pub fn load<P: AsRef<Path>>(path: P) -> StimResult<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let headers = reader.headers()?.clone();

        let freq_col = find_column(&headers, "frequency");
        let name_col = find_column(&headers, "name");

        let mut options = Vec::new();
        let mut seen = HashSet::new();

        for record in reader.records() {
            let Ok(record) = record else {
                continue;
            };
            let Some(frequency) = freq_col
                .and_then(|col| record.get(col))
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .filter(|f| f.is_finite() && *f > 0.0)
            else {
                continue;
            };
            if !seen.insert(frequency.to_bits()) {
                continue;
            }

            let name = name_col
                .and_then(|col| record.get(col))
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{frequency} Hz"));

            // Every column that is neither Frequency nor Name is a flag column.
            let selectable = record.iter().enumerate().any(|(col, value)| {
                Some(col) != freq_col && Some(col) != name_col && !value.trim().is_empty()
            });

            options.push(FrequencyOption {
                frequency,
                name,
                selectable,
            });
        }

        Ok(Self { options })
    }

    /// All loaded options in file order.
    pub fn options(&self) -> &[FrequencyOption] {
        &self.options
    }

    /// Only the rows the front end should offer.
    pub fn selectable(&self) -> impl Iterator<Item = &FrequencyOption> {
        self.options.iter().filter(|o| o.selectable)
    }

    /// Number of loaded options.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

fn find_column(headers: &csv::StringRecord, wanted: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(wanted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn table_from(content: &str) -> FrequencyTable {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        FrequencyTable::load(file.path()).unwrap()
    }

    #[test]
    fn loads_rows_in_order_with_flags() {
        let table = table_from(
            "Frequency,Name,Available,Enabled\n\
             50,50 Hz,X,\n\
             60,60 Hz,X,X\n\
             100,100 Hz,,\n\
             1000,1 kHz,,X\n",
        );
        assert_eq!(table.len(), 4);
        assert_eq!(table.options()[0].frequency, 50.0);
        assert_eq!(table.options()[3].name, "1 kHz");
        let selectable: Vec<f64> = table.selectable().map(|o| o.frequency).collect();
        assert_eq!(selectable, vec![50.0, 60.0, 1000.0]);
    }

    #[test]
    fn skips_malformed_and_non_positive_rows() {
        let table = table_from(
            "Frequency,Name,Available\n\
             not-a-number,bad,X\n\
             -5,negative,X\n\
             0,zero,X\n\
             250,good,X\n",
        );
        assert_eq!(table.len(), 1);
        assert_eq!(table.options()[0].frequency, 250.0);
    }

    #[test]
    fn duplicate_frequencies_keep_the_first_row() {
        let table = table_from(
            "Frequency,Name,Available\n\
             440,first,X\n\
             440,second,\n\
             880,octave,X\n",
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.options()[0].name, "first");
        assert!(table.options()[0].selectable);
    }

    #[test]
    fn missing_name_gets_a_default() {
        let table = table_from("Frequency,Available\n8192,X\n");
        assert_eq!(table.options()[0].name, "8192 Hz");
        assert!(table.options()[0].selectable);
    }
}
