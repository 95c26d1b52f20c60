//! CSV export for completed ticks.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::runner::TickRecord;

/// Column header for CSV tick export.
const HEADER: &str = "timestamp,generation_w,house_w,surplus_start_w,surplus_end_w,\
                      diverter_w,commands,failed_commands,soc_pct";

/// Exports tick records to a CSV file at the given path.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(records: &[TickRecord], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(records, buf)
}

/// Writes tick records as CSV to any writer.
///
/// Optional columns are left empty when the value is unknown.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(records: &[TickRecord], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(HEADER.split(',').map(str::trim))?;

    let optional = |v: Option<f64>| v.map(|v| format!("{v:.1}")).unwrap_or_default();
    for r in records {
        wtr.write_record(&[
            r.timestamp.to_rfc3339(),
            format!("{:.1}", r.generation_watts),
            format!("{:.1}", r.house_watts),
            format!("{:.1}", r.surplus_start_watts),
            format!("{:.1}", r.surplus_end_watts),
            optional(r.diverter_watts),
            r.commands.to_string(),
            r.failed_commands.to_string(),
            optional(r.soc_pct),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
