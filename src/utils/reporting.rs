use std::io;
use std::path::Path;

use csv::Writer;
use log::info;

use crate::import::outcome::{BatchResult, ImportOutcome};
use crate::Result;

pub const REPORT_HEADER: [&str; 7] = ["Ticket", "Path", "Status", "Stage", "Identity", "Action", "Detail"];

pub struct Reporter;

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_batch_report(&self, batch: &BatchResult, output_path: impl AsRef<Path>) -> Result<()> {
        let output_path_ref = output_path.as_ref();
        let writer = Writer::from_path(output_path_ref)?;
        self.write_batch(batch, writer)?;
        info!("Report generated: {}", output_path_ref.display());
        Ok(())
    }

    /// Writes one row per ticket, in ticket order.
    pub fn write_batch<W: io::Write>(&self, batch: &BatchResult, mut writer: Writer<W>) -> Result<()> {
        writer.write_record(REPORT_HEADER)?;

        for report in &batch.reports {
            let ticket = report.ticket.id.to_string();
            let path = report.ticket.path.display().to_string();
            let row = match &report.result {
                Ok(ImportOutcome::Committed(c)) => [
                    ticket,
                    path,
                    "committed".to_string(),
                    "committed".to_string(),
                    c.identity_id.to_string(),
                    format!("{} ({})", c.action.as_str(), c.verdict.label()),
                    if c.warnings.is_empty() {
                        String::new()
                    } else {
                        format!("{} warning(s)", c.warnings.len())
                    },
                ],
                Ok(ImportOutcome::Rejected { reason, .. }) => [
                    ticket,
                    path,
                    "rejected".to_string(),
                    "started".to_string(),
                    String::new(),
                    String::new(),
                    reason.clone(),
                ],
                Err(failure) => [
                    ticket,
                    path,
                    "failed".to_string(),
                    failure.stage.to_string(),
                    String::new(),
                    String::new(),
                    failure.error.to_string(),
                ],
            };
            writer.write_record(&row)?;
        }

        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::{CatalogTicket, TicketId};
    use crate::import::outcome::{ImportFailure, TicketReport};
    use crate::{CatalogError, Stage};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn ticket(id: i64, path: &str) -> CatalogTicket {
        CatalogTicket { id: TicketId(id), path: PathBuf::from(path), requested_at: Utc::now(), resolved_at: None }
    }

    #[test]
    fn batch_report_lists_every_ticket() {
        let batch = BatchResult {
            reports: vec![
                TicketReport {
                    ticket: ticket(1, "/music/empty.wav"),
                    result: Ok(ImportOutcome::Rejected {
                        path: PathBuf::from("/music/empty.wav"),
                        reason: "file is empty".into(),
                    }),
                },
                TicketReport {
                    ticket: ticket(2, "/music/gone.flac"),
                    result: Err(ImportFailure {
                        path: PathBuf::from("/music/gone.flac"),
                        stage: Stage::Started,
                        error: CatalogError::Cancelled,
                    }),
                },
            ],
        };

        let mut buf = Vec::new();
        Reporter::new().write_batch(&batch, Writer::from_writer(&mut buf)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], "Ticket,Path,Status,Stage,Identity,Action,Detail");
        assert_eq!(lines[1], "ticket-1,/music/empty.wav,rejected,started,,,file is empty");
        assert_eq!(lines[2], "ticket-2,/music/gone.flac,failed,started,,,Import cancelled");
    }
}
