//! Bulk queued-ticket creation from a student spreadsheet.

use std::io::Read;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::batch::{fan_out, BatchReport, Outcome};
use super::reconcile;
use crate::models::{CustomFields, ModelError, QueuedTicket, ScanLimit};
use crate::store::Store;

#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("row has no column {0}")]
    MissingColumn(usize),

    #[error("name '{0}' is not in 'Last, First' form")]
    MalformedName(String),

    #[error("student number is empty")]
    EmptyStudentNumber,

    #[error("column {column} is beyond the {width} columns of the header")]
    ColumnOutOfRange { column: usize, width: usize },
}

/// Zero-based column positions of the imported fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMapping {
    pub name: usize,
    pub student_number: usize,
    pub max_scan_count: Option<usize>,
}

impl ColumnMapping {
    /// Checks every mapped column against the header width.
    pub fn check_width(&self, width: usize) -> Result<(), RowError> {
        match [Some(self.name), Some(self.student_number), self.max_scan_count]
            .into_iter()
            .flatten()
            .find(|&index| index >= width)
        {
            Some(index) => Err(RowError::ColumnOutOfRange {
                column: index + 1,
                width,
            }),
            None => Ok(()),
        }
    }
}

/// One spreadsheet row, ready to become a queued ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    pub full_name: String,
    pub student_number: String,
    pub max_scan_count: ScanLimit,
}

impl ImportRow {
    pub fn into_queued_ticket(self, event_id: Uuid) -> QueuedTicket {
        QueuedTicket::new(self.student_number, event_id, self.max_scan_count, CustomFields::new())
            .with_full_name_update(self.full_name)
    }
}

/// Turns "Last, First" into "First Last".
pub fn normalize_name(raw: &str) -> Result<String, RowError> {
    let parts: Vec<&str> = raw.split(", ").collect();
    match parts.as_slice() {
        [last, first] if !last.trim().is_empty() && !first.trim().is_empty() => {
            Ok(format!("{} {}", first.trim(), last.trim()))
        }
        _ => Err(RowError::MalformedName(raw.to_string())),
    }
}

/// Parses a record; an unreadable per-row scan limit falls back to `default_max`.
pub fn parse_record(
    record: &csv::StringRecord,
    mapping: &ColumnMapping,
    default_max: ScanLimit,
) -> Result<ImportRow, RowError> {
    let column = |index: usize| record.get(index).ok_or(RowError::MissingColumn(index + 1));

    let full_name = normalize_name(column(mapping.name)?)?;
    let student_number = column(mapping.student_number)?.trim().to_string();
    if student_number.is_empty() {
        return Err(RowError::EmptyStudentNumber);
    }

    let max_scan_count = match mapping.max_scan_count {
        None => default_max,
        Some(index) => {
            let raw = column(index)?.trim();
            match raw.parse::<u32>() {
                Ok(count) => ScanLimit::from(count),
                Err(e) => {
                    warn!(
                        error = %e,
                        raw_max_scan_count = %raw,
                        "Could not parse row max scan count, using default"
                    );
                    default_max
                }
            }
        }
    };

    Ok(ImportRow {
        full_name,
        student_number,
        max_scan_count,
    })
}

/// Queues one row's ticket and tries to convert it right away.
pub async fn import_row(store: &dyn Store, event_id: Uuid, row: ImportRow) -> Outcome {
    let mut queued = row.into_queued_ticket(event_id);
    match store.create_queued_ticket(&queued).await {
        Ok(id) => queued.id = id,
        Err(ModelError::AlreadyExists) => {
            info!(
                student_number = %queued.student_number,
                "Ticket already issued or queued, skipping row"
            );
            return Outcome::Skipped;
        }
        Err(e) => {
            error!(
                error = %e,
                student_number = %queued.student_number,
                "Could not create queued ticket"
            );
            return Outcome::Failed;
        }
    }

    match reconcile::convert(store, &queued, true).await {
        Ok(ticket) => {
            info!(ticket_id = %ticket.id, owner_uid = %ticket.owner, "Created ticket from row");
            Outcome::Successful
        }
        Err(ModelError::NotFound) => {
            info!(
                student_number = %queued.student_number,
                "Student has not registered yet, keeping queued ticket"
            );
            Outcome::Delayed
        }
        Err(ModelError::AlreadyExists) => Outcome::Skipped,
        Err(e) => {
            error!(error = %e, queued_ticket_id = %queued.id, "Could not convert queued ticket");
            Outcome::Failed
        }
    }
}

/// Imports every data row after the header.
///
/// Rows that cannot be read or parsed are counted as failed without
/// stopping the run.
pub async fn import_csv<R: Read>(
    store: Arc<dyn Store>,
    event_id: Uuid,
    mut reader: csv::Reader<R>,
    mapping: ColumnMapping,
    default_max: ScanLimit,
    concurrency: usize,
) -> BatchReport {
    let mut rows = Vec::new();
    let mut unreadable = 0u64;
    for (line, record) in reader.records().enumerate() {
        let parsed = record.map_err(|e| e.to_string()).and_then(|record| {
            parse_record(&record, &mapping, default_max).map_err(|e| e.to_string())
        });
        match parsed {
            Ok(row) => rows.push(row),
            Err(e) => {
                // +2: one for the header, one for 1-based numbering
                error!(error = %e, line = line + 2, "Could not read row");
                unreadable += 1;
            }
        }
    }

    fan_out(rows, concurrency, move |row| {
        let store = store.clone();
        async move { import_row(store.as_ref(), event_id, row).await }
    })
    .await
    .with_extra_failures(unreadable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TicketFilter;
    use crate::services::cleanup::sweep_queued_tickets;
    use crate::store::MemoryStore;
    use crate::test_support::{sample_event, sample_user};

    fn mapping() -> ColumnMapping {
        ColumnMapping {
            name: 0,
            student_number: 1,
            max_scan_count: Some(2),
        }
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Lovelace, Ada").unwrap(), "Ada Lovelace");
        assert!(matches!(normalize_name("Ada Lovelace"), Err(RowError::MalformedName(_))));
        assert!(matches!(normalize_name("A, B, C"), Err(RowError::MalformedName(_))));
    }

    #[test]
    fn test_unparseable_row_limit_uses_default() {
        let record = csv::StringRecord::from(vec!["Hopper, Grace", "100200", "lots"]);
        let row = parse_record(&record, &mapping(), ScanLimit::from(2)).unwrap();
        assert_eq!(row.max_scan_count, ScanLimit::from(2));
        assert_eq!(row.full_name, "Grace Hopper");

        let record = csv::StringRecord::from(vec!["Hopper, Grace", "100200", "0"]);
        let row = parse_record(&record, &mapping(), ScanLimit::from(2)).unwrap();
        assert_eq!(row.max_scan_count, ScanLimit::Unlimited);
    }

    #[test]
    fn test_short_row_is_rejected() {
        let record = csv::StringRecord::from(vec!["Hopper, Grace"]);
        assert_eq!(
            parse_record(&record, &mapping(), ScanLimit::Unlimited),
            Err(RowError::MissingColumn(2))
        );
    }

    #[test]
    fn test_mapping_checked_against_header_width() {
        assert_eq!(mapping().check_width(3), Ok(()));
        assert_eq!(
            mapping().check_width(2),
            Err(RowError::ColumnOutOfRange {
                column: 3,
                width: 2
            })
        );

        let without_limit = ColumnMapping {
            max_scan_count: None,
            ..mapping()
        };
        assert_eq!(without_limit.check_width(2), Ok(()));

        let mut reader = csv::Reader::from_reader("Name,Number\n".as_bytes());
        let width = reader.headers().unwrap().len();
        assert!(mapping().check_width(width).is_err());
    }

    #[tokio::test]
    async fn test_import_then_sweep_before_registration() {
        let store = MemoryStore::new();
        let event = sample_event();
        store.create_event(&event).await.unwrap();

        let mut csv_text = String::from("Name,Student Number,Max Scans\n");
        for n in 0..100 {
            let student_number = format!("{}", 500000 + n);
            if n < 60 {
                store
                    .create_user(&sample_user(&format!("uid-{n}"), &student_number))
                    .await
                    .unwrap();
            }
            csv_text.push_str(&format!("\"Student, Number{n}\",{student_number},1\n"));
        }

        let store: Arc<dyn Store> = Arc::new(store);
        let reader = csv::Reader::from_reader(csv_text.as_bytes());
        let report = import_csv(
            store.clone(),
            event.id,
            reader,
            mapping(),
            ScanLimit::Unlimited,
            8,
        )
        .await;

        assert_eq!(report.successful, 60);
        assert_eq!(report.delayed, 40);
        assert_eq!(report.failed, 0);
        assert_eq!(store.count_tickets(&TicketFilter::by_event(event.id)).await.unwrap(), 60);
        assert_eq!(store.list_queued_tickets().await.unwrap().len(), 40);

        let sweep = sweep_queued_tickets(store.clone(), 8).await.unwrap();
        assert_eq!(sweep.delayed, 40);
        assert_eq!(sweep.successful, 0);
        assert_eq!(sweep.failed, 0);
    }

    #[tokio::test]
    async fn test_reimport_skips_existing_rows() {
        let store = MemoryStore::new();
        let event = sample_event();
        store.create_event(&event).await.unwrap();
        store.create_user(&sample_user("uid-1", "111111")).await.unwrap();

        let store: Arc<dyn Store> = Arc::new(store);
        let csv_text = "Name,Number,Max\n\
                        \"Doe, Jane\",111111,1\n\
                        \"Roe, Rick\",222222,1\n\
                        Broken,333333,1\n";
        let first = import_csv(
            store.clone(),
            event.id,
            csv::Reader::from_reader(csv_text.as_bytes()),
            mapping(),
            ScanLimit::Unlimited,
            2,
        )
        .await;
        assert_eq!((first.successful, first.delayed, first.failed), (1, 1, 1));

        let second = import_csv(
            store.clone(),
            event.id,
            csv::Reader::from_reader(csv_text.as_bytes()),
            mapping(),
            ScanLimit::Unlimited,
            2,
        )
        .await;
        assert_eq!((second.successful, second.skipped, second.failed), (0, 2, 1));
        assert_eq!(store.count_tickets(&TicketFilter::all()).await.unwrap(), 1);
    }
}
