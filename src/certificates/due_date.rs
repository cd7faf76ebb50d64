//! Assignment due dates: two business days before the live session.

use chrono::{DateTime, Datelike, Days, NaiveDate, Weekday};
use crm_sink::{list_all, CrmApi, CrmError, RecordResult, UpdateInput};
use serde_json::Value;
use sync_core::{midnight_millis, to_unix_millis, PropertyMap};

use super::{send_updates, UpdateCount};

pub const LIVE_SESSION_PROPERTY: &str = "live_session_datetime";
pub const DUE_DATE_PROPERTY: &str = "assignment_due_date";

/// Business days between the due date and the live session.
const LEAD_BUSINESS_DAYS: u32 = 2;

/// Step back `days` weekdays from `date`. Weekends are never landed on.
pub fn subtract_business_days(date: NaiveDate, days: u32) -> NaiveDate {
    let mut current = date;
    let mut remaining = days;
    while remaining > 0 {
        current = current.checked_sub_days(Days::new(1)).unwrap_or(current);
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    current
}

/// Due date for a live session on `live`, or `None` once the session is
/// today or past.
pub fn assignment_due_date(live: NaiveDate, today: NaiveDate) -> Option<NaiveDate> {
    (today < live).then(|| subtract_business_days(live, LEAD_BUSINESS_DAYS))
}

/// The UTC calendar date of a record's live session, when it has one and
/// still lacks a due date.
fn pending_live_date(record: &RecordResult) -> Option<NaiveDate> {
    if record.property_str(DUE_DATE_PROPERTY).is_some() {
        return None;
    }
    let raw = record.property_str(LIVE_SESSION_PROPERTY)?;
    match to_unix_millis(raw) {
        Ok(Some(ms)) => DateTime::from_timestamp_millis(ms).map(|dt| dt.date_naive()),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(record = %record.id, error = %e, "Skipping unreadable live session date");
            None
        }
    }
}

/// Set missing due dates on every instance record with an upcoming live
/// session.
pub async fn update_due_dates<A: CrmApi + ?Sized>(
    crm: &A,
    object_type: &str,
    today: NaiveDate,
    batch_size: usize,
    dry_run: bool,
) -> Result<UpdateCount, CrmError> {
    let properties = [LIVE_SESSION_PROPERTY.to_string(), DUE_DATE_PROPERTY.to_string()];
    let records = list_all(crm, object_type, &properties).await?;
    tracing::info!("Checking {} records for missing due dates", records.len());

    let inputs: Vec<UpdateInput> = records
        .iter()
        .filter_map(|record| {
            let due = assignment_due_date(pending_live_date(record)?, today)?;
            let mut properties = PropertyMap::new();
            properties.insert(
                DUE_DATE_PROPERTY.to_string(),
                Value::from(midnight_millis(due)),
            );
            Some(UpdateInput {
                id: record.id.clone(),
                properties,
            })
        })
        .collect();

    if dry_run {
        tracing::info!("Dry run: would set {} due dates", inputs.len());
        return Ok(UpdateCount::default());
    }
    Ok(send_updates(crm, object_type, inputs, batch_size).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_core::RemoteId;

    use crate::testing::InMemoryCrm;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_business_days_skip_weekends() {
        // Monday -> Thursday
        assert_eq!(subtract_business_days(date(2024, 3, 4), 2), date(2024, 2, 29));
        // Saturday -> Thursday
        assert_eq!(subtract_business_days(date(2024, 3, 9), 2), date(2024, 3, 7));
        // Wednesday -> Monday
        assert_eq!(subtract_business_days(date(2024, 3, 6), 2), date(2024, 3, 4));
        assert_eq!(subtract_business_days(date(2024, 3, 6), 0), date(2024, 3, 6));
    }

    #[test]
    fn test_no_due_date_once_session_is_today_or_past() {
        let live = date(2024, 3, 4);
        assert_eq!(assignment_due_date(live, date(2024, 3, 1)), Some(date(2024, 2, 29)));
        assert_eq!(assignment_due_date(live, live), None);
        assert_eq!(assignment_due_date(live, date(2024, 3, 5)), None);
    }

    #[tokio::test]
    async fn test_only_upcoming_sessions_without_due_date_are_updated() {
        let crm = InMemoryCrm::new();
        let upcoming = crm.insert_record(
            "instances",
            json!({"live_session_datetime": "2024-03-04T22:30:00Z"}),
        );
        let already_set = crm.insert_record(
            "instances",
            json!({
                "live_session_datetime": "2024-03-04T22:30:00Z",
                "assignment_due_date": "1709164800000"
            }),
        );
        let past = crm.insert_record("instances", json!({"live_session_datetime": "1704067200000"}));
        crm.insert_record("instances", json!({"course_name": "No session"}));

        let count = update_due_dates(&crm, "instances", date(2024, 3, 1), 100, false)
            .await
            .unwrap();

        assert_eq!(count.updated, 1);
        let due = |id: &RemoteId| {
            crm.record("instances", id)
                .and_then(|r| r.property_str(DUE_DATE_PROPERTY).map(str::to_string))
        };
        // 2024-02-29T00:00:00Z
        assert_eq!(due(&upcoming), Some("1709164800000".to_string()));
        assert_eq!(due(&already_set), Some("1709164800000".to_string()));
        assert_eq!(due(&past), None);
    }
}
