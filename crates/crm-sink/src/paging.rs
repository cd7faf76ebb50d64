//! Follow `paging.next.after` cursors to the last page.

use crate::client::CrmApi;
use crate::error::CrmError;
use crate::types::{RecordResult, SearchRequest};

/// All records matching `request`, across pages.
pub async fn search_all<A: CrmApi + ?Sized>(
    api: &A,
    object_type: &str,
    request: &SearchRequest,
) -> Result<Vec<RecordResult>, CrmError> {
    let mut request = request.clone();
    let mut records = Vec::new();
    loop {
        let page = api.search(object_type, &request).await?;
        let next = page.next_after().map(str::to_string);
        records.extend(page.results);
        match next {
            Some(after) => request.after = Some(after),
            None => return Ok(records),
        }
    }
}

/// Every record of `object_type` with the given properties.
pub async fn list_all<A: CrmApi + ?Sized>(
    api: &A,
    object_type: &str,
    properties: &[String],
) -> Result<Vec<RecordResult>, CrmError> {
    let mut records = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let page = api
            .list_page(object_type, properties, after.as_deref())
            .await?;
        let next = page.next_after().map(str::to_string);
        records.extend(page.results);
        match next {
            Some(cursor) => after = Some(cursor),
            None => return Ok(records),
        }
    }
}
