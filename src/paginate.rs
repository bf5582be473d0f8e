use std::future::Future;

/// What a single page fetch produced.
pub enum PageOutcome<T> {
    /// A page of normalized items, plus the raw upstream item count before
    /// normalization (exhaustion is judged on the raw count, since the
    /// normalizer may drop items from a full page).
    Page(Vec<T>, usize),
    /// The page was lost after the adapter's own retries; skip it and keep
    /// walking.
    Dropped,
    /// The adapter's policy is to stop the whole walk on this failure and
    /// return what was accumulated.
    Abort,
}

/// Consecutive lost pages tolerated before a walk gives up. Without a bound
/// a feed whose every page fails would keep the walk alive forever, since a
/// dropped page produces no exhaustion signal.
const MAX_CONSECUTIVE_DROPS: usize = 3;

/// Walk a paginated feed until `max_results` items are accumulated, the
/// feed is exhausted (a page shorter than `full_page`), or too many pages
/// in a row are lost.
///
/// `fetch` is called with the current item offset. Results keep upstream
/// order, concatenated page by page; the return value is truncated to
/// exactly `max_results`.
pub async fn walk<T, F, Fut>(full_page: usize, max_results: usize, mut fetch: F) -> Vec<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = PageOutcome<T>>,
{
    let mut results: Vec<T> = Vec::new();
    let mut cursor = 0usize;
    let mut consecutive_drops = 0usize;
    while results.len() < max_results {
        match fetch(cursor).await {
            PageOutcome::Page(items, fetched) => {
                consecutive_drops = 0;
                results.extend(items);
                if results.len() >= max_results {
                    break;
                }
                if fetched < full_page {
                    break;
                }
                cursor += full_page;
            }
            PageOutcome::Dropped => {
                consecutive_drops += 1;
                if consecutive_drops >= MAX_CONSECUTIVE_DROPS {
                    break;
                }
                cursor += full_page;
            }
            PageOutcome::Abort => break,
        }
    }
    results.truncate(max_results);
    results
}
