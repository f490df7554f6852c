//! Listing drivers: flat pagination and the recursive deep walk
//!
//! A flat listing follows truncated pages until the service reports the end,
//! merging each page's objects and common prefixes into one lexicographic
//! sequence. The deep walk lists a level, then descends into every common
//! prefix concurrently and splices child results in place, so the final
//! sequence is depth-first with each directory entry immediately followed by
//! its contents.

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;

use crate::error::Result;
use crate::op::{Op, OpContext, OpOutput};
use crate::types::{Entry, ListPage};

/// Fetch one listing page.
async fn fetch_page(ctx: &OpContext, bucket: &str, prefix: &str, marker: Option<&str>) -> Result<ListPage> {
    let op = Op::list_page(bucket.to_string(), prefix, marker);
    match op.execute(ctx).await? {
        OpOutput::Page(page) => Ok(page),
        _ => unreachable!("list op yields a page"),
    }
}

/// Merge one page's objects and prefixes into `out` in key order.
///
/// Both inputs arrive sorted from the service, so this is a linear merge.
fn merge_page(out: &mut Vec<Entry>, page: ListPage) {
    let mut objects = page.objects.into_iter().peekable();
    let mut prefixes = page.prefixes.into_iter().peekable();
    loop {
        let take_object = match (objects.peek(), prefixes.peek()) {
            (Some(obj), Some(pre)) => obj.key.as_str() <= pre.as_str(),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        if take_object {
            out.push(objects.next().unwrap());
        } else {
            out.push(Entry::prefix(prefixes.next().unwrap()));
        }
    }
}

/// List one level under `prefix`, following truncation until complete.
pub(crate) async fn list_flat(ctx: &OpContext, bucket: &str, prefix: &str) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut marker: Option<String> = None;
    loop {
        let page = fetch_page(ctx, bucket, prefix, marker.as_deref()).await?;
        let truncated = page.is_truncated;
        let next = page.continuation_marker();
        merge_page(&mut entries, page);
        if !truncated {
            break;
        }
        match next {
            Some(next) => marker = Some(next),
            // Truncated page with nothing to resume from; treat as the end
            // rather than refetching the same page forever
            None => break,
        }
        tracing::trace!(bucket, prefix, marker = ?marker, "following truncated listing");
    }
    Ok(entries)
}

/// Recursively list everything under `prefix`.
///
/// Each level's common prefixes are descended concurrently; the first child
/// error wins and the remaining siblings are dropped. Owned arguments keep
/// the recursion `'static` for boxing.
pub(crate) fn list_deep(
    ctx: OpContext,
    bucket: String,
    prefix: String,
) -> BoxFuture<'static, Result<Vec<Entry>>> {
    async move {
        let level = list_flat(&ctx, &bucket, &prefix).await?;

        let children = level
            .iter()
            .filter(|e| e.is_prefix)
            .map(|e| list_deep(ctx.clone(), bucket.clone(), e.key.clone()));
        let mut child_results = try_join_all(children).await?.into_iter();

        let mut entries = Vec::with_capacity(level.len());
        for entry in level {
            let is_prefix = entry.is_prefix;
            entries.push(entry);
            if is_prefix {
                entries.extend(child_results.next().unwrap_or_default());
            }
        }
        Ok(entries)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Entry;

    fn obj(key: &str) -> Entry {
        Entry::object(key.to_string(), 1, None)
    }

    #[test]
    fn test_merge_page_interleaves_in_key_order() {
        let page = ListPage {
            objects: vec![obj("a.txt"), obj("m.txt"), obj("z.txt")],
            prefixes: vec!["b/".to_string(), "n/".to_string()],
            is_truncated: false,
            next_marker: None,
        };
        let mut out = Vec::new();
        merge_page(&mut out, page);
        let keys: Vec<&str> = out.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a.txt", "b/", "m.txt", "n/", "z.txt"]);
        assert!(out[1].is_prefix);
        assert!(!out[0].is_prefix);
    }

    #[test]
    fn test_merge_page_objects_only() {
        let page = ListPage {
            objects: vec![obj("a"), obj("b")],
            prefixes: vec![],
            is_truncated: false,
            next_marker: None,
        };
        let mut out = Vec::new();
        merge_page(&mut out, page);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_merge_page_appends_across_pages() {
        let mut out = Vec::new();
        merge_page(
            &mut out,
            ListPage {
                objects: vec![obj("a")],
                prefixes: vec!["b/".to_string()],
                is_truncated: true,
                next_marker: Some("b/".to_string()),
            },
        );
        merge_page(
            &mut out,
            ListPage {
                objects: vec![obj("c")],
                prefixes: vec![],
                is_truncated: false,
                next_marker: None,
            },
        );
        let keys: Vec<&str> = out.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b/", "c"]);
    }
}
