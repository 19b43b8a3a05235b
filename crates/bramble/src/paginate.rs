use serde_json::json;

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Pager<'a, T> {
    /// 1-based.
    pub page: usize,
    pub per_page: usize,
    pub total_items: usize,
    pub total_pages: usize,
    pub items: &'a [T],
    pub previous_page: Option<usize>,
    pub previous_page_path: Option<String>,
    pub next_page: Option<usize>,
    pub next_page_path: Option<String>,
}

impl<T> Pager<'_, T> {
    /// Template view; `item` projects each document on this page.
    pub fn to_value(&self, item: impl Fn(&T) -> serde_json::Value) -> serde_json::Value {
        json!({
            "page": self.page,
            "per_page": self.per_page,
            "total_items": self.total_items,
            "total_pages": self.total_pages,
            "items": self.items.iter().map(item).collect::<Vec<_>>(),
            "previous_page": self.previous_page,
            "previous_page_path": self.previous_page_path,
            "next_page": self.next_page,
            "next_page_path": self.next_page_path,
        })
    }
}

/// Site-relative URL of page `page`: `/` for the first page, `path_pattern`
/// with `:num` substituted for the rest.
pub fn page_url(page: usize, path_pattern: &str) -> String {
    if page <= 1 {
        return "/".to_string();
    }

    let path = path_pattern.replace(":num", &page.to_string());
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

fn page_link(page: usize, path_pattern: &str, base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), page_url(page, path_pattern))
}

/// Splits `items` into contiguous pages of `per_page`. Returns nothing when
/// `per_page` is zero or there are no items.
pub fn paginate<'a, T>(
    items: &'a [T],
    per_page: usize,
    path_pattern: &str,
    base_url: &str,
) -> Vec<Pager<'a, T>> {
    if per_page == 0 {
        return Vec::new();
    }

    let total_items = items.len();
    let total_pages = total_items.div_ceil(per_page);

    items
        .chunks(per_page)
        .enumerate()
        .map(|(index, chunk)| {
            let page = index + 1;
            let previous_page = (page > 1).then(|| page - 1);
            let next_page = (page < total_pages).then(|| page + 1);

            Pager {
                page,
                per_page,
                total_items,
                total_pages,
                items: chunk,
                previous_page,
                previous_page_path: previous_page
                    .map(|previous| page_link(previous, path_pattern, base_url)),
                next_page,
                next_page_path: next_page.map(|next| page_link(next, path_pattern, base_url)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twenty_five_items_by_ten() {
        let items: Vec<usize> = (0..25).collect();
        let pages = paginate(&items, 10, "/page:num/", "");

        let sizes: Vec<usize> = pages.iter().map(|page| page.items.len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(pages[0].previous_page_path, None);
        assert_eq!(pages[1].previous_page_path.as_deref(), Some("/"));
        assert_eq!(pages[0].next_page_path.as_deref(), Some("/page2/"));
        assert_eq!(pages[2].next_page, None);
        assert_eq!(pages[2].items, &items[20..25]);
        assert!(pages.iter().all(|page| page.total_pages == 3 && page.total_items == 25));
    }

    #[test]
    fn test_counts_are_preserved() {
        for total in [1, 9, 10, 11, 30, 31] {
            let items: Vec<usize> = (0..total).collect();
            let pages = paginate(&items, 10, "/page:num/", "");
            let sum: usize = pages.iter().map(|page| page.items.len()).sum();
            assert_eq!(sum, total);
            assert_eq!(pages.first().unwrap().previous_page, None);
            assert_eq!(pages.last().unwrap().next_page, None);
        }
    }

    #[test]
    fn test_disabled_or_empty() {
        let items = vec![1, 2, 3];
        assert!(paginate(&items, 0, "/page:num/", "").is_empty());
        assert!(paginate::<usize>(&[], 5, "/page:num/", "").is_empty());
    }

    #[test]
    fn test_base_url_prefix() {
        let items: Vec<usize> = (0..3).collect();
        let pages = paginate(&items, 1, "blog/page/:num", "/docs/");
        assert_eq!(pages[0].next_page_path.as_deref(), Some("/docs/blog/page/2"));
        assert_eq!(pages[1].previous_page_path.as_deref(), Some("/docs/"));
    }

    #[test]
    fn test_to_value() {
        let items = vec!["a", "b", "c"];
        let pages = paginate(&items, 2, "/page:num/", "");
        let value = pages[1].to_value(|item| json!(item));
        assert_eq!(value["page"], 2);
        assert_eq!(value["items"], json!(["c"]));
        assert_eq!(value["next_page_path"], serde_json::Value::Null);
    }
}
