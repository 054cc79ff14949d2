use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::github::client::ensure_success;

/// Walks a list endpoint through its `Link: <...>; rel="next"` chain.
#[derive(Clone, Copy)]
pub struct Paginator<'a> {
    client: &'a Client,
}

impl<'a> Paginator<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// Collects at most `max_items`, requesting no larger pages than needed.
    pub async fn fetch_limited<T: DeserializeOwned>(
        self,
        base_url: &str,
        max_items: u32,
    ) -> Result<Vec<T>> {
        self.fetch_filtered(base_url, max_items, |_| true).await
    }

    /// Like `fetch_limited`, but only items passing `keep` count toward
    /// `max_items`, so mixed endpoints still fill the request.
    pub async fn fetch_filtered<T, F>(
        self,
        base_url: &str,
        max_items: u32,
        keep: F,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let wanted = max_items as usize;
        let per_page = max_items.clamp(1, 100);
        let separator = if base_url.contains('?') { '&' } else { '?' };
        let mut next = Some(format!("{}{}per_page={}", base_url, separator, per_page));
        let mut items: Vec<T> = Vec::new();
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages == MAX_PAGES {
                tracing::debug!("Stopping after {} pages with {} items", pages, items.len());
                break;
            }
            pages += 1;
            tracing::debug!("Fetching page: {}", url);
            let response = ensure_success(self.client.get(&url).send().await?).await?;
            next = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_link);

            let page: Vec<T> = response.json().await?;
            if page.is_empty() || absorb(&mut items, page, &keep, wanted) {
                break;
            }
        }

        Ok(items)
    }
}

const MAX_PAGES: usize = 10;

/// Appends the kept items of `page`; true once `wanted` is reached.
fn absorb<T>(items: &mut Vec<T>, page: Vec<T>, keep: impl Fn(&T) -> bool, wanted: usize) -> bool {
    for item in page.into_iter().filter(|item| keep(item)) {
        if items.len() == wanted {
            break;
        }
        items.push(item);
    }
    items.len() >= wanted
}

/// Target of the `rel="next"` entry in a Link header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == "rel=\"next\"")
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filtered_items_do_not_count_toward_limit() {
        let mut kept = Vec::new();
        // Odd numbers stand in for pull requests on the issues endpoint.
        let is_even = |n: &u32| n % 2 == 0;
        assert!(!absorb(&mut kept, vec![1, 2, 3, 4], is_even, 3));
        assert_eq!(kept, vec![2, 4]);
        assert!(absorb(&mut kept, vec![5, 6, 8, 10], is_even, 3));
        assert_eq!(kept, vec![2, 4, 6]);
    }

    #[test]
    fn test_next_link_is_found_among_relations() {
        let header = r#"<https://api.github.com/repositories/1/issues?page=2>; rel="next", <https://api.github.com/repositories/1/issues?page=9>; rel="last""#;
        assert_eq!(
            next_link(header).as_deref(),
            Some("https://api.github.com/repositories/1/issues?page=2")
        );
    }

    #[test]
    fn test_last_page_has_no_next() {
        let header = r#"<https://api.github.com/x?page=1>; rel="prev", <https://api.github.com/x?page=1>; rel="first""#;
        assert_eq!(next_link(header), None);
    }
}
