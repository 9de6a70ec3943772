use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// `?page=&limit=` query parameters. Missing or zero values fall back to defaults.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// A resolved page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub fn offset(&self) -> u64 {
        u64::from(self.number - 1) * u64::from(self.size)
    }

    /// Slices an in-memory collection down to this page.
    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let start = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        items
            .iter()
            .skip(start)
            .take(self.size as usize)
            .cloned()
            .collect()
    }

    pub fn info(&self, total_items: u64) -> PageInfo {
        PageInfo {
            total_pages: total_items.div_ceil(u64::from(self.size)),
            current_page: self.number,
            total_items,
            page_size: self.size,
        }
    }
}

impl From<PageQuery> for Page {
    fn from(query: PageQuery) -> Self {
        let number = query.page.filter(|p| *p > 0).unwrap_or(1);
        let size = query
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);
        Self { number, size }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total_pages: u64,
    pub current_page: u32,
    pub total_items: u64,
    pub page_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_clamping() {
        let page = Page::from(PageQuery::default());
        assert_eq!(page, Page { number: 1, size: 20 });

        let page = Page::from(PageQuery {
            page: Some(0),
            limit: Some(5_000),
        });
        assert_eq!(page, Page { number: 1, size: MAX_PAGE_SIZE });
    }

    #[test]
    fn test_slice_and_info() {
        let items: Vec<u32> = (1..=45).collect();
        let page = Page { number: 3, size: 20 };

        assert_eq!(page.slice(&items), vec![41, 42, 43, 44, 45]);
        let info = page.info(items.len() as u64);
        assert_eq!(info.total_pages, 3);
        assert_eq!(info.current_page, 3);
        assert_eq!(info.total_items, 45);
    }

    #[test]
    fn test_past_the_end_is_empty() {
        let items = vec![1, 2, 3];
        let page = Page { number: 9, size: 2 };
        assert!(page.slice(&items).is_empty());
        assert_eq!(page.info(0).total_pages, 0);
    }
}
