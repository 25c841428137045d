use serde::Serialize;

use crate::error::AppError;

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub count: usize,
    pub num_pages: usize,
    pub current_page: usize,
    pub next: bool,
    pub previous: bool,
}

/// Slices `items` into the requested 1-based page. An empty list still has
/// one (empty) page; any other out-of-range page is an error.
pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Result<Page<T>, AppError> {
    let page_size = page_size.max(1);
    let count = items.len();
    let num_pages = count.div_ceil(page_size).max(1);
    if page < 1 {
        return Err(AppError::InvalidPage("That page number is less than 1"));
    }
    if page > num_pages {
        return Err(AppError::InvalidPage("That page contains no results"));
    }
    let results = items
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();
    Ok(Page {
        results,
        count,
        num_pages,
        current_page: page,
        next: page < num_pages,
        previous: page > 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_pages() {
        let items = (1..=23).collect::<Vec<_>>();
        let page = paginate(items, 3, 10).unwrap();
        assert_eq!(page.results, vec![21, 22, 23]);
        assert_eq!(page.count, 23);
        assert_eq!(page.num_pages, 3);
        assert!(!page.next);
        assert!(page.previous);
    }

    #[test]
    fn empty_list_has_one_page() {
        let page = paginate(Vec::<i32>::new(), 1, DEFAULT_PAGE_SIZE).unwrap();
        assert!(page.results.is_empty());
        assert_eq!(page.num_pages, 1);
        assert!(!page.next);
        assert!(!page.previous);
    }

    #[test]
    fn out_of_range_pages_are_rejected() {
        assert!(paginate(vec![1, 2], 0, 10).is_err());
        assert!(paginate(vec![1, 2], 2, 10).is_err());
    }
}
