use serde::{Deserialize, Serialize};

/// Pagination parameters, extractable from query params.
#[derive(Debug, Clone, Deserialize)]
pub struct Pageable {
    #[serde(default)]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub size: u64,
}

fn default_page_size() -> u64 {
    20
}

impl Default for Pageable {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

impl Pageable {
    /// Clamp the page size to a sane bound before touching the database.
    pub fn clamped(mut self, max_size: u64) -> Self {
        self.size = self.size.clamp(1, max_size);
        self
    }

    pub fn offset(&self) -> u64 {
        self.page * self.size
    }
}

/// A page of results with pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u64,
    pub size: u64,
    #[serde(rename = "totalElements")]
    pub total_elements: u64,
    #[serde(rename = "totalPages")]
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, pageable: &Pageable, total_elements: u64) -> Self {
        let total_pages = if pageable.size == 0 {
            0
        } else {
            total_elements.div_ceil(pageable.size)
        };
        Self {
            content,
            page: pageable.page,
            size: pageable.size,
            total_elements,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_and_total_pages() {
        let pageable = Pageable { page: 2, size: 20 };
        assert_eq!(pageable.offset(), 40);
        let page = Page::new(vec![1, 2, 3], &pageable, 41);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn clamp_bounds_size() {
        assert_eq!(Pageable { page: 0, size: 500 }.clamped(100).size, 100);
        assert_eq!(Pageable { page: 0, size: 0 }.clamped(100).size, 1);
    }
}
