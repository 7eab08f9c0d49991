//! Common API types

use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

mod string_or_number {
    use serde::{de, Deserialize, Deserializer};

    pub fn deserialize_u32_opt<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum StringOrNum {
            Num(u32),
            Str(String),
        }

        match Option::<StringOrNum>::deserialize(deserializer)? {
            Some(StringOrNum::Num(n)) => Ok(Some(n)),
            Some(StringOrNum::Str(s)) => s.parse().map(Some).map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Zero-based page and page size. `limit` is accepted for `size`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParams {
    #[serde(default, deserialize_with = "string_or_number::deserialize_u32_opt")]
    page: Option<u32>,
    #[serde(default, alias = "limit", deserialize_with = "string_or_number::deserialize_u32_opt")]
    size: Option<u32>,
}

impl PaginationParams {
    pub fn new(page: u32, size: u32) -> Self {
        Self { page: Some(page), size: Some(size) }
    }

    pub fn page(&self) -> u32 {
        self.page.unwrap_or(0)
    }

    /// Clamped to 1..=100
    pub fn size(&self) -> u32 {
        self.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        self.page() as u64 * self.size() as u64
    }

    pub fn limit(&self) -> u64 {
        self.size() as u64
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, params: &PaginationParams, total: u64) -> Self {
        let size = params.size();
        Self {
            data,
            page: params.page(),
            size,
            total,
            total_pages: total.div_ceil(size as u64) as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_clamping() {
        let params = PaginationParams::default();
        assert_eq!((params.page(), params.size(), params.offset()), (0, 20, 0));

        let params = PaginationParams::new(3, 500);
        assert_eq!(params.size(), 100);
        assert_eq!(params.offset(), 300);

        assert_eq!(PaginationParams::new(0, 0).size(), 1);
    }

    #[test]
    fn test_string_numbers_accepted() {
        let params: PaginationParams = serde_json::from_str(r#"{"page": "2", "limit": 5}"#).unwrap();
        assert_eq!((params.page(), params.size()), (2, 5));
    }

    #[test]
    fn test_total_pages() {
        let response = PaginatedResponse::new(vec![1, 2], &PaginationParams::new(0, 2), 5);
        assert_eq!(response.total_pages, 3);
        let response = PaginatedResponse::<u8>::new(vec![], &PaginationParams::new(0, 2), 0);
        assert_eq!(response.total_pages, 0);
    }
}
