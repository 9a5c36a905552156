use serde::{Deserialize, Serialize};

/// Skip/take window for paged reads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingParams {
    pub skip: Option<u64>,
    pub take: Option<u64>,
    /// Also count every matching row.
    #[serde(default)]
    pub total: bool,
}

impl PagingParams {
    pub fn new(skip: Option<u64>, take: Option<u64>, total: bool) -> Self {
        Self { skip, take, total }
    }

    pub fn skip(&self) -> u64 {
        self.skip.unwrap_or(0)
    }

    /// Requested page size, defaulted to and capped by `max_take`.
    pub fn take(&self, max_take: u64) -> u64 {
        self.take.map_or(max_take, |take| take.min(max_take))
    }
}

/// One page of results. `total` is set only when it was requested.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPage<T> {
    pub data: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl<T> DataPage<T> {
    pub fn new(data: Vec<T>, total: Option<u64>) -> Self {
        Self { data, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let paging = PagingParams::default();
        assert_eq!(paging.skip(), 0);
        assert_eq!(paging.take(100), 100);
        assert!(!paging.total);
    }

    #[test]
    fn take_is_capped() {
        let paging = PagingParams::new(Some(5), Some(500), true);
        assert_eq!(paging.skip(), 5);
        assert_eq!(paging.take(100), 100);
        assert_eq!(PagingParams::new(None, Some(10), false).take(100), 10);
    }

    #[test]
    fn page_omits_absent_total() {
        let page = DataPage::new(vec![1, 2], None);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json, serde_json::json!({"data": [1, 2]}));
    }
}
