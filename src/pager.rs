use serde_json::Value;

use crate::object::ParaObject;

/// Pagination state for list queries.
///
/// Limits the number of results per page and receives the total hit count
/// and the key of the last item back from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pager {
    pub page: u64,
    pub count: u64,
    pub sortby: Option<String>,
    pub desc: bool,
    pub limit: u64,
    pub last_key: Option<String>,
    pub select: Vec<String>,
}

impl Default for Pager {
    fn default() -> Self {
        Pager {
            page: 1,
            count: 0,
            sortby: Some("timestamp".to_string()),
            desc: true,
            limit: 30,
            last_key: None,
            select: Vec::new(),
        }
    }
}

impl Pager {
    pub fn new(page: u64, limit: u64) -> Self {
        Pager {
            page,
            limit,
            ..Pager::default()
        }
    }

    /// Query parameters for this pager. Every selected field becomes its own
    /// `select` parameter.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("page".to_string(), self.page.to_string()),
            ("desc".to_string(), self.desc.to_string()),
            ("limit".to_string(), self.limit.to_string()),
        ];
        if let Some(ref last_key) = self.last_key {
            params.push(("lastKey".to_string(), last_key.clone()));
        }
        if let Some(ref sortby) = self.sortby {
            params.push(("sort".to_string(), sortby.clone()));
        }
        for field in &self.select {
            params.push(("select".to_string(), field.clone()));
        }
        params
    }

    /// Read `totalHits` and `lastKey` from a search result
    pub fn update_from(&mut self, result: &Value) {
        if let Some(total) = result.get("totalHits").and_then(Value::as_u64) {
            self.count = total;
        }
        if let Some(last_key) = result.get("lastKey").and_then(Value::as_str) {
            self.last_key = Some(last_key.to_string());
        }
    }
}

/// Objects found in a JSON array; empty entries are skipped
pub fn items_from_list(list: &Value) -> Vec<ParaObject> {
    list.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| ParaObject::from_value(item.clone()))
                .filter(|obj| !obj.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Objects at field `at` of a result, updating `pager` along the way
pub fn items_at(result: &Value, at: &str, pager: Option<&mut Pager>) -> Vec<ParaObject> {
    let Some(list) = result.get(at) else {
        return Vec::new();
    };
    if let Some(pager) = pager {
        pager.update_from(result);
    }
    items_from_list(list)
}
