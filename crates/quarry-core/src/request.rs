//! # Query Requests & Pages
//!
//! Paging parameters, the result page returned to callers, and the
//! declarative [`QueryRequest`] a caller sends in one piece.
//!
//! ## Request Shape
//! ```json
//! {
//!   "page": 2,
//!   "pageSize": 25,
//!   "search": "acme",
//!   "order": "label.name:desc,name",
//!   "filters": [{ "property": "plays", "op": "greaterThan", "value": 100 }]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::filter::FilterSpec;
use crate::model::Model;
use crate::order::{OrderBy, OrderSpec};
use crate::predicate::{search, Predicate};

/// Page size used when a request does not specify one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

// =============================================================================
// Page Request
// =============================================================================

/// 1-based page number and page size. Both are always positive, however
/// the value was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPageRequest")]
pub struct PageRequest {
    page: u32,
    size: u32,
}

/// Wire form of [`PageRequest`], checked before it becomes one.
#[derive(Deserialize)]
struct RawPageRequest {
    page: u32,
    size: u32,
}

impl TryFrom<RawPageRequest> for PageRequest {
    type Error = CoreError;

    fn try_from(raw: RawPageRequest) -> CoreResult<Self> {
        PageRequest::new(raw.page, raw.size)
    }
}

impl PageRequest {
    /// ## Errors
    /// `InvalidPage` if `page` or `size` is zero.
    pub fn new(page: u32, size: u32) -> CoreResult<Self> {
        if page == 0 {
            return Err(CoreError::InvalidPage("page numbers start at 1".to_string()));
        }
        if size == 0 {
            return Err(CoreError::InvalidPage("page size must be positive".to_string()));
        }
        Ok(PageRequest { page, size })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of items before this page.
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.size as usize)
    }

    /// Takes this page out of an already sorted list.
    pub fn apply<E>(&self, items: Vec<E>) -> Vec<E> {
        items
            .into_iter()
            .skip(self.offset())
            .take(self.size as usize)
            .collect()
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest {
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

// =============================================================================
// Query Page
// =============================================================================

/// One page of a query result.
///
/// `total` counts every item that passed filtering and search, before
/// pagination.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage<E> {
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
    pub items: Vec<E>,
}

impl<E> QueryPage<E> {
    /// Builds a page from the full, already sorted result.
    pub fn from_sorted(items: Vec<E>, request: PageRequest) -> Self {
        let total = items.len();
        QueryPage {
            total,
            page: request.page,
            page_size: request.size,
            items: request.apply(items),
        }
    }

    pub fn total_pages(&self) -> usize {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size as usize)
    }

    pub fn map<U>(self, f: impl FnMut(E) -> U) -> QueryPage<U> {
        QueryPage {
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

// =============================================================================
// Query Request
// =============================================================================

/// A complete declarative query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryRequest {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
    /// Comma-separated order specs, e.g. `"name:desc,id"`.
    pub order: Option<String>,
    pub filters: Vec<FilterSpec>,
}

/// A request checked against an entity's metadata.
#[derive(Debug)]
pub struct RequestPlan<T> {
    /// Conjunction of all filters.
    pub filter: Predicate<T>,
    pub search: Predicate<T>,
    pub order: OrderBy<T>,
}

impl QueryRequest {
    /// Resolves paging; the page size is capped at `max_page_size`.
    ///
    /// ## Errors
    /// `InvalidPage` for page `0` or page size `0`.
    pub fn page_request(&self, max_page_size: u32) -> CoreResult<PageRequest> {
        let max = max_page_size.max(1);
        let size = match self.page_size {
            Some(0) => 0,
            Some(size) => size.min(max),
            None => DEFAULT_PAGE_SIZE.min(max),
        };
        PageRequest::new(self.page.unwrap_or(1), size)
    }

    pub fn order_specs(&self) -> CoreResult<Vec<OrderSpec>> {
        match &self.order {
            None => Ok(Vec::new()),
            Some(order) => order
                .split(',')
                .filter(|part| !part.trim().is_empty())
                .map(OrderSpec::parse)
                .collect(),
        }
    }

    /// Builds predicates and ordering, enforcing declared metadata: filters
    /// need a searchable property with that operator, orderings need a
    /// sortable root.
    pub fn plan<T: Model>(&self) -> CoreResult<RequestPlan<T>> {
        let filter = self
            .filters
            .iter()
            .map(FilterSpec::to_declared_predicate::<T>)
            .collect::<CoreResult<Vec<_>>>()?;

        let search = search::<T>(self.search.as_deref().unwrap_or_default())?;

        let order = self
            .order_specs()?
            .into_iter()
            .try_fold(OrderBy::default(), |order, spec| order.then_sortable(spec))?;

        Ok(RequestPlan {
            filter: Predicate::all(filter),
            search,
            order,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
