/// One page of a weighted sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    /// Sum of all weights across every page.
    pub total_weight: usize,
}

impl<T> Page<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    /// An empty page inside the range: an item that started on an earlier
    /// page carries enough weight to span this one.
    pub fn is_gap(&self) -> bool {
        self.items.is_empty() && self.page <= self.total_pages
    }
}

/// Paginate by cumulative weight instead of item count.
///
/// Page `p` covers weights `[(p-1)*size, p*size)`. An item belongs to the
/// page its first unit of weight falls on and is never split, so a heavy
/// item can push a page over `page_size`. Scanning stops at the first item
/// that starts at or past the end of the requested page.
pub fn paginate_by_weight<T, F>(items: &[T], page: usize, page_size: usize, weight: F) -> Page<T>
where
    T: Clone,
    F: Fn(&T) -> usize,
{
    let page = page.max(1);
    let page_size = page_size.max(1);
    let total_weight: usize = items.iter().map(&weight).sum();
    let total_pages = total_weight.div_ceil(page_size);

    let page_start = (page - 1).saturating_mul(page_size);
    let page_end = page_start.saturating_add(page_size);

    let mut selected = Vec::new();
    let mut consumed = 0usize;
    for item in items {
        if consumed >= page_end {
            break;
        }
        if consumed >= page_start {
            selected.push(item.clone());
        }
        consumed += weight(item);
    }

    Page {
        items: selected,
        page,
        page_size,
        total_pages,
        total_weight,
    }
}
