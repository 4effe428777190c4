//! Feed pagination with a single in-flight lock.
//!
//! The lock is the only de-duplication mechanism: rapid scroll events all
//! funnel into [`PaginationState::begin`], and every call made while a page is
//! outstanding is dropped.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Replace,
    Append,
}

impl LoadMode {
    pub fn from_append(append: bool) -> Self {
        if append {
            LoadMode::Append
        } else {
            LoadMode::Replace
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub request_id: u64,
    pub page: u32,
    pub mode: LoadMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationState {
    current_page: u32,
    total_pages: u32,
    in_flight: Option<PageRequest>,
    next_request_id: u64,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self::new()
    }
}

impl PaginationState {
    pub fn new() -> Self {
        Self {
            current_page: 1,
            total_pages: 1,
            in_flight: None,
            next_request_id: 1,
        }
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<PageRequest> {
        self.in_flight
    }

    pub fn has_more(&self) -> bool {
        self.current_page < self.total_pages
    }

    /// Takes the lock for `page`, or returns `None` when the request must be
    /// dropped: a fetch is already outstanding, the page is zero, or the page
    /// lies past the known end (page 1 is always allowed).
    pub fn begin(&mut self, page: u32, append: bool) -> Option<PageRequest> {
        if self.in_flight.is_some() {
            return None;
        }
        if page == 0 || (page > self.total_pages && page != 1) {
            return None;
        }
        let request = PageRequest {
            request_id: self.next_request_id,
            page,
            mode: LoadMode::from_append(append),
        };
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.in_flight = Some(request);
        Some(request)
    }

    pub fn begin_next(&mut self) -> Option<PageRequest> {
        self.begin(self.current_page.saturating_add(1), true)
    }

    /// Releases the lock and adopts the server's counters. Missing counters
    /// fall back to the requested page. Responses for a request other than the
    /// outstanding one are ignored and `None` is returned.
    pub fn complete(
        &mut self,
        request_id: u64,
        current_page: Option<u32>,
        total_pages: Option<u32>,
    ) -> Option<PageRequest> {
        let request = self.take_matching(request_id)?;
        self.current_page = current_page.unwrap_or(request.page).max(1);
        self.total_pages = total_pages.unwrap_or(request.page).max(1);
        Some(request)
    }

    /// Releases the lock after a failed fetch, leaving the counters untouched.
    pub fn fail(&mut self, request_id: u64) -> Option<PageRequest> {
        self.take_matching(request_id)
    }

    fn take_matching(&mut self, request_id: u64) -> Option<PageRequest> {
        match self.in_flight {
            Some(request) if request.request_id == request_id => self.in_flight.take(),
            _ => None,
        }
    }
}

/// True when the selection is within `threshold` items of the end of a list
/// of `len` items.
pub fn near_bottom(selected: usize, len: usize, threshold: usize) -> bool {
    if len == 0 {
        return false;
    }
    len.saturating_sub(selected.saturating_add(1)) <= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_request_while_loading_is_dropped() {
        let mut state = PaginationState::new();
        let first = state.begin(1, false).unwrap();
        let snapshot = state.clone();
        assert!(state.begin(1, false).is_none());
        assert!(state.begin_next().is_none());
        assert_eq!(state, snapshot);
        assert_eq!(state.in_flight(), Some(first));
    }

    #[test]
    fn page_past_end_is_rejected_but_page_one_is_not() {
        let mut state = PaginationState::new();
        let req = state.begin(1, false).unwrap();
        state.complete(req.request_id, Some(1), Some(3));

        assert!(state.begin(4, true).is_none());
        assert!(!state.is_loading());

        let req = state.begin(1, false).unwrap();
        state.complete(req.request_id, Some(1), Some(1));
        assert!(state.begin(2, true).is_none());
        assert!(state.begin(1, false).is_some());
    }

    #[test]
    fn completion_adopts_server_counters() {
        let mut state = PaginationState::new();
        let req = state.begin(1, false).unwrap();
        state.complete(req.request_id, Some(1), Some(4));
        let next = state.begin_next().unwrap();
        assert_eq!(next.page, 2);
        assert_eq!(next.mode, LoadMode::Append);
        state.complete(next.request_id, None, None);
        assert_eq!(state.current_page(), 2);
        assert_eq!(state.total_pages(), 2);
        assert!(!state.has_more());
    }

    #[test]
    fn failure_releases_lock_without_touching_counters() {
        let mut state = PaginationState::new();
        let req = state.begin(1, false).unwrap();
        state.complete(req.request_id, Some(1), Some(5));
        let next = state.begin_next().unwrap();
        assert!(state.fail(next.request_id).is_some());
        assert_eq!(state.current_page(), 1);
        assert_eq!(state.total_pages(), 5);
        assert!(!state.is_loading());
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut state = PaginationState::new();
        let req = state.begin(1, false).unwrap();
        assert!(state.complete(req.request_id + 7, Some(3), Some(9)).is_none());
        assert!(state.is_loading());
        assert_eq!(state.total_pages(), 1);
    }

    #[test]
    fn near_bottom_threshold() {
        assert!(!near_bottom(0, 0, 2));
        assert!(!near_bottom(0, 10, 2));
        assert!(near_bottom(7, 10, 2));
        assert!(near_bottom(9, 10, 0));
    }
}
