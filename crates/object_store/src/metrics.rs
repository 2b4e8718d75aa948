use std::sync::atomic::{AtomicU64, Ordering};

/// Currently, sync happens with AWS S3, that has two limits on requests per second:
/// ~200 RPS for IAM services
/// ~3500 PUT/COPY/POST/DELETE or 5500 GET/HEAD S3 requests
/// <https://aws.amazon.com/premiumsupport/knowledge-center/s3-request-limit-avoid-throttling/>
pub const DEFAULT_S3_CONCURRENCY_LIMIT: usize = 100;

/// The kind of request being made, used both to pick a [`crate::s3_bucket`] concurrency-limiter
/// bucket and to tag request counts in [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Get,
    Put,
    List,
    Delete,
    Copy,
    ListVersions,
}

impl RequestKind {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        match self {
            RequestKind::Get => 0,
            RequestKind::Put => 1,
            RequestKind::List => 2,
            RequestKind::Delete => 3,
            RequestKind::Copy => 4,
            RequestKind::ListVersions => 5,
        }
    }
}

/// Dependency-free request counters (see DESIGN.md for why this doesn't pull in an external
/// metrics crate). Cheap enough to keep on the hot path unconditionally.
#[derive(Default)]
pub struct Metrics {
    requests: [AtomicU64; RequestKind::COUNT],
    bytes_fetched: AtomicU64,
}

impl Metrics {
    pub fn record_request(&self, kind: RequestKind) {
        self.requests[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_fetched(&self, n: u64) {
        self.bytes_fetched.fetch_add(n, Ordering::Relaxed);
    }

    pub fn request_count(&self, kind: RequestKind) -> u64 {
        self.requests[kind.index()].load(Ordering::Relaxed)
    }

    pub fn bytes_fetched(&self) -> u64 {
        self.bytes_fetched.load(Ordering::Relaxed)
    }
}
