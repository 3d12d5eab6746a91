//! Bounded resource pools.
//!
//! [`ResourcePool`] is the generic min/max pool used at both tiers:
//! browsers in the engine, pages inside each browser. Resources are
//! created lazily by an async factory, warmed up to the minimum on
//! first acquisition, and handed out as owned values that must be
//! released back.
//!
//! [`BrowserPool`] composes two tiers: acquiring a page acquires a
//! browser, takes a page from that browser's inner pool, and releases
//! the browser back immediately unless its page pool is saturated — in
//! which case a deferred check returns the browser once a page frees
//! up. A 5-second ticker walks the deferred set.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, Notify};
use webreel_common::{WebreelError, WebreelResult};

/// Async factory creating pool resources.
pub type Factory<T> = Box<dyn Fn() -> BoxFuture<'static, WebreelResult<T>> + Send + Sync>;

struct PoolState<T> {
    idle: VecDeque<T>,
    total: usize,
    warmed: bool,
}

/// A bounded pool of lazily created resources.
pub struct ResourcePool<T> {
    factory: Factory<T>,
    min: usize,
    max: usize,
    state: Mutex<PoolState<T>>,
    released: Notify,
}

impl<T> ResourcePool<T> {
    pub fn new(min: usize, max: usize, factory: Factory<T>) -> Self {
        Self {
            factory,
            min: min.min(max),
            max: max.max(1),
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                warmed: false,
            }),
            released: Notify::new(),
        }
    }

    /// Acquire a resource, creating one when under the cap, waiting for
    /// a release when saturated.
    pub async fn acquire(&self) -> WebreelResult<T> {
        self.warmup().await?;
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(resource) = state.idle.pop_front() {
                    return Ok(resource);
                }
                if state.total < self.max {
                    state.total += 1;
                    drop(state);
                    match (self.factory)().await {
                        Ok(resource) => return Ok(resource),
                        Err(err) => {
                            self.state.lock().await.total -= 1;
                            self.released.notify_one();
                            return Err(err);
                        }
                    }
                }
            }
            self.released.notified().await;
        }
    }

    /// Return a resource to the idle set.
    pub async fn release(&self, resource: T) {
        let mut state = self.state.lock().await;
        state.idle.push_back(resource);
        drop(state);
        self.released.notify_one();
    }

    /// Remove a broken resource from accounting instead of releasing it.
    pub async fn discard(&self) {
        let mut state = self.state.lock().await;
        state.total = state.total.saturating_sub(1);
        drop(state);
        self.released.notify_one();
    }

    /// No idle resources and no room to create one.
    pub async fn is_saturated(&self) -> bool {
        let state = self.state.lock().await;
        state.idle.is_empty() && state.total >= self.max
    }

    pub async fn idle_count(&self) -> usize {
        self.state.lock().await.idle.len()
    }

    pub async fn total_count(&self) -> usize {
        self.state.lock().await.total
    }

    /// Create resources up to the minimum. Runs once, on the first
    /// acquisition (pools start cold).
    async fn warmup(&self) -> WebreelResult<()> {
        {
            let mut state = self.state.lock().await;
            if state.warmed {
                return Ok(());
            }
            state.warmed = true;
            state.total += self.min;
        }
        for _ in 0..self.min {
            match (self.factory)().await {
                Ok(resource) => self.release(resource).await,
                Err(err) => {
                    self.state.lock().await.total -= 1;
                    tracing::warn!(error = %err, "pool warmup creation failed");
                }
            }
        }
        Ok(())
    }

    /// Drain every idle resource (for shutdown).
    pub async fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock().await;
        let drained: Vec<T> = state.idle.drain(..).collect();
        state.total = state.total.saturating_sub(drained.len());
        drained
    }
}

/// Two-tier pooling facade over browsers and their pages.
///
/// `B` is the browser handle, `P` the page handle. The concrete wiring
/// (how a browser yields its page pool) is provided by the caller so
/// this stays testable without a real browser.
pub struct TwoTierPool<B, P> {
    outer: Arc<ResourcePool<B>>,
    page_pool_of: Box<dyn Fn(&B) -> Arc<ResourcePool<P>> + Send + Sync>,
    acquire_lock: Mutex<()>,
    deferred: Arc<Mutex<Vec<B>>>,
}

/// A page held together with the browser it came from, so release can
/// find the right inner pool.
pub struct PageLease<B, P> {
    pub browser: B,
    pub page: P,
}

impl<B: Clone + Send + 'static, P: Send + 'static> TwoTierPool<B, P> {
    pub fn new(
        outer: ResourcePool<B>,
        page_pool_of: Box<dyn Fn(&B) -> Arc<ResourcePool<P>> + Send + Sync>,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            outer: Arc::new(outer),
            page_pool_of,
            acquire_lock: Mutex::new(()),
            deferred: Arc::new(Mutex::new(Vec::new())),
        });
        pool.clone().spawn_deferred_ticker();
        pool
    }

    /// Acquire a page: browser from the outer pool, page from its inner
    /// pool, then release the browser back unless saturated.
    pub async fn acquire(&self) -> WebreelResult<PageLease<B, P>> {
        let _guard = self.acquire_lock.lock().await;
        let browser = self.outer.acquire().await?;
        let pages = (self.page_pool_of)(&browser);
        let page = match pages.acquire().await {
            Ok(page) => page,
            Err(err) => {
                self.outer.release(browser).await;
                return Err(err);
            }
        };
        if pages.is_saturated().await {
            // The browser re-enters the outer pool once a page frees up;
            // the ticker walks these.
            self.deferred.lock().await.push(browser.clone());
        } else {
            self.outer.release(browser.clone()).await;
        }
        Ok(PageLease { browser, page })
    }

    /// Return a page to its browser's inner pool.
    pub async fn release(&self, lease: PageLease<B, P>) {
        let pages = (self.page_pool_of)(&lease.browser);
        pages.release(lease.page).await;
    }

    /// Drop a broken page from accounting.
    pub async fn discard(&self, lease: PageLease<B, P>) {
        let pages = (self.page_pool_of)(&lease.browser);
        pages.discard().await;
        drop(lease.page);
    }

    /// Walk deferred browsers and release those below saturation.
    pub async fn run_deferred_checks(&self) {
        let mut deferred = self.deferred.lock().await;
        let mut keep = Vec::new();
        for browser in deferred.drain(..) {
            let pages = (self.page_pool_of)(&browser);
            if pages.is_saturated().await {
                keep.push(browser);
            } else {
                self.outer.release(browser).await;
            }
        }
        *deferred = keep;
    }

    fn spawn_deferred_ticker(self: Arc<Self>) {
        let pool = Arc::downgrade(&self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else { break };
                pool.run_deferred_checks().await;
            }
        });
    }

    pub fn outer(&self) -> &ResourcePool<B> {
        &self.outer
    }

    pub async fn deferred_count(&self) -> usize {
        self.deferred.lock().await.len()
    }
}

impl<B, P> TwoTierPool<B, P> {
    /// Pool-starvation error used by callers that refuse to wait.
    pub fn starvation_error() -> WebreelError {
        WebreelError::pool("no browser/page capacity available")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_factory(counter: Arc<AtomicUsize>) -> Factory<usize> {
        Box::new(move || {
            let counter = counter.clone();
            Box::pin(async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) })
        })
    }

    #[tokio::test]
    async fn acquire_creates_lazily_up_to_max() {
        let created = Arc::new(AtomicUsize::new(0));
        let pool = ResourcePool::new(0, 2, counting_factory(created.clone()));

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert!(pool.is_saturated().await);

        pool.release(a).await;
        let c = pool.acquire().await.unwrap();
        // Reuses the released resource instead of creating a third.
        assert_eq!(created.load(Ordering::SeqCst), 2);
        pool.release(b).await;
        pool.release(c).await;
    }

    #[tokio::test]
    async fn warmup_fills_to_min_on_first_acquire() {
        let created = Arc::new(AtomicUsize::new(0));
        let pool = ResourcePool::new(2, 4, counting_factory(created.clone()));
        assert_eq!(created.load(Ordering::SeqCst), 0); // cold until first use

        let one = pool.acquire().await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.idle_count().await, 1);
        pool.release(one).await;
    }

    #[tokio::test]
    async fn saturated_acquire_waits_for_release() {
        let created = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(ResourcePool::new(0, 1, counting_factory(created)));

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pool.release(held).await;
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        pool.release(got).await;
    }

    #[tokio::test]
    async fn factory_failure_releases_the_slot() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let factory: Factory<usize> = {
            let attempts = attempts.clone();
            Box::new(move || {
                let attempts = attempts.clone();
                Box::pin(async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(WebreelError::browser("boom"))
                    } else {
                        Ok(7)
                    }
                })
            })
        };
        let pool = ResourcePool::new(0, 1, factory);
        assert!(pool.acquire().await.is_err());
        // The failed slot was returned; the next acquire succeeds.
        let ok = pool.acquire().await.unwrap();
        assert_eq!(ok, 7);
        pool.release(ok).await;
    }

    // Two-tier wiring exercised with plain integers standing in for
    // browsers; each "browser" owns a page pool of capacity 2.
    fn two_tier(
        browser_max: usize,
        page_max: usize,
    ) -> Arc<TwoTierPool<Arc<(usize, Arc<ResourcePool<usize>>)>, usize>> {
        let next_browser = Arc::new(AtomicUsize::new(0));
        let outer: ResourcePool<Arc<(usize, Arc<ResourcePool<usize>>)>> = ResourcePool::new(
            0,
            browser_max,
            Box::new(move || {
                let next_browser = next_browser.clone();
                Box::pin(async move {
                    let id = next_browser.fetch_add(1, Ordering::SeqCst);
                    let next_page = Arc::new(AtomicUsize::new(0));
                    let pages =
                        Arc::new(ResourcePool::new(0, page_max, counting_factory(next_page)));
                    Ok(Arc::new((id, pages)))
                })
            }),
        );
        TwoTierPool::new(outer, Box::new(|b| b.1.clone()))
    }

    #[tokio::test]
    async fn two_tier_fans_out_pages_before_browsers_saturate() {
        let pool = two_tier(2, 2);

        let l1 = pool.acquire().await.unwrap();
        let l2 = pool.acquire().await.unwrap();
        let l3 = pool.acquire().await.unwrap();
        let l4 = pool.acquire().await.unwrap();

        // 2 browsers x 2 pages: four concurrent leases, two browsers.
        let ids: std::collections::HashSet<usize> =
            [&l1, &l2, &l3, &l4].iter().map(|l| l.browser.0).collect();
        assert_eq!(ids.len(), 2);

        // A fifth acquirer parks until a page is released.
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pool.release(l1).await;
        pool.run_deferred_checks().await;
        let l5 = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        for lease in [l2, l3, l4, l5] {
            pool.release(lease).await;
        }
    }

    #[tokio::test]
    async fn saturated_browser_is_deferred_not_released() {
        let pool = two_tier(1, 1);
        let lease = pool.acquire().await.unwrap();
        // The only browser's only page is out: the browser must be in
        // the deferred set, not the outer idle list.
        assert_eq!(pool.deferred_count().await, 1);
        assert_eq!(pool.outer().idle_count().await, 0);

        pool.release(lease).await;
        pool.run_deferred_checks().await;
        assert_eq!(pool.deferred_count().await, 0);
        assert_eq!(pool.outer().idle_count().await, 1);
    }
}
