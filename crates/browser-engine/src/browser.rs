//! Browser process driver and the engine facade.
//!
//! A [`BrowserDriver`] owns one Chromium process (launched with the
//! deterministic-capture flag set) and a pool of page drivers inside
//! it. [`BrowserEngine`] owns the browser pool and is the entry point
//! for acquiring capture pages.

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use webreel_common::{EngineConfig, WebreelError, WebreelResult, Workspace};
use webreel_preprocessor::Preprocessor;

use crate::launch;
use crate::page::PageDriver;
use crate::pool::{PageLease, ResourcePool, TwoTierPool};

/// Browser lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserState {
    Uninitialized,
    Ready,
    Stopped,
    Closed,
    Unavailabled,
}

/// One Chromium process with its page pool.
#[derive(Clone)]
pub struct BrowserDriver {
    browser: Arc<Mutex<Browser>>,
    pages: Arc<ResourcePool<PageDriver>>,
    state: Arc<Mutex<BrowserState>>,
}

impl BrowserDriver {
    /// Launch a browser process. Bounded by the configured launch
    /// timeout (a wedged browser start must not hang the pool).
    pub async fn launch(
        engine: EngineConfig,
        workspace: Workspace,
        preprocessor: Arc<Preprocessor>,
    ) -> WebreelResult<Self> {
        let executable = launch::find_browser(&engine).ok_or_else(|| {
            WebreelError::browser(
                "no Chromium executable found (set WEBREEL_BROWSER_PATH or config.browser_path)",
            )
        })?;
        let user_data_dir = workspace.browser_dir();
        std::fs::create_dir_all(&user_data_dir)?;

        let config = BrowserConfig::builder()
            .chrome_executable(executable.clone())
            .args(launch::launch_args(&engine, &user_data_dir))
            .user_data_dir(user_data_dir.clone())
            .build()
            .map_err(WebreelError::browser)?;

        let launch_timeout = Duration::from_millis(engine.timeouts.launch_ms);
        let (browser, mut handler) =
            tokio::time::timeout(launch_timeout, Browser::launch(config))
                .await
                .map_err(|_| {
                    WebreelError::timeout("browser launch", launch_timeout.as_millis() as u64)
                })?
                .map_err(|e| WebreelError::browser(format!("browser launch failed: {e}")))?;

        tracing::info!(executable = %executable.display(), "browser launched");

        // The CDP message pump; the browser is dead once it ends.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    tracing::warn!(error = %err, "browser handler error");
                }
            }
            tracing::debug!("browser handler ended");
        });

        let browser = Arc::new(Mutex::new(browser));

        // The tab Chromium opens at launch is handed to the first page
        // acquirer instead of spawning a fresh one.
        let launch_tab: Arc<Mutex<Option<Page>>> = Arc::new(Mutex::new(
            browser.lock().await.pages().await.ok().and_then(|mut pages| {
                if pages.is_empty() {
                    None
                } else {
                    Some(pages.remove(0))
                }
            }),
        ));

        let pages = {
            let browser = browser.clone();
            let engine = engine.clone();
            let workspace = workspace.clone();
            let preprocessor = preprocessor.clone();
            Arc::new(ResourcePool::new(
                engine.pool.num_page_min,
                engine.pool.num_page_max,
                Box::new(move || {
                    let browser = browser.clone();
                    let launch_tab = launch_tab.clone();
                    let engine = engine.clone();
                    let workspace = workspace.clone();
                    let preprocessor = preprocessor.clone();
                    Box::pin(async move {
                        let existing = launch_tab.lock().await.take();
                        let tab = match existing {
                            Some(tab) => tab,
                            None => browser
                                .lock()
                                .await
                                .new_page("about:blank")
                                .await
                                .map_err(|e| {
                                    WebreelError::browser(format!("new page failed: {e}"))
                                })?,
                        };
                        PageDriver::init(tab, engine, workspace, preprocessor).await
                    })
                }),
            ))
        };

        Ok(Self {
            browser,
            pages,
            state: Arc::new(Mutex::new(BrowserState::Ready)),
        })
    }

    pub fn pages(&self) -> Arc<ResourcePool<PageDriver>> {
        self.pages.clone()
    }

    pub async fn state(&self) -> BrowserState {
        *self.state.lock().await
    }

    /// Close every page, then the process. A closed browser leaves no
    /// open pages behind.
    pub async fn close(&self) -> WebreelResult<()> {
        for page in self.pages.drain().await {
            if let Err(err) = page.close().await {
                tracing::warn!(error = %err, "page close failed during browser shutdown");
            }
        }
        *self.state.lock().await = BrowserState::Closed;
        self.browser
            .lock()
            .await
            .close()
            .await
            .map_err(|e| WebreelError::browser(format!("browser close failed: {e}")))?;
        Ok(())
    }
}

/// A page checked out of the engine.
pub type EnginePageLease = PageLease<BrowserDriver, PageDriver>;

/// The engine facade: the two-tier pool plus the shared services every
/// page needs.
pub struct BrowserEngine {
    pool: Arc<TwoTierPool<BrowserDriver, PageDriver>>,
    workspace: Workspace,
    config: EngineConfig,
    preprocessor: Arc<Preprocessor>,
}

impl BrowserEngine {
    pub fn new(config: EngineConfig) -> WebreelResult<Self> {
        let workspace = Workspace::new(&config.workdir);
        workspace.ensure()?;
        let preprocessor = Arc::new(Preprocessor::new(&workspace, &config));

        let outer = {
            let config = config.clone();
            let workspace = workspace.clone();
            let preprocessor = preprocessor.clone();
            ResourcePool::new(
                config.pool.num_browser_min,
                config.pool.num_browser_max,
                Box::new(move || {
                    let config = config.clone();
                    let workspace = workspace.clone();
                    let preprocessor = preprocessor.clone();
                    Box::pin(async move {
                        BrowserDriver::launch(config, workspace, preprocessor).await
                    })
                }),
            )
        };
        let pool = TwoTierPool::new(outer, Box::new(|browser: &BrowserDriver| browser.pages()));

        Ok(Self {
            pool,
            workspace,
            config,
            preprocessor,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn preprocessor(&self) -> Arc<Preprocessor> {
        self.preprocessor.clone()
    }

    /// Acquire a READY page for one capture.
    pub async fn acquire_page(&self) -> WebreelResult<EnginePageLease> {
        self.pool.acquire().await
    }

    /// Return a page after a capture.
    pub async fn release_page(&self, lease: EnginePageLease) {
        use crate::page::PageState;
        match lease.page.state().await {
            PageState::Ready => self.pool.release(lease).await,
            state => {
                tracing::warn!(?state, "discarding non-ready page instead of pooling it");
                let _ = lease.page.close().await;
                self.pool.discard(lease).await;
            }
        }
    }

    /// Close every pooled browser.
    pub async fn shutdown(&self) {
        for browser in self.pool.outer().drain().await {
            if let Err(err) = browser.close().await {
                tracing::warn!(error = %err, "browser shutdown failed");
            }
        }
    }
}
