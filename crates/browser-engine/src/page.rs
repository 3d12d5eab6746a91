//! Per-tab page driver.
//!
//! Owns the CDP session of one tab: script pre-injection, request
//! interception, the host-binding RPC surface, `beginFrame` capture,
//! CSS-animation seeking, and timeActions. One driver is reused across
//! captures; between captures it idles on about:blank in the READY
//! state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chromiumoxide::cdp::browser_protocol::animation as cdp_animation;
use chromiumoxide::cdp::browser_protocol::emulation as cdp_emulation;
use chromiumoxide::cdp::browser_protocol::fetch as cdp_fetch;
use chromiumoxide::cdp::browser_protocol::headless_experimental as cdp_headless;
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::cdp::browser_protocol::page as cdp_page;
use chromiumoxide::cdp::js_protocol::runtime as cdp_runtime;
use chromiumoxide::Page;
use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use webreel_common::{EngineConfig, WebreelError, WebreelResult, Workspace};
use webreel_model::{AudioDescriptor, RenderJob, ScreenshotFormat};
use webreel_preprocessor::Preprocessor;
use webreel_runtime::{
    BindingMessage, CaptureScriptConfig, HostFunction, PageThrownError, ScriptBundle,
    UpdateAudioEndTime, VendorLibrary, VideoConfig, BINDING_NAME, LOCAL_FONT_PREFIX,
    PREPROCESS_PATH,
};

/// Stylesheet injected after navigation: deterministic layout, no
/// scrollbars, no caret blinking in captures.
const COMMON_STYLESHEET: &str = "html,body{margin:0;padding:0;overflow:hidden;} \
     ::-webkit-scrollbar{display:none;} *{caret-color:transparent;}";

/// Page lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Uninitialized,
    Ready,
    Capturing,
    Paused,
    Stopped,
    Closed,
    /// Terminal: the renderer stalled or the page broke mid-capture.
    Unavailabled,
}

/// Host-side action fired once when virtual time passes its key.
pub type TimeAction = Box<dyn FnOnce(Page) -> BoxFuture<'static, WebreelResult<()>> + Send>;

/// How `seekTimeActions` consumes elapsed keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeActionPolicy {
    /// Fire only the smallest elapsed key, one per tick.
    #[default]
    NextPending,
    /// Fire every elapsed key in ascending order.
    AllElapsed,
}

/// Take the actions due at virtual time `t` under the given policy.
/// Consumed entries never fire again.
pub fn take_due_time_actions<A>(
    actions: &mut BTreeMap<u64, A>,
    t_ms: f64,
    policy: TimeActionPolicy,
) -> Vec<A> {
    let mut due = Vec::new();
    loop {
        let Some((&key, _)) = actions.iter().next() else {
            break;
        };
        if key as f64 > t_ms {
            break;
        }
        due.push(actions.remove(&key).expect("key was just observed"));
        if policy == TimeActionPolicy::NextPending {
            break;
        }
    }
    due
}

/// One CSS animation observed through the Animation domain.
#[derive(Debug, Clone)]
struct TrackedAnimation {
    delay: f64,
    duration: f64,
    iterations: f64,
    /// Virtual time the animation was pinned (paused) at.
    pinned: Option<f64>,
}

/// Tracks page CSS animations and their virtual-time seeks.
#[derive(Debug, Default)]
pub struct AnimationTracker {
    animations: HashMap<String, TrackedAnimation>,
}

impl AnimationTracker {
    /// Record a started animation (from `Animation.animationStarted`).
    pub fn observe(&mut self, id: String, delay: f64, duration: f64, iterations: f64) {
        self.animations.entry(id).or_insert(TrackedAnimation {
            delay,
            duration,
            iterations,
            pinned: None,
        });
    }

    /// Animations not yet pinned; pins them at `t`. These must be
    /// paused via `Animation.setPaused`.
    pub fn pin_new(&mut self, t_ms: f64) -> Vec<String> {
        let mut fresh = Vec::new();
        for (id, anim) in self.animations.iter_mut() {
            if anim.pinned.is_none() {
                anim.pinned = Some(t_ms);
                fresh.push(id.clone());
            }
        }
        fresh.sort();
        fresh
    }

    /// Per-animation seek offsets (`t - pinned`) for the current tick;
    /// finished animations are dropped and returned separately.
    pub fn seek_offsets(&mut self, t_ms: f64) -> (Vec<(String, f64)>, Vec<String>) {
        let mut seeks = Vec::new();
        let mut expired = Vec::new();
        for (id, anim) in self.animations.iter() {
            let Some(pinned) = anim.pinned else { continue };
            let total = anim.delay + anim.duration * anim.iterations.max(1.0);
            if anim.iterations.is_finite() && t_ms >= pinned + total {
                expired.push(id.clone());
            } else {
                seeks.push((id.clone(), t_ms - pinned));
            }
        }
        for id in &expired {
            self.animations.remove(id);
        }
        seeks.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.total_cmp(&b.1)));
        expired.sort();
        (seeks, expired)
    }

    pub fn len(&self) -> usize {
        self.animations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.animations.is_empty()
    }

    pub fn clear(&mut self) {
        self.animations.clear();
    }
}

/// Whether a navigation target is acceptable without
/// `allow_unsafe_context`: HTTPS anywhere, HTTP only on loopback.
pub fn is_safe_context(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("https://") || lower.starts_with("about:") {
        return true;
    }
    if let Some(rest) = lower.strip_prefix("http://") {
        let host = rest
            .split(['/', '?', '#'])
            .next()
            .unwrap_or("")
            .rsplit('@')
            .next()
            .unwrap_or("");
        let host = host.split(':').next().unwrap_or("");
        return host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
    }
    false
}

/// State shared with the event pump tasks for one capture.
struct ActiveCapture {
    job: RenderJob,
    target_url: String,
    loaded: bool,
    frame_tx: mpsc::Sender<Vec<u8>>,
    audios: Vec<AudioDescriptor>,
    time_actions: BTreeMap<u64, TimeAction>,
    time_action_policy: TimeActionPolicy,
    animations: AnimationTracker,
    completion: Option<oneshot::Sender<WebreelResult<()>>>,
    frames_emitted: u64,
}

impl ActiveCapture {
    fn complete(&mut self, result: WebreelResult<()>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(result);
        }
    }
}

struct PageInner {
    page: Page,
    engine: EngineConfig,
    workspace: Workspace,
    preprocessor: Arc<Preprocessor>,
    state: Mutex<PageState>,
    capture: Mutex<Option<ActiveCapture>>,
}

/// Host-side controller for one browser tab.
#[derive(Clone)]
pub struct PageDriver {
    inner: Arc<PageInner>,
}

/// What a finished capture hands back.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub audios: Vec<AudioDescriptor>,
    pub frames_emitted: u64,
}

impl PageDriver {
    /// Wrap a tab and wire up interception, bindings, and events.
    pub async fn init(
        page: Page,
        engine: EngineConfig,
        workspace: Workspace,
        preprocessor: Arc<Preprocessor>,
    ) -> WebreelResult<Self> {
        let driver = Self {
            inner: Arc::new(PageInner {
                page,
                engine,
                workspace,
                preprocessor,
                state: Mutex::new(PageState::Uninitialized),
                capture: Mutex::new(None),
            }),
        };

        let page = &driver.inner.page;
        page.set_user_agent(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Webreel",
        )
        .await
        .map_err(|e| WebreelError::page(format!("set user agent failed: {e}")))?;

        page.execute(cdp_page::SetBypassCspParams::new(true))
            .await
            .map_err(|e| WebreelError::page(format!("bypass CSP failed: {e}")))?;

        page.execute(cdp_fetch::EnableParams::builder().build())
            .await
            .map_err(|e| WebreelError::page(format!("enable interception failed: {e}")))?;

        page.execute(cdp_runtime::AddBindingParams::new(BINDING_NAME))
            .await
            .map_err(|e| WebreelError::page(format!("add binding failed: {e}")))?;

        driver.spawn_binding_pump().await?;
        driver.spawn_interception_pump().await?;
        driver.spawn_lifecycle_pump().await?;
        driver.spawn_animation_pump().await?;

        *driver.inner.state.lock().await = PageState::Ready;
        tracing::debug!("page driver initialized");
        Ok(driver)
    }

    pub async fn state(&self) -> PageState {
        *self.inner.state.lock().await
    }

    /// Render one scene on this page. Returns the collected audio
    /// descriptors when the page reports `screencastCompleted`.
    pub async fn capture(
        &self,
        job: RenderJob,
        time_actions: BTreeMap<u64, TimeAction>,
        time_action_policy: TimeActionPolicy,
        frame_tx: mpsc::Sender<Vec<u8>>,
    ) -> WebreelResult<CaptureOutcome> {
        job.validate()?;
        {
            let state = self.inner.state.lock().await;
            if *state != PageState::Ready {
                return Err(WebreelError::page(format!(
                    "page is {state:?}, not READY"
                )));
            }
        }

        let target_url = match &job.source {
            webreel_model::PageSource::Url(url) => {
                if !job.allow_unsafe_context && !is_safe_context(url) {
                    return Err(WebreelError::page(format!(
                        "refusing non-HTTPS, non-loopback target '{url}' \
                         (set allow_unsafe_context to override)"
                    )));
                }
                url.clone()
            }
            webreel_model::PageSource::Html(_) => "about:blank".to_string(),
        };

        let page = &self.inner.page;
        page.execute(
            cdp_emulation::SetDeviceMetricsOverrideParams::new(
                job.width as i64,
                job.height as i64,
                1.0,
                false,
            ),
        )
        .await
        .map_err(|e| WebreelError::page(format!("viewport override failed: {e}")))?;

        // A translucent default background is what makes alpha capture
        // (and the PNG screenshot fallback) meaningful.
        page.execute(
            cdp_emulation::SetDefaultBackgroundColorOverrideParams::builder()
                .color(
                    chromiumoxide::cdp::browser_protocol::dom::Rgba::builder()
                        .r(255)
                        .g(255)
                        .b(255)
                        .a(job.background_opacity)
                        .build()
                        .map_err(WebreelError::page)?,
                )
                .build(),
        )
        .await
        .map_err(|e| WebreelError::page(format!("background override failed: {e}")))?;

        // Pre-inject the runtime at document start, with vendored
        // libraries renamed off the global namespace.
        let script_config =
            CaptureScriptConfig::from_job(&job, chrono::Utc::now().timestamp_millis() as f64);
        let mut bundle = ScriptBundle::new(script_config);
        for (global, file) in [("MP4Box", "mp4box.min.js"), ("lottie", "lottie.min.js")] {
            let path = self.inner.workspace.root().join("runtime").join(file);
            match std::fs::read_to_string(&path) {
                Ok(source) => bundle = bundle.with_library(VendorLibrary::new(global, source)),
                Err(_) => {
                    tracing::debug!(library = global, path = %path.display(),
                        "vendor library not present, page media needing it will fail to load");
                }
            }
        }
        let injected = page
            .execute(cdp_page::AddScriptToEvaluateOnNewDocumentParams::new(
                bundle.build(),
            ))
            .await
            .map_err(|e| WebreelError::page(format!("script injection failed: {e}")))?;
        let script_id = injected.result.identifier.clone();

        page.execute(cdp_animation::EnableParams::default())
            .await
            .map_err(|e| WebreelError::page(format!("enable animation domain failed: {e}")))?;

        let (completion_tx, completion_rx) = oneshot::channel();
        {
            let mut capture = self.inner.capture.lock().await;
            *capture = Some(ActiveCapture {
                target_url: target_url.clone(),
                loaded: false,
                frame_tx,
                audios: Vec::new(),
                time_actions,
                time_action_policy,
                animations: AnimationTracker::default(),
                completion: Some(completion_tx),
                frames_emitted: 0,
                job,
            });
        }
        *self.inner.state.lock().await = PageState::Capturing;

        let navigation = async {
            match {
                let capture = self.inner.capture.lock().await;
                capture.as_ref().map(|c| c.job.source.clone())
            } {
                Some(webreel_model::PageSource::Url(url)) => page
                    .goto(url)
                    .await
                    .map(|_| ())
                    .map_err(|e| WebreelError::page(format!("navigation failed: {e}"))),
                Some(webreel_model::PageSource::Html(html)) => page
                    .set_content(html)
                    .await
                    .map(|_| ())
                    .map_err(|e| WebreelError::page(format!("set content failed: {e}"))),
                None => Err(WebreelError::page("capture state vanished")),
            }
        };
        navigation.await?;
        if let Some(capture) = self.inner.capture.lock().await.as_mut() {
            capture.loaded = true;
        }

        page.evaluate(format!(
            "(() => {{ const s = document.createElement('style'); \
             s.textContent = {COMMON_STYLESHEET:?}; document.head.appendChild(s); }})()"
        ))
        .await
        .map_err(|e| WebreelError::page(format!("stylesheet injection failed: {e}")))?;

        page.evaluate("window.____captureCtx.init()")
            .await
            .map_err(|e| WebreelError::page(format!("capture init failed: {e}")))?;

        tracing::info!(target = %target_url, "capture started");
        let result = completion_rx
            .await
            .unwrap_or_else(|_| Err(WebreelError::page("capture completion channel dropped")));

        let outcome = {
            let mut capture = self.inner.capture.lock().await;
            let active = capture.take();
            active.map(|c| CaptureOutcome {
                audios: c.audios,
                frames_emitted: c.frames_emitted,
            })
        };

        // Reset for reuse regardless of outcome, unless the page died.
        let final_state = *self.inner.state.lock().await;
        if final_state != PageState::Unavailabled {
            *self.inner.state.lock().await = PageState::Stopped;
            let _ = page
                .execute(cdp_page::RemoveScriptToEvaluateOnNewDocumentParams::new(
                    script_id,
                ))
                .await;
            let _ = page.goto("about:blank").await;
            *self.inner.state.lock().await = PageState::Ready;
        }

        result?;
        outcome.ok_or_else(|| WebreelError::page("capture state vanished before completion"))
    }

    /// Ask the page to stop at the next tick boundary.
    pub async fn abort(&self) -> WebreelResult<()> {
        self.inner
            .page
            .evaluate("window.____captureCtx && window.____captureCtx.abort()")
            .await
            .map_err(|e| WebreelError::page(format!("abort failed: {e}")))?;
        Ok(())
    }

    pub async fn pause(&self) -> WebreelResult<()> {
        self.inner
            .page
            .evaluate("window.____captureCtx && window.____captureCtx.pause()")
            .await
            .map_err(|e| WebreelError::page(format!("pause failed: {e}")))?;
        *self.inner.state.lock().await = PageState::Paused;
        Ok(())
    }

    pub async fn resume(&self) -> WebreelResult<()> {
        self.inner
            .page
            .evaluate("window.____captureCtx && window.____captureCtx.resume()")
            .await
            .map_err(|e| WebreelError::page(format!("resume failed: {e}")))?;
        *self.inner.state.lock().await = PageState::Capturing;
        Ok(())
    }

    pub async fn close(&self) -> WebreelResult<()> {
        *self.inner.state.lock().await = PageState::Closed;
        self.inner
            .page
            .clone()
            .close()
            .await
            .map_err(|e| WebreelError::page(format!("close failed: {e}")))?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Event pumps.

    async fn spawn_binding_pump(&self) -> WebreelResult<()> {
        let mut events = self
            .inner
            .page
            .event_listener::<cdp_runtime::EventBindingCalled>()
            .await
            .map_err(|e| WebreelError::page(format!("binding listener failed: {e}")))?;
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let Some(inner) = inner.upgrade() else { break };
                if event.name != BINDING_NAME {
                    continue;
                }
                let driver = PageDriver { inner };
                driver.handle_binding(&event.payload).await;
            }
        });
        Ok(())
    }

    async fn spawn_interception_pump(&self) -> WebreelResult<()> {
        let mut events = self
            .inner
            .page
            .event_listener::<cdp_fetch::EventRequestPaused>()
            .await
            .map_err(|e| WebreelError::page(format!("fetch listener failed: {e}")))?;
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let Some(inner) = inner.upgrade() else { break };
                let driver = PageDriver { inner };
                if let Err(err) = driver.handle_request(&event).await {
                    tracing::warn!(error = %err, url = %event.request.url,
                        "request interception failed");
                }
            }
        });
        Ok(())
    }

    async fn spawn_lifecycle_pump(&self) -> WebreelResult<()> {
        let mut dom_events = self
            .inner
            .page
            .event_listener::<cdp_page::EventDomContentEventFired>()
            .await
            .map_err(|e| WebreelError::page(format!("lifecycle listener failed: {e}")))?;
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while dom_events.next().await.is_some() {
                let Some(inner) = inner.upgrade() else { break };
                let mut capture = inner.capture.lock().await;
                if let Some(active) = capture.as_mut() {
                    if active.loaded {
                        // The page reloaded underneath a running capture.
                        tracing::error!("page refreshed unexpectedly during capture");
                        *inner.state.lock().await = PageState::Unavailabled;
                        active.complete(Err(WebreelError::page(
                            "page refreshed unexpectedly during capture",
                        )));
                    }
                }
            }
        });

        let mut exceptions = self
            .inner
            .page
            .event_listener::<cdp_runtime::EventExceptionThrown>()
            .await
            .map_err(|e| WebreelError::page(format!("exception listener failed: {e}")))?;
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = exceptions.next().await {
                let Some(inner) = inner.upgrade() else { break };
                let text = event.exception_details.text.clone();
                let capturing = *inner.state.lock().await == PageState::Capturing;
                if capturing {
                    tracing::error!(error = %text, "uncaught page exception during capture");
                    *inner.state.lock().await = PageState::Unavailabled;
                    if let Some(active) = inner.capture.lock().await.as_mut() {
                        active.complete(Err(WebreelError::page(format!(
                            "uncaught page exception: {text}"
                        ))));
                    }
                } else {
                    tracing::warn!(error = %text, "uncaught page exception");
                }
            }
        });

        let mut console = self
            .inner
            .page
            .event_listener::<cdp_runtime::EventConsoleApiCalled>()
            .await
            .map_err(|e| WebreelError::page(format!("console listener failed: {e}")))?;
        tokio::spawn(async move {
            while let Some(event) = console.next().await {
                let text = event
                    .args
                    .iter()
                    .filter_map(|arg| arg.value.as_ref())
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect::<Vec<_>>()
                    .join(" ");
                tracing::debug!(kind = ?event.r#type, "[page] {text}");
            }
        });
        Ok(())
    }

    async fn spawn_animation_pump(&self) -> WebreelResult<()> {
        let mut events = self
            .inner
            .page
            .event_listener::<cdp_animation::EventAnimationStarted>()
            .await
            .map_err(|e| WebreelError::page(format!("animation listener failed: {e}")))?;
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let Some(inner) = inner.upgrade() else { break };
                let animation = &event.animation;
                let (delay, duration, iterations) = animation
                    .source
                    .as_ref()
                    .map(|s| (s.delay, s.duration, s.iterations))
                    .unwrap_or((0.0, 0.0, 1.0));
                let mut guard = inner.capture.lock().await;
                if let Some(active) = guard.as_mut() {
                    active
                        .animations
                        .observe(animation.id.clone(), delay, duration, iterations);
                }
            }
        });
        Ok(())
    }

    // -----------------------------------------------------------------
    // Binding dispatch.

    async fn handle_binding(&self, payload: &str) {
        let message: BindingMessage = match serde_json::from_str(payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "malformed binding payload");
                return;
            }
        };
        let seq = message.seq;
        let result = self.dispatch_binding(&message).await;
        let (value, error) = match result {
            Ok(value) => (value, serde_json::Value::Null),
            Err(err) => (
                serde_json::Value::Null,
                serde_json::Value::String(err.to_string()),
            ),
        };
        let resolve = format!("window.____resolveHost({seq}, {value}, {error})");
        if let Err(err) = self.inner.page.evaluate(resolve).await {
            tracing::warn!(error = %err, seq, "failed to resolve host call");
        }
    }

    async fn dispatch_binding(
        &self,
        message: &BindingMessage,
    ) -> WebreelResult<serde_json::Value> {
        match HostFunction::parse(&message.name)? {
            HostFunction::CaptureFrame => {
                let accepted = self.capture_frame().await?;
                Ok(serde_json::Value::Bool(accepted))
            }
            HostFunction::SkipFrame => {
                self.skip_frame().await?;
                Ok(serde_json::Value::Null)
            }
            HostFunction::ScreencastCompleted => {
                tracing::info!("screencast completed");
                if let Some(active) = self.inner.capture.lock().await.as_mut() {
                    active.complete(Ok(()));
                }
                let mut state = self.inner.state.lock().await;
                if *state == PageState::Capturing || *state == PageState::Paused {
                    *state = PageState::Stopped;
                }
                Ok(serde_json::Value::Null)
            }
            HostFunction::AddAudio => {
                let audio: AudioDescriptor = serde_json::from_value(message.payload.clone())?;
                audio.validate()?;
                if let Some(active) = self.inner.capture.lock().await.as_mut() {
                    let mut audio = audio;
                    audio.clamp_end(active.job.duration_ms);
                    tracing::debug!(id = audio.id, source = %audio.source, "audio registered");
                    active.audios.push(audio);
                }
                Ok(serde_json::Value::Null)
            }
            HostFunction::UpdateAudioEndTime => {
                let update: UpdateAudioEndTime = serde_json::from_value(message.payload.clone())?;
                if let Some(active) = self.inner.capture.lock().await.as_mut() {
                    if let Some(audio) = active.audios.iter_mut().find(|a| a.id == update.id) {
                        audio.end_time = update.end_time;
                    }
                }
                Ok(serde_json::Value::Null)
            }
            HostFunction::SeekCssAnimations => {
                let t = message.payload.as_f64().unwrap_or(0.0);
                self.seek_css_animations(t).await?;
                Ok(serde_json::Value::Null)
            }
            HostFunction::SeekTimeActions => {
                let t = message.payload.as_f64().unwrap_or(0.0);
                self.seek_time_actions(t).await?;
                Ok(serde_json::Value::Null)
            }
            HostFunction::ThrowError => {
                let thrown: PageThrownError = serde_json::from_value(message.payload.clone())?;
                tracing::error!(code = thrown.code, "page error: {}", thrown.message);
                *self.inner.state.lock().await = PageState::Unavailabled;
                if let Some(active) = self.inner.capture.lock().await.as_mut() {
                    active.complete(Err(WebreelError::page(format!(
                        "page error {}: {}",
                        thrown.code, thrown.message
                    ))));
                }
                Ok(serde_json::Value::Null)
            }
        }
    }

    // -----------------------------------------------------------------
    // Frame production.

    /// Produce one composited frame and emit its screenshot. Returns
    /// false when the capture should stop.
    async fn capture_frame(&self) -> WebreelResult<bool> {
        let (format, quality) = {
            let capture = self.inner.capture.lock().await;
            let Some(active) = capture.as_ref() else {
                return Ok(false);
            };
            (
                active.job.effective_screenshot_format(),
                active.job.screenshot_quality,
            )
        };

        let timeout = Duration::from_millis(self.inner.engine.timeouts.frame_ms);
        let shot = if self.inner.engine.compatible_render_mode {
            self.compatible_screenshot(format, quality).await
        } else {
            self.begin_frame_screenshot(format, quality, timeout).await
        };

        match shot {
            Ok(Some(bytes)) => {
                let tx = {
                    let capture = self.inner.capture.lock().await;
                    capture.as_ref().map(|c| c.frame_tx.clone())
                };
                if let Some(tx) = tx {
                    if tx.send(bytes).await.is_err() {
                        tracing::warn!("frame sink closed, stopping capture");
                        return Ok(false);
                    }
                }
                if let Some(active) = self.inner.capture.lock().await.as_mut() {
                    active.frames_emitted += 1;
                }
                Ok(true)
            }
            // An empty result is still a frame; the renderer had no
            // damage to report.
            Ok(None) => Ok(true),
            Err(err) => {
                tracing::error!(error = %err, "frame capture failed, page is unavailable");
                *self.inner.state.lock().await = PageState::Unavailabled;
                if let Some(active) = self.inner.capture.lock().await.as_mut() {
                    active.complete(Err(WebreelError::capture(format!(
                        "renderer stalled: {err}"
                    ))));
                }
                Ok(false)
            }
        }
    }

    async fn begin_frame_screenshot(
        &self,
        format: ScreenshotFormat,
        quality: u32,
        timeout: Duration,
    ) -> WebreelResult<Option<Vec<u8>>> {
        let screenshot_format = match format {
            ScreenshotFormat::Jpeg => cdp_headless::ScreenshotParamsFormat::Jpeg,
            ScreenshotFormat::Png => cdp_headless::ScreenshotParamsFormat::Png,
        };
        let params = cdp_headless::BeginFrameParams::builder()
            .no_display_updates(false)
            .screenshot(
                cdp_headless::ScreenshotParams::builder()
                    .format(screenshot_format)
                    .quality(quality as i64)
                    .build(),
            )
            .build();

        let response = tokio::time::timeout(timeout, self.inner.page.execute(params))
            .await
            .map_err(|_| {
                WebreelError::timeout("beginFrame did not return", timeout.as_millis() as u64)
            })?
            .map_err(|e| WebreelError::capture(format!("beginFrame failed: {e}")))?;

        match &response.result.screenshot_data {
            Some(data) => {
                let bytes = BASE64
                    .decode(AsRef::<[u8]>::as_ref(data))
                    .map_err(|e| WebreelError::capture(format!("screenshot decode failed: {e}")))?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    async fn compatible_screenshot(
        &self,
        format: ScreenshotFormat,
        quality: u32,
    ) -> WebreelResult<Option<Vec<u8>>> {
        let screenshot_format = match format {
            ScreenshotFormat::Jpeg => cdp_page::CaptureScreenshotFormat::Jpeg,
            ScreenshotFormat::Png => cdp_page::CaptureScreenshotFormat::Png,
        };
        let mut builder = cdp_page::CaptureScreenshotParams::builder()
            .format(screenshot_format)
            .optimize_for_speed(true);
        if format == ScreenshotFormat::Jpeg {
            builder = builder.quality(quality as i64);
        }
        let response = self
            .inner
            .page
            .execute(builder.build())
            .await
            .map_err(|e| WebreelError::capture(format!("screenshot failed: {e}")))?;
        let bytes = BASE64
            .decode(AsRef::<[u8]>::as_ref(&response.result.data))
            .map_err(|e| WebreelError::capture(format!("screenshot decode failed: {e}")))?;
        Ok(Some(bytes))
    }

    /// Advance rendering without emitting a frame.
    async fn skip_frame(&self) -> WebreelResult<()> {
        if self.inner.engine.compatible_render_mode {
            return Ok(());
        }
        let params = cdp_headless::BeginFrameParams::builder()
            .no_display_updates(false)
            .build();
        self.inner
            .page
            .execute(params)
            .await
            .map_err(|e| WebreelError::capture(format!("skip beginFrame failed: {e}")))?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // CSS animations and timeActions.

    async fn seek_css_animations(&self, t_ms: f64) -> WebreelResult<()> {
        let (fresh, seeks) = {
            let mut capture = self.inner.capture.lock().await;
            let Some(active) = capture.as_mut() else {
                return Ok(());
            };
            let fresh = active.animations.pin_new(t_ms);
            let (seeks, expired) = active.animations.seek_offsets(t_ms);
            if !expired.is_empty() {
                tracing::debug!(count = expired.len(), "css animations finished");
            }
            (fresh, seeks)
        };

        if !fresh.is_empty() {
            self.inner
                .page
                .execute(cdp_animation::SetPausedParams::new(fresh, true))
                .await
                .map_err(|e| WebreelError::page(format!("pause animations failed: {e}")))?;
        }
        for (id, offset) in seeks {
            self.inner
                .page
                .execute(cdp_animation::SeekAnimationsParams::new(vec![id], offset))
                .await
                .map_err(|e| WebreelError::page(format!("seek animations failed: {e}")))?;
        }
        Ok(())
    }

    async fn seek_time_actions(&self, t_ms: f64) -> WebreelResult<()> {
        let due = {
            let mut capture = self.inner.capture.lock().await;
            let Some(active) = capture.as_mut() else {
                return Ok(());
            };
            take_due_time_actions(&mut active.time_actions, t_ms, active.time_action_policy)
        };
        for action in due {
            if let Err(err) = action(self.inner.page.clone()).await {
                tracing::error!(error = %err, "time action failed");
                if let Some(active) = self.inner.capture.lock().await.as_mut() {
                    active.complete(Err(err));
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Request interception.

    async fn handle_request(
        &self,
        event: &cdp_fetch::EventRequestPaused,
    ) -> WebreelResult<()> {
        let url = event.request.url.as_str();
        let method = event.request.method.as_str();
        let request_id = event.request_id.clone();

        if method == "POST" && url.contains(PREPROCESS_PATH) {
            return self.serve_preprocess(event).await;
        }
        if method == "GET" && url.contains(LOCAL_FONT_PREFIX) {
            return self.serve_local_font(event).await;
        }

        // Navigation away from the capture target while CAPTURING would
        // tear down the page mid-run.
        let is_navigation = matches!(
            event.resource_type,
            chromiumoxide::cdp::browser_protocol::network::ResourceType::Document
        );
        if is_navigation {
            let capturing = *self.inner.state.lock().await == PageState::Capturing;
            let is_target = {
                let capture = self.inner.capture.lock().await;
                capture
                    .as_ref()
                    .map(|c| !c.loaded || c.target_url == url)
                    .unwrap_or(true)
            };
            if capturing && !is_target {
                tracing::warn!(url, "aborting navigation during capture");
                self.inner
                    .page
                    .execute(
                        cdp_fetch::FailRequestParams::builder()
                            .request_id(request_id)
                            .error_reason(ErrorReason::Aborted)
                            .build()
                            .map_err(WebreelError::page)?,
                    )
                    .await
                    .map_err(|e| WebreelError::page(format!("fail request failed: {e}")))?;
                return Ok(());
            }
        }

        self.inner
            .page
            .execute(
                cdp_fetch::ContinueRequestParams::builder()
                    .request_id(request_id)
                    .build()
                    .map_err(WebreelError::page)?,
            )
            .await
            .map_err(|e| WebreelError::page(format!("continue request failed: {e}")))?;
        Ok(())
    }

    async fn serve_preprocess(&self, event: &cdp_fetch::EventRequestPaused) -> WebreelResult<()> {
        let body = event
            .request
            .post_data_entries
            .as_ref()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.bytes.as_ref())
                    .filter_map(|bytes| BASE64.decode(AsRef::<[u8]>::as_ref(bytes)).ok())
                    .flatten()
                    .collect::<Vec<u8>>()
            })
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();
        let result: WebreelResult<Vec<u8>> = async {
            let config: VideoConfig = serde_json::from_str(&body)?;
            let processed = self.inner.preprocessor.process(&config).await?;
            match processed {
                Some(media) => {
                    if let Some(audio) = media.audio {
                        if let Some(active) = self.inner.capture.lock().await.as_mut() {
                            let mut audio = audio;
                            audio.clamp_end(active.job.duration_ms);
                            active.audios.push(audio);
                        }
                    }
                    Ok(media.payload)
                }
                None => Err(WebreelError::preprocess(format!(
                    "media '{}' was rejected by its origin",
                    config.url
                ))),
            }
        }
        .await;

        match result {
            Ok(payload) => {
                self.fulfill(event, 200, "application/octet-stream", &payload)
                    .await
            }
            Err(err) => {
                tracing::error!(error = %err, "preprocess RPC failed");
                self.fulfill(event, 500, "text/plain", err.to_string().as_bytes())
                    .await
            }
        }
    }

    async fn serve_local_font(&self, event: &cdp_fetch::EventRequestPaused) -> WebreelResult<()> {
        let url = &event.request.url;
        let relative = url
            .split(LOCAL_FONT_PREFIX)
            .nth(1)
            .unwrap_or_default()
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let path = self.inner.workspace.local_font_dir().join(relative);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                self.fulfill_with_headers(
                    event,
                    200,
                    vec![
                        ("content-type".to_string(), "font/woff2".to_string()),
                        (
                            "cache-control".to_string(),
                            "max-age=31536000".to_string(),
                        ),
                    ],
                    &bytes,
                )
                .await
            }
            Err(_) => self.fulfill(event, 404, "text/plain", b"font not cached").await,
        }
    }

    async fn fulfill(
        &self,
        event: &cdp_fetch::EventRequestPaused,
        status: i64,
        content_type: &str,
        body: &[u8],
    ) -> WebreelResult<()> {
        self.fulfill_with_headers(
            event,
            status,
            vec![("content-type".to_string(), content_type.to_string())],
            body,
        )
        .await
    }

    async fn fulfill_with_headers(
        &self,
        event: &cdp_fetch::EventRequestPaused,
        status: i64,
        headers: Vec<(String, String)>,
        body: &[u8],
    ) -> WebreelResult<()> {
        let header_entries: Vec<cdp_fetch::HeaderEntry> = headers
            .into_iter()
            .map(|(name, value)| cdp_fetch::HeaderEntry { name, value })
            .collect();
        let params = cdp_fetch::FulfillRequestParams::builder()
            .request_id(event.request_id.clone())
            .response_code(status)
            .response_headers(header_entries)
            .body(BASE64.encode(body))
            .build()
            .map_err(WebreelError::page)?;
        self.inner
            .page
            .execute(params)
            .await
            .map_err(|e| WebreelError::page(format!("fulfill request failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_context_accepts_https_and_loopback_only() {
        assert!(is_safe_context("https://example.com/page"));
        assert!(is_safe_context("http://localhost:3000/demo"));
        assert!(is_safe_context("http://127.0.0.1/x"));
        assert!(is_safe_context("about:blank"));
        assert!(!is_safe_context("http://example.com/page"));
        assert!(!is_safe_context("ftp://example.com"));
        assert!(!is_safe_context("file:///tmp/page.html"));
    }

    #[test]
    fn next_pending_policy_fires_one_smallest_elapsed_key() {
        let mut actions: BTreeMap<u64, u32> =
            [(1000, 1), (2000, 2), (3000, 3)].into_iter().collect();
        let due = take_due_time_actions(&mut actions, 2500.0, TimeActionPolicy::NextPending);
        assert_eq!(due, vec![1]);
        assert_eq!(actions.len(), 2);

        // The next tick picks up the next smallest elapsed key.
        let due = take_due_time_actions(&mut actions, 2500.0, TimeActionPolicy::NextPending);
        assert_eq!(due, vec![2]);

        // Nothing left under 2500; key 3000 waits.
        let due = take_due_time_actions(&mut actions, 2500.0, TimeActionPolicy::NextPending);
        assert!(due.is_empty());
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn all_elapsed_policy_drains_in_key_order() {
        let mut actions: BTreeMap<u64, u32> =
            [(3000, 3), (1000, 1), (2000, 2)].into_iter().collect();
        let due = take_due_time_actions(&mut actions, 2500.0, TimeActionPolicy::AllElapsed);
        assert_eq!(due, vec![1, 2]);
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn actions_fire_at_most_once() {
        let mut actions: BTreeMap<u64, u32> = [(2000, 2)].into_iter().collect();
        assert_eq!(
            take_due_time_actions(&mut actions, 2000.0, TimeActionPolicy::NextPending),
            vec![2]
        );
        assert!(
            take_due_time_actions(&mut actions, 9000.0, TimeActionPolicy::NextPending).is_empty()
        );
    }

    #[test]
    fn animations_pin_once_and_seek_relative_to_pin() {
        let mut tracker = AnimationTracker::default();
        tracker.observe("a".into(), 0.0, 1000.0, 1.0);

        let fresh = tracker.pin_new(500.0);
        assert_eq!(fresh, vec!["a".to_string()]);
        assert!(tracker.pin_new(600.0).is_empty()); // pinned once

        let (seeks, expired) = tracker.seek_offsets(800.0);
        assert_eq!(seeks, vec![("a".to_string(), 300.0)]);
        assert!(expired.is_empty());
    }

    #[test]
    fn finished_animations_are_dropped() {
        let mut tracker = AnimationTracker::default();
        tracker.observe("a".into(), 100.0, 1000.0, 2.0);
        tracker.pin_new(0.0);

        // delay 100 + 2x1000 = 2100ms lifetime from the pin.
        let (seeks, expired) = tracker.seek_offsets(2050.0);
        assert_eq!(seeks.len(), 1);
        assert!(expired.is_empty());

        let (seeks, expired) = tracker.seek_offsets(2100.0);
        assert!(seeks.is_empty());
        assert_eq!(expired, vec!["a".to_string()]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn infinite_animations_never_expire() {
        let mut tracker = AnimationTracker::default();
        tracker.observe("spin".into(), 0.0, 1000.0, f64::INFINITY);
        tracker.pin_new(0.0);
        let (seeks, expired) = tracker.seek_offsets(1e9);
        assert_eq!(seeks.len(), 1);
        assert!(expired.is_empty());
    }
}
