#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stealthfetch_rs::{
    CookieMap, EventHandler, FetchEvent, FetchProfile, FetchProvider, HtmlPage, ProviderError,
    StaticResolver, StealthFetch,
};
use url::Url;

/// What the scripted provider answers for one fetch.
#[derive(Debug, Clone)]
pub enum Step {
    Page { status: u16, html: String },
    /// Pretend the engine followed redirects and landed on `to`.
    Redirected { to: String, html: String },
    Fail(ProviderError),
    /// Never completes.
    Hang,
}

impl Step {
    pub fn ok(html: &str) -> Self {
        Step::Page {
            status: 200,
            html: html.to_string(),
        }
    }

    pub fn status(status: u16, html: &str) -> Self {
        Step::Page {
            status,
            html: html.to_string(),
        }
    }

    pub fn transport(reason: &str) -> Self {
        Step::Fail(ProviderError::Transport(reason.to_string()))
    }
}

#[derive(Debug)]
pub struct FakeContext {
    pub id: usize,
    pub proxy: Option<String>,
    pub cookies: CookieMap,
}

/// In-memory provider answering from per-URL scripts.
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    fallback: Step,
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub fetches: AtomicUsize,
    proxies_seen: Mutex<Vec<Option<String>>>,
    hang_next_create: AtomicBool,
}

impl ScriptedProvider {
    /// Every unscripted fetch answers with `fallback`.
    pub fn new(fallback: Step) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            created: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            proxies_seen: Mutex::new(Vec::new()),
            hang_next_create: AtomicBool::new(false),
        }
    }

    pub fn serving(html: &str) -> Self {
        Self::new(Step::ok(html))
    }

    /// Answers for `url`, consumed in order before falling back.
    pub fn script(self, url: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        let key = Url::parse(url).expect("scripted url").to_string();
        self.scripts
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .extend(steps);
        self
    }

    /// The next `create_context` never completes; later ones behave normally.
    pub fn hang_next_create(self) -> Self {
        self.hang_next_create.store(true, Ordering::SeqCst);
        self
    }

    /// Contexts fully created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Proxy of every fetch, in order.
    pub fn proxies_seen(&self) -> Vec<Option<String>> {
        self.proxies_seen.lock().unwrap().clone()
    }

    fn next_step(&self, url: &Url) -> Step {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(url.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl FetchProvider for ScriptedProvider {
    type Context = FakeContext;
    type Page = HtmlPage;

    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn create_context(
        &self,
        profile: &FetchProfile,
        cookies: &CookieMap,
    ) -> Result<FakeContext, ProviderError> {
        if self.hang_next_create.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(FakeContext {
            id,
            proxy: profile.proxy().map(str::to_string),
            cookies: cookies.clone(),
        })
    }

    async fn close_context(&self, _context: &FakeContext) -> Result<(), ProviderError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch(
        &self,
        context: &FakeContext,
        url: &Url,
        _profile: &FetchProfile,
    ) -> Result<HtmlPage, ProviderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.proxies_seen.lock().unwrap().push(context.proxy.clone());
        match self.next_step(url) {
            Step::Page { status, html } => Ok(HtmlPage::from_html(url.clone(), status, html)),
            Step::Redirected { to, html } => {
                let landed = Url::parse(&to).map_err(|err| ProviderError::Transport(err.to_string()))?;
                Ok(HtmlPage::from_html(landed, 200, html))
            }
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
        }
    }

    async fn cookies(&self, context: &FakeContext, _url: &Url) -> CookieMap {
        let mut jar = context.cookies.clone();
        jar.insert("visited".into(), "1".into());
        jar
    }
}

/// Keeps every dispatched event.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<FetchEvent>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<FetchEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn retry_delays(&self) -> Vec<std::time::Duration> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                FetchEvent::Retry(retry) => Some(retry.scheduled_after),
                _ => None,
            })
            .collect()
    }
}

impl EventHandler for Recorder {
    fn handle(&self, event: &FetchEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Resolver that knows no hosts, so only literal addresses are checked.
pub fn offline_resolver() -> Arc<StaticResolver> {
    Arc::new(StaticResolver::default())
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const ARTICLE: &str = r#"<html>
<head><title>Example Domain</title></head>
<body>
  <h1>Example Domain</h1>
  <p class="lead">This domain is for use in illustrative examples.</p>
  <a href="/one" class="link">One</a>
  <a href="/two" class="link">Two</a>
  <a href="/three" class="link" rel="nofollow">Three</a>
</body>
</html>"#;

pub const CF_INTERSTITIAL: &str = r#"<html>
<head><title>Just a moment...</title></head>
<body>
  <div id="cf-wrapper">Checking your browser before accessing the site.</div>
  <form id="challenge-form" action="/cdn-cgi/l/chk_jschl?__cf_chl_jschl_tk__=abc"></form>
</body>
</html>"#;

/// Facade over `provider` with fast retries and no logging handler.
pub fn facade(
    provider: ScriptedProvider,
    recorder: Arc<Recorder>,
) -> StealthFetch<ScriptedProvider> {
    let settings = stealthfetch_rs::Settings {
        base_delay_ms: 10,
        ..Default::default()
    };
    StealthFetch::builder()
        .with_settings(settings)
        .with_resolver(offline_resolver())
        .with_challenge_settle(std::time::Duration::ZERO)
        .with_event_handler(recorder)
        .disable_logging()
        .build_with_provider(provider)
        .expect("valid facade config")
}
