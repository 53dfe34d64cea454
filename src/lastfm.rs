//! Blocking Last.fm client.
//!
//! Only two API methods are used: `auth.getMobileSession` to verify the
//! account up front, and `user.getRecentTracks` to list scrobbles. Requests are
//! spaced by a minimum interval and transient failures are retried with
//! exponential backoff.

use serde::Deserialize;
use std::thread;
use std::time::{Duration, Instant};

use crate::credentials::Credentials;
use crate::error::{Result, SyncError};
use crate::models::PlayEvent;
use crate::source::TrackSource;

pub const API_ROOT: &str = "https://ws.audioscrobbler.com/2.0/";
pub const USER_AGENT: &str = concat!("rbsync/", env!("CARGO_PKG_VERSION"));
pub const MAX_PAGE_SIZE: u32 = 200;
pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
pub const MIN_REQUEST_INTERVAL_MS: u64 = 200;

// ============================================================================
// Rate limiting / retry
// ============================================================================

/// Keeps consecutive requests at least `min_interval` apart.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Sleeps until the next request is allowed, then claims the slot.
    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                thread::sleep(self.min_interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base…
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    pub fn run<T>(&self, mut op: impl FnMut(u32) -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay(attempt);
                    log::warn!(
                        "{} (attempt {}/{}), retrying in {:?}",
                        e,
                        attempt,
                        self.max_attempts,
                        delay
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

// ============================================================================
// Signing
// ============================================================================

/// Last.fm `api_sig`: md5 of all parameters sorted by name, concatenated as
/// name+value, followed by the shared secret. `format` and `callback` are not
/// signed.
pub fn sign(params: &[(&str, String)], secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params
        .iter()
        .filter(|(k, _)| *k != "format" && *k != "callback")
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut payload = String::new();
    for (k, v) in sorted {
        payload.push_str(k);
        payload.push_str(v);
    }
    payload.push_str(secret);
    format!("{:x}", md5::compute(payload.as_bytes()))
}

/// Token for `auth.getMobileSession`: md5(username + md5(password)).
pub fn auth_token(username: &str, password_hash: &str) -> String {
    format!("{:x}", md5::compute(format!("{}{}", username, password_hash)))
}

// ============================================================================
// Response parsing
// ============================================================================

#[derive(Deserialize)]
struct ApiErrorBody {
    error: u32,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct SessionBody {
    session: Session,
}

#[derive(Deserialize)]
struct Session {
    key: String,
}

#[derive(Deserialize)]
struct RecentTracksBody {
    recenttracks: RecentTracks,
}

#[derive(Deserialize)]
struct RecentTracks {
    #[serde(default)]
    track: OneOrMany<RawTrack>,
    #[serde(rename = "@attr")]
    attr: PageAttr,
}

/// Last.fm sends a bare object instead of a one-element array.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(t) => vec![t],
        }
    }
}

#[derive(Deserialize)]
struct PageAttr {
    page: String,
    #[serde(rename = "totalPages")]
    total_pages: String,
}

#[derive(Deserialize)]
struct RawTrack {
    artist: TextField,
    name: String,
    album: Option<TextField>,
    date: Option<DateField>,
    #[serde(rename = "@attr")]
    attr: Option<TrackAttr>,
}

#[derive(Deserialize)]
struct TextField {
    #[serde(rename = "#text", default)]
    text: String,
}

#[derive(Deserialize)]
struct DateField {
    uts: String,
}

#[derive(Deserialize)]
struct TrackAttr {
    nowplaying: Option<String>,
}

/// One page of `user.getRecentTracks`.
#[derive(Clone, Debug, PartialEq)]
pub struct RecentTracksPage {
    pub events: Vec<PlayEvent>,
    pub page: u32,
    pub total_pages: u32,
}

/// Fails with [`SyncError::Api`] when `body` is a Last.fm error document.
fn check_api_error(body: &str) -> Result<()> {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) => Err(SyncError::Api {
            code: err.error,
            message: err.message,
        }),
        Err(_) => Ok(()),
    }
}

pub fn parse_session_key(body: &str) -> Result<String> {
    check_api_error(body)?;
    let parsed: SessionBody = serde_json::from_str(body)?;
    Ok(parsed.session.key)
}

/// Parses a recent-tracks page. The "now playing" row has no date and is
/// skipped, as are rows whose timestamp does not parse.
pub fn parse_recent_tracks(body: &str) -> Result<RecentTracksPage> {
    check_api_error(body)?;
    let parsed: RecentTracksBody = serde_json::from_str(body)?;
    let recent = parsed.recenttracks;

    let mut events = Vec::new();
    for raw in recent.track.into_vec() {
        let now_playing = raw
            .attr
            .as_ref()
            .and_then(|a| a.nowplaying.as_deref())
            .map_or(false, |v| v == "true");
        if now_playing {
            continue;
        }
        let Some(timestamp) = raw.date.and_then(|d| d.uts.parse::<i64>().ok()) else {
            log::debug!("Skipping undated scrobble {} - {}", raw.artist.text, raw.name);
            continue;
        };
        let album = raw.album.map(|a| a.text).filter(|a| !a.is_empty());
        events.push(PlayEvent {
            artist: raw.artist.text,
            title: raw.name,
            album,
            timestamp,
        });
    }

    Ok(RecentTracksPage {
        events,
        page: recent.attr.page.parse().unwrap_or(1),
        total_pages: recent.attr.total_pages.parse().unwrap_or(0),
    })
}

// ============================================================================
// Client
// ============================================================================

pub struct LastFmClient {
    http: reqwest::blocking::Client,
    api_root: String,
    credentials: Credentials,
    session_key: Option<String>,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl LastFmClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            api_root: API_ROOT.to_string(),
            credentials,
            session_key: None,
            limiter: RateLimiter::new(Duration::from_millis(MIN_REQUEST_INTERVAL_MS)),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_api_root(mut self, api_root: &str) -> Self {
        self.api_root = api_root.to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builds a client and opens an authenticated session. Any failure here
    /// means the account or API keys are unusable.
    pub fn connect(credentials: Credentials) -> Result<Self> {
        let mut client = Self::new(credentials)?;
        client.authenticate()?;
        Ok(client)
    }

    pub fn session_key(&self) -> Option<&str> {
        self.session_key.as_deref()
    }

    pub fn authenticate(&mut self) -> Result<()> {
        let mut params = vec![
            ("method", "auth.getMobileSession".to_string()),
            ("username", self.credentials.username.clone()),
            (
                "authToken",
                auth_token(&self.credentials.username, &self.credentials.password_hash),
            ),
            ("api_key", self.credentials.api_key.clone()),
        ];
        params.push(("api_sig", sign(&params, &self.credentials.api_secret)));
        params.push(("format", "json".to_string()));

        let body = self.call(&params, true)?;
        self.session_key = Some(parse_session_key(&body)?);
        log::info!("Authenticated with Last.fm as {}", self.credentials.username);
        Ok(())
    }

    pub fn recent_tracks_page(
        &mut self,
        from: i64,
        to: i64,
        page: u32,
        per_page: u32,
    ) -> Result<RecentTracksPage> {
        let params = vec![
            ("method", "user.getRecentTracks".to_string()),
            ("user", self.credentials.username.clone()),
            ("from", from.to_string()),
            ("to", to.to_string()),
            ("limit", per_page.to_string()),
            ("page", page.to_string()),
            ("api_key", self.credentials.api_key.clone()),
            ("format", "json".to_string()),
        ];
        let body = self.call(&params, false)?;
        parse_recent_tracks(&body)
    }

    /// Sends one API call with rate limiting and retries; returns the body.
    fn call(&mut self, params: &[(&str, String)], post: bool) -> Result<String> {
        let retry = self.retry.clone();
        retry.run(|attempt| {
            self.limiter.wait();
            log::debug!(
                "Last.fm {} (attempt {})",
                params
                    .iter()
                    .find(|(k, _)| *k == "method")
                    .map_or("?", |(_, v)| v.as_str()),
                attempt
            );
            let request = if post {
                self.http.post(&self.api_root).form(params)
            } else {
                self.http.get(&self.api_root).query(params)
            };
            let response = request.send()?;
            let status = response.status();
            let body = response.text()?;
            check_api_error(&body)?;
            if !status.is_success() {
                return Err(SyncError::Http {
                    status: status.as_u16(),
                });
            }
            Ok(body)
        })
    }
}

impl TrackSource for LastFmClient {
    /// Pages through `user.getRecentTracks` until `limit` scrobbles are
    /// collected or the window has no more pages.
    fn recent_tracks(&mut self, from: i64, to: i64, limit: u32) -> Result<Vec<PlayEvent>> {
        let per_page = limit.clamp(1, MAX_PAGE_SIZE);
        let mut events = Vec::new();
        let mut page = 1;

        loop {
            let result = self.recent_tracks_page(from, to, page, per_page)?;
            let got = result.events.len();
            events.extend(result.events);
            if got == 0 || events.len() >= limit as usize || page >= result.total_pages {
                break;
            }
            page += 1;
        }

        events.truncate(limit as usize);
        Ok(events)
    }
}
