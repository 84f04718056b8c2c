//! Texture-pack download gate.
//!
//! The session never talks HTTP itself. It issues conditional requests through
//! [`HttpRequests`], under a fixed request key, and polls for the result from
//! the coarse tick. The game provides both the HTTP client and the
//! [`TextureCache`] through [`GameHost::resources`](crate::GameHost::resources).

use tracing::{debug, info, warn};

/// Key under which the texture-pack request is tracked.
pub const TEXTURE_PACK_REQUEST_KEY: &str = "texturePack";

/// A GET carrying the validators of a previously cached copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalGet {
    /// Resource to fetch.
    pub url: String,
    /// `If-None-Match` value.
    pub etag: Option<String>,
    /// `If-Modified-Since` value.
    pub last_modified: Option<String>,
}

/// A finished request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResult {
    /// Resource that was fetched.
    pub url: String,
    /// Transport-level failure code, if the request never got a response.
    pub transport_error: Option<i32>,
    /// HTTP status (0 if there was no response).
    pub status: u16,
    /// Response body.
    pub data: Vec<u8>,
    /// `ETag` of the response.
    pub etag: Option<String>,
    /// `Last-Modified` of the response.
    pub last_modified: Option<String>,
}

impl FetchResult {
    /// New content was downloaded.
    pub fn is_success(&self) -> bool {
        self.transport_error.is_none() && self.status == 200 && !self.data.is_empty()
    }
}

/// Cache validators of a stored texture pack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidators {
    /// Stored `ETag`.
    pub etag: Option<String>,
    /// Stored `Last-Modified`.
    pub last_modified: Option<String>,
}

/// Asynchronous HTTP client.
pub trait HttpRequests {
    /// Start a request tracked under `key`, replacing any earlier one with that key.
    fn async_get(&mut self, key: &str, request: ConditionalGet);

    /// Take the finished request for `key`, if there is one.
    fn take_completed(&mut self, key: &str) -> Option<FetchResult>;
}

/// On-disk texture-pack cache and the player's accept/deny choices.
pub trait TextureCache {
    /// The player allowed downloads from `url`.
    fn has_accepted(&self, url: &str) -> bool;

    /// The player refused downloads from `url`.
    fn has_denied(&self, url: &str) -> bool;

    /// Validators of the cached copy of `url`, if one exists.
    fn validators(&self, url: &str) -> Option<CacheValidators>;

    /// Apply whatever is already cached for `url`.
    fn extract_cached(&mut self, url: &str);

    /// Store and apply freshly downloaded content.
    fn install(&mut self, result: &FetchResult);
}

/// The HTTP client and texture cache, borrowed together from the host.
pub struct Resources<'a> {
    /// HTTP client.
    pub http: &'a mut dyn HttpRequests,
    /// Texture-pack cache.
    pub cache: &'a mut dyn TextureCache,
}

/// What [`TexturePackGate::request`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The player has not decided yet; show the confirmation prompt.
    NeedsConfirmation,
    /// The download was started.
    Fetching,
    /// The player denied this url.
    Denied,
}

/// What [`TexturePackGate::poll`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No request has finished.
    Idle,
    /// New content was installed.
    Installed,
    /// The server answered 200 without content, or 304.
    Unchanged,
    /// The request failed before a response arrived.
    TransportError(i32),
    /// The server answered with an error status.
    HttpStatus(u16),
}

impl PollOutcome {
    /// Chat line to show the player, if any.
    pub fn chat_message(&self) -> Option<String> {
        match self {
            Self::TransportError(code) => Some(format!(
                "Error {code} when trying to download texture pack"
            )),
            Self::HttpStatus(status) => Some(format!(
                "{status} error when trying to download texture pack"
            )),
            Self::Idle | Self::Installed | Self::Unchanged => None,
        }
    }
}

/// Starts conditional texture-pack downloads and collects their results.
#[derive(Debug, Default)]
pub struct TexturePackGate {
    in_flight: Option<String>,
}

impl TexturePackGate {
    /// Create a gate with nothing in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Url of the download most recently started, until its result is polled.
    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    /// The server announced a texture pack. Download it if the player already
    /// accepted or denied the url once, otherwise ask first.
    pub fn request(&mut self, url: &str, resources: &mut Resources<'_>) -> RequestOutcome {
        let cache = &*resources.cache;
        if !cache.has_accepted(url) && !cache.has_denied(url) {
            debug!(url, "texture pack needs confirmation");
            return RequestOutcome::NeedsConfirmation;
        }
        self.download(url, resources)
    }

    /// Start a conditional download of `url` and show the cached copy meanwhile.
    pub fn download(&mut self, url: &str, resources: &mut Resources<'_>) -> RequestOutcome {
        if resources.cache.has_denied(url) {
            debug!(url, "texture pack denied");
            return RequestOutcome::Denied;
        }

        let validators = resources.cache.validators(url).unwrap_or_default();
        resources.cache.extract_cached(url);
        resources.http.async_get(
            TEXTURE_PACK_REQUEST_KEY,
            ConditionalGet {
                url: url.to_string(),
                etag: validators.etag,
                last_modified: validators.last_modified,
            },
        );

        info!(url, "texture pack download started");
        self.in_flight = Some(url.to_string());
        RequestOutcome::Fetching
    }

    /// Check for a finished download and install it.
    pub fn poll(&mut self, resources: &mut Resources<'_>) -> PollOutcome {
        let Some(result) = resources.http.take_completed(TEXTURE_PACK_REQUEST_KEY) else {
            return PollOutcome::Idle;
        };
        self.in_flight = None;

        if result.is_success() {
            info!(url = %result.url, bytes = result.data.len(), "texture pack downloaded");
            resources.cache.install(&result);
            return PollOutcome::Installed;
        }
        if let Some(code) = result.transport_error {
            warn!(url = %result.url, code, "texture pack download failed");
            return PollOutcome::TransportError(code);
        }
        match result.status {
            200 | 304 => PollOutcome::Unchanged,
            status => {
                warn!(url = %result.url, status, "texture pack download returned error status");
                PollOutcome::HttpStatus(status)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{FakeCache, FakeHttp};
    use super::*;

    const URL: &str = "http://example.com/pack.zip";

    fn complete(http: &mut FakeHttp, result: FetchResult) {
        http.completed
            .insert(TEXTURE_PACK_REQUEST_KEY.to_string(), result);
    }

    #[test]
    fn test_unknown_url_needs_confirmation() {
        let (mut http, mut cache) = (FakeHttp::default(), FakeCache::default());
        let mut gate = TexturePackGate::new();
        let mut res = Resources {
            http: &mut http,
            cache: &mut cache,
        };
        assert_eq!(gate.request(URL, &mut res), RequestOutcome::NeedsConfirmation);
        assert!(http.issued.is_empty());
    }

    #[test]
    fn test_accepted_url_fetches_with_validators() {
        let mut http = FakeHttp::default();
        let mut cache = FakeCache {
            accepted: vec![URL.to_string()],
            ..Default::default()
        };
        cache.stored.insert(
            URL.to_string(),
            CacheValidators {
                etag: Some("\"abc\"".to_string()),
                last_modified: None,
            },
        );
        let mut gate = TexturePackGate::new();
        let mut res = Resources {
            http: &mut http,
            cache: &mut cache,
        };

        assert_eq!(gate.request(URL, &mut res), RequestOutcome::Fetching);
        assert_eq!(gate.in_flight(), Some(URL));
        assert_eq!(cache.extracted, vec![URL.to_string()]);
        let (key, get) = &http.issued[0];
        assert_eq!(key, TEXTURE_PACK_REQUEST_KEY);
        assert_eq!(get.etag.as_deref(), Some("\"abc\""));
    }

    #[test]
    fn test_denied_url_never_fetches() {
        let mut http = FakeHttp::default();
        let mut cache = FakeCache {
            denied: vec![URL.to_string()],
            ..Default::default()
        };
        let mut gate = TexturePackGate::new();
        let mut res = Resources {
            http: &mut http,
            cache: &mut cache,
        };
        assert_eq!(gate.request(URL, &mut res), RequestOutcome::Denied);
        assert!(http.issued.is_empty());
    }

    #[test]
    fn test_poll_without_request_is_noop() {
        let (mut http, mut cache) = (FakeHttp::default(), FakeCache::default());
        let mut gate = TexturePackGate::new();
        let mut res = Resources {
            http: &mut http,
            cache: &mut cache,
        };
        for _ in 0..3 {
            let outcome = gate.poll(&mut res);
            assert_eq!(outcome, PollOutcome::Idle);
            assert!(outcome.chat_message().is_none());
        }
        assert!(cache.installed.is_empty());
    }

    #[test]
    fn test_poll_installs_success() {
        let (mut http, mut cache) = (FakeHttp::default(), FakeCache::default());
        complete(
            &mut http,
            FetchResult {
                url: URL.to_string(),
                status: 200,
                data: vec![1, 2, 3],
                ..Default::default()
            },
        );
        let mut gate = TexturePackGate::new();
        let mut res = Resources {
            http: &mut http,
            cache: &mut cache,
        };
        assert_eq!(gate.poll(&mut res), PollOutcome::Installed);
        assert_eq!(gate.poll(&mut res), PollOutcome::Idle);
        assert_eq!(cache.installed, vec![URL.to_string()]);
    }

    #[test]
    fn test_poll_failures_produce_messages() {
        let (mut http, mut cache) = (FakeHttp::default(), FakeCache::default());
        let mut gate = TexturePackGate::new();

        complete(
            &mut http,
            FetchResult {
                transport_error: Some(7),
                ..Default::default()
            },
        );
        let outcome = gate.poll(&mut Resources {
            http: &mut http,
            cache: &mut cache,
        });
        assert_eq!(
            outcome.chat_message().as_deref(),
            Some("Error 7 when trying to download texture pack")
        );

        complete(
            &mut http,
            FetchResult {
                status: 404,
                ..Default::default()
            },
        );
        let outcome = gate.poll(&mut Resources {
            http: &mut http,
            cache: &mut cache,
        });
        assert_eq!(
            outcome.chat_message().as_deref(),
            Some("404 error when trying to download texture pack")
        );
    }

    #[test]
    fn test_not_modified_is_silent() {
        let (mut http, mut cache) = (FakeHttp::default(), FakeCache::default());
        complete(
            &mut http,
            FetchResult {
                status: 304,
                ..Default::default()
            },
        );
        let mut gate = TexturePackGate::new();
        let outcome = gate.poll(&mut Resources {
            http: &mut http,
            cache: &mut cache,
        });
        assert_eq!(outcome, PollOutcome::Unchanged);
        assert!(outcome.chat_message().is_none());
        assert!(cache.installed.is_empty());
    }
}
