use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-phase connection deadlines. A zero duration disables that phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
    pub header: Duration,
    pub max: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
            write: DEFAULT_WRITE_TIMEOUT,
            header: DEFAULT_HEADER_TIMEOUT,
            max: DEFAULT_MAX_TIMEOUT,
        }
    }
}

impl Timeouts {
    /// All phases disabled.
    pub const fn none() -> Self {
        Self {
            connect: Duration::ZERO,
            read: Duration::ZERO,
            write: Duration::ZERO,
            header: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn with_connect(mut self, connect: Duration) -> Self {
        self.connect = connect;
        self
    }

    pub fn with_read(mut self, read: Duration) -> Self {
        self.read = read;
        self
    }

    pub fn with_write(mut self, write: Duration) -> Self {
        self.write = write;
        self
    }

    pub fn with_header(mut self, header: Duration) -> Self {
        self.header = header;
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    pub(crate) fn connect_limit(&self) -> Option<Duration> {
        enabled(self.connect)
    }

    pub(crate) fn read_limit(&self) -> Option<Duration> {
        enabled(self.read)
    }

    pub(crate) fn write_limit(&self) -> Option<Duration> {
        enabled(self.write)
    }

    pub(crate) fn header_limit(&self) -> Option<Duration> {
        enabled(self.header)
    }

    pub(crate) fn max_limit(&self) -> Option<Duration> {
        enabled(self.max)
    }
}

fn enabled(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ProxyConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Transport defaults shared by every request a [`crate::Client`] sends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub timeouts: Timeouts,
    pub proxy: Option<ProxyConfig>,
    /// Keep idle connections pooled for later requests to the same host.
    pub reuse_connections: bool,
    pub insecure_skip_verify: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            proxy: None,
            reuse_connections: false,
            insecure_skip_verify: true,
        }
    }
}

impl Config {
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_reuse_connections(mut self, reuse_connections: bool) -> Self {
        self.reuse_connections = reuse_connections;
        self
    }

    pub fn with_insecure_skip_verify(mut self, insecure_skip_verify: bool) -> Self {
        self.insecure_skip_verify = insecure_skip_verify;
        self
    }
}
