//! Typed configuration of [`create_server`](crate::create_server).
//!
//! Every option has a documented default and is merged field by field:
//!
//! | Option        | Default                             |
//! |---------------|-------------------------------------|
//! | `certificate` | [`CertificateSetting::Disabled`]    |
//! | `body_parser` | enabled, limit of [`DEFAULT_BODY_LIMIT`] bytes, strict JSON |
//! | `auto_listen` | `true`                              |
//! | `listen`      | `localhost`, ephemeral ports        |

use crate::certificate::{CertificateMaterial, CertificateOptions};

/// Default request body limit: 1 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Default hostname the servers bind to.
pub const DEFAULT_HOSTNAME: &str = "localhost";

/// Options of [`create_server`](crate::create_server).
///
/// # Example
///
/// ```rust
/// use fixture_server::{BodyParserOptions, ServerOptions};
///
/// let options = ServerOptions::default()
///     .with_certificate("foo.bar")
///     .with_body_parser(BodyParserOptions::default().with_limit(16))
///     .with_auto_listen(false);
///
/// assert!(!options.auto_listen);
/// ```
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Whether an HTTPS server is created, and with which certificate.
    pub certificate: CertificateSetting,
    /// Automatic request body parsing.
    pub body_parser: BodyParserSetting,
    /// Whether the factory starts listening before returning.
    pub auto_listen: bool,
    /// Where the servers bind.
    pub listen: ListenOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            certificate: CertificateSetting::default(),
            body_parser: BodyParserSetting::default(),
            auto_listen: true,
            listen: ListenOptions::default(),
        }
    }
}

impl ServerOptions {
    /// Set the certificate setting.
    ///
    /// Accepts `bool`, a common name (`&str` or `String`),
    /// [`CertificateOptions`] or ready made [`CertificateMaterial`].
    #[must_use]
    pub fn with_certificate(mut self, certificate: impl Into<CertificateSetting>) -> Self {
        self.certificate = certificate.into();
        self
    }

    /// Set the body parser setting, from a `bool` or [`BodyParserOptions`].
    #[must_use]
    pub fn with_body_parser(mut self, body_parser: impl Into<BodyParserSetting>) -> Self {
        self.body_parser = body_parser.into();
        self
    }

    /// Set whether the factory starts listening.
    #[must_use]
    pub fn with_auto_listen(mut self, auto_listen: bool) -> Self {
        self.auto_listen = auto_listen;
        self
    }

    /// Set where the servers bind.
    #[must_use]
    pub fn with_listen(mut self, listen: ListenOptions) -> Self {
        self.listen = listen;
        self
    }
}

/// Certificate of the HTTPS server.
#[derive(Debug, Clone, Default)]
pub enum CertificateSetting {
    /// No HTTPS server.
    #[default]
    Disabled,
    /// Issue a certificate with the given options.
    Generate(CertificateOptions),
    /// Use the given material as is.
    Provided(CertificateMaterial),
}

impl From<bool> for CertificateSetting {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::Generate(CertificateOptions::default())
        } else {
            Self::Disabled
        }
    }
}

impl From<&str> for CertificateSetting {
    fn from(common_name: &str) -> Self {
        Self::Generate(CertificateOptions::default().with_common_name(common_name))
    }
}

impl From<String> for CertificateSetting {
    fn from(common_name: String) -> Self {
        Self::Generate(CertificateOptions::default().with_common_name(common_name))
    }
}

impl From<CertificateOptions> for CertificateSetting {
    fn from(options: CertificateOptions) -> Self {
        Self::Generate(options)
    }
}

impl From<CertificateMaterial> for CertificateSetting {
    fn from(material: CertificateMaterial) -> Self {
        Self::Provided(material)
    }
}

/// Automatic request body parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyParserSetting {
    /// Bodies are left untouched, handlers see no parsed body.
    Disabled,
    /// Bodies are parsed with the given overrides.
    Enabled(BodyParserOptions),
}

impl Default for BodyParserSetting {
    fn default() -> Self {
        Self::Enabled(BodyParserOptions::default())
    }
}

impl BodyParserSetting {
    /// The effective configuration, `None` when disabled.
    pub(crate) fn resolve(self) -> Option<BodyParserConfig> {
        match self {
            Self::Disabled => None,
            Self::Enabled(options) => Some(options.resolve()),
        }
    }
}

impl From<bool> for BodyParserSetting {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::default()
        } else {
            Self::Disabled
        }
    }
}

impl From<BodyParserOptions> for BodyParserSetting {
    fn from(options: BodyParserOptions) -> Self {
        Self::Enabled(options)
    }
}

/// Overrides of the body parser defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyParserOptions {
    /// Maximum body size in bytes, [`DEFAULT_BODY_LIMIT`] when unset.
    pub limit: Option<usize>,
    /// Only accept objects and arrays as JSON documents. Defaults to `true`.
    pub strict: Option<bool>,
}

impl BodyParserOptions {
    /// Set the maximum body size, in bytes.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set whether JSON scalars are rejected.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    fn resolve(self) -> BodyParserConfig {
        BodyParserConfig {
            limit: self.limit.unwrap_or(DEFAULT_BODY_LIMIT),
            strict: self.strict.unwrap_or(true),
        }
    }
}

/// Body parser options with every default applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BodyParserConfig {
    pub(crate) limit: usize,
    pub(crate) strict: bool,
}

/// Where the servers bind.
///
/// A port of `None` (or `Some(0)`) asks the OS for a fresh ephemeral port on
/// every listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenOptions {
    /// The hostname or IP address to bind.
    pub hostname: String,
    /// Port of the HTTP server.
    pub port: Option<u16>,
    /// Port of the HTTPS server.
    pub ssl_port: Option<u16>,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_owned(),
            port: None,
            ssl_port: None,
        }
    }
}

impl ListenOptions {
    /// Set the hostname to bind.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Pin the HTTP port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Pin the HTTPS port.
    #[must_use]
    pub fn with_ssl_port(mut self, ssl_port: u16) -> Self {
        self.ssl_port = Some(ssl_port);
        self
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn should_use_documented_defaults() {
        let options = ServerOptions::default();

        assert!(matches!(options.certificate, CertificateSetting::Disabled));
        assert_eq!(
            options.body_parser.resolve(),
            Some(BodyParserConfig {
                limit: DEFAULT_BODY_LIMIT,
                strict: true,
            })
        );
        assert!(options.auto_listen);
        assert_eq!(options.listen.hostname, "localhost");
        assert_eq!(options.listen.port, None);
        assert_eq!(options.listen.ssl_port, None);
    }

    #[rstest]
    #[case::disabled(false, None)]
    #[case::enabled(true, Some(DEFAULT_BODY_LIMIT))]
    fn should_convert_body_parser_flag(#[case] flag: bool, #[case] limit: Option<usize>) {
        let setting = BodyParserSetting::from(flag);

        assert_eq!(setting.resolve().map(|config| config.limit), limit);
    }

    #[test]
    fn should_merge_body_parser_overrides() {
        let setting = BodyParserSetting::from(BodyParserOptions::default().with_limit(10));

        let config = setting.resolve().expect("enabled");

        assert_eq!(config.limit, 10);
        assert!(config.strict);
    }

    #[test]
    fn should_convert_certificate_shapes() {
        assert!(matches!(
            CertificateSetting::from(false),
            CertificateSetting::Disabled
        ));
        assert!(matches!(
            CertificateSetting::from(true),
            CertificateSetting::Generate(CertificateOptions {
                days: None,
                common_name: None,
            })
        ));

        let CertificateSetting::Generate(options) = CertificateSetting::from("foo.bar") else {
            panic!("expected a generated certificate");
        };
        assert_eq!(options.common_name.as_deref(), Some("foo.bar"));
    }
}
