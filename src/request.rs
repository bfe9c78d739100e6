//! Request validation: raw path and query string into a typed [`RenderRequest`].
//!
//! Every parameter is checked on its own and the first failure aborts with
//! [`Error::InvalidParameter`] naming the parameter. Nothing here does I/O.

use crate::timezone::{self, TimezoneEntry};
use crate::{Error, ImageFormat, Result};

pub const DEFAULT_LANGUAGE: &str = "ja";
pub const DEFAULT_TIMEZONE_OFFSET: i32 = 9;
pub const DEFAULT_THEME: &str = "light";
pub const DEFAULT_SCALE: f64 = 2.0;
pub const MIN_SCALE: f64 = 1.0;
pub const MAX_SCALE: f64 = 5.0;

/// Optional query parameters, in the order they appear in cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    HideCard,
    HideThread,
    Scale,
    Lang,
    Theme,
    Tz,
    SkipSensitiveWarning,
}

impl Param {
    pub const ALL: [Param; 7] = [
        Param::HideCard,
        Param::HideThread,
        Param::Scale,
        Param::Lang,
        Param::Theme,
        Param::Tz,
        Param::SkipSensitiveWarning,
    ];

    /// Query-string name of the parameter.
    pub fn key(self) -> &'static str {
        match self {
            Param::HideCard => "hideCard",
            Param::HideThread => "hideThread",
            Param::Scale => "scale",
            Param::Lang => "lang",
            Param::Theme => "theme",
            Param::Tz => "tz",
            Param::SkipSensitiveWarning => "t2iSkipSensitiveWarning",
        }
    }
}

/// Decoded query string. Lookups return the first occurrence of a key.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn parse(query: Option<&str>) -> Self {
        let pairs = query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        Self { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// What the path names: a post id and an output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub content_id: u64,
    pub format: ImageFormat,
    /// Extension exactly as requested (`png` or `jpg`)
    pub extension: &'static str,
}

/// A path that has the right shape but whose id is not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub id: String,
    pub extension: &'static str,
}

/// Match a path segment of the form `{digits}.{png|jpg}`.
///
/// Returns `None` when the shape is wrong. A well-shaped id that is zero or
/// does not fit in a `u64` is reported by [`RenderRequest::validate`].
pub fn parse_path(path: &str) -> Option<PathMatch> {
    let path = path.trim_start_matches('/');
    let (id, ext) = path.split_once('.')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let extension = match ext {
        "png" => "png",
        "jpg" => "jpg",
        _ => return None,
    };
    Some(PathMatch {
        id: id.to_string(),
        extension,
    })
}

/// A fully validated render request.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub target: RenderTarget,
    pub language: String,
    pub timezone: TimezoneEntry,
    pub theme: String,
    pub scale: f64,
    pub hide_card: bool,
    pub hide_thread: bool,
    pub skip_sensitive_warning: bool,
    /// Optional parameters the caller actually supplied
    pub explicit: Vec<Param>,
}

impl RenderRequest {
    /// Validate a matched path and its query parameters.
    pub fn validate(path: PathMatch, query: &QueryParams) -> Result<Self> {
        let PathMatch { id, extension } = path;
        let format =
            ImageFormat::from_extension(extension).ok_or(Error::InvalidParameter("format"))?;
        let content_id = id
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(Error::InvalidParameter("id"))?;

        let language = validate_language(query.get(Param::Lang.key()))?;
        let timezone = validate_timezone(query.get(Param::Tz.key()))?;
        let theme = validate_theme(query.get(Param::Theme.key()))?;
        let scale = validate_scale(query.get(Param::Scale.key()))?;
        let hide_card = flag(query.get(Param::HideCard.key()));
        let hide_thread = flag(query.get(Param::HideThread.key()));
        let skip_sensitive_warning = flag(query.get(Param::SkipSensitiveWarning.key()));

        let explicit = Param::ALL
            .into_iter()
            .filter(|p| query.has(p.key()))
            .collect();

        Ok(Self {
            target: RenderTarget {
                content_id,
                format,
                extension,
            },
            language,
            timezone,
            theme,
            scale,
            hide_card,
            hide_thread,
            skip_sensitive_warning,
            explicit,
        })
    }

    pub fn content_id(&self) -> u64 {
        self.target.content_id
    }

    pub fn format(&self) -> ImageFormat {
        self.target.format
    }

    /// Resolved value of an optional parameter, as it appears in a query string.
    pub fn param_value(&self, param: Param) -> String {
        match param {
            Param::HideCard => self.hide_card.to_string(),
            Param::HideThread => self.hide_thread.to_string(),
            Param::Scale => self.scale.to_string(),
            Param::Lang => self.language.clone(),
            Param::Theme => self.theme.clone(),
            Param::Tz => self.timezone.offset.to_string(),
            Param::SkipSensitiveWarning => self.skip_sensitive_warning.to_string(),
        }
    }
}

// Primary subtag of 2-3 letters, optionally followed by one region or
// script subtag (`ja`, `en-gb`, `zh-Hant`).
fn validate_language(raw: Option<&str>) -> Result<String> {
    let Some(lang) = raw else {
        return Ok(DEFAULT_LANGUAGE.to_string());
    };
    let (primary, subtag) = match lang.split_once('-') {
        Some((primary, subtag)) => (primary, Some(subtag)),
        None => (lang, None),
    };
    let primary_ok = (2..=3).contains(&primary.len())
        && primary.bytes().all(|b| b.is_ascii_alphabetic());
    let subtag_ok = subtag.map_or(true, |s| {
        (2..=8).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_alphanumeric())
    });
    if primary_ok && subtag_ok {
        Ok(lang.to_string())
    } else {
        Err(Error::InvalidParameter("lang"))
    }
}

fn validate_timezone(raw: Option<&str>) -> Result<TimezoneEntry> {
    let offset = match raw {
        None => DEFAULT_TIMEZONE_OFFSET,
        Some(s) => s
            .trim()
            .parse::<i32>()
            .map_err(|_| Error::InvalidParameter("tz"))?,
    };
    timezone::lookup(offset).ok_or(Error::InvalidParameter("tz"))
}

fn validate_theme(raw: Option<&str>) -> Result<String> {
    match raw {
        None => Ok(DEFAULT_THEME.to_string()),
        Some(theme) if !theme.is_empty() && theme.bytes().all(|b| b.is_ascii_lowercase()) => {
            Ok(theme.to_string())
        }
        Some(_) => Err(Error::InvalidParameter("theme")),
    }
}

fn validate_scale(raw: Option<&str>) -> Result<f64> {
    let scale = match raw {
        None => DEFAULT_SCALE,
        Some(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
    };
    // NaN fails the range check too
    if (MIN_SCALE..=MAX_SCALE).contains(&scale) {
        Ok(scale)
    } else {
        Err(Error::InvalidParameter("scale"))
    }
}

fn flag(raw: Option<&str>) -> bool {
    matches!(raw, Some("1") | Some("true"))
}
