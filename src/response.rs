//! Response assembly: body plus caching and canonical headers.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use log::warn;

use crate::cache_probe::ImageStream;
use crate::canonical::CanonicalInfo;
use crate::ImageFormat;

/// Cache policy for bytes streamed from the external image cache.
pub const CACHE_HIT_POLICY: &str = "public, max-age=31536000, stale-while-revalidate";
/// Cache policy for freshly rendered bytes.
pub const FRESH_RENDER_POLICY: &str = "max-age=600, public, stale-while-revalidate";

pub static CONTENT_DPR: HeaderName = HeaderName::from_static("content-dpr");

/// Where the image bytes come from
pub enum ImageBody {
    Cached(ImageStream),
    Rendered(Vec<u8>),
}

impl ImageBody {
    fn cache_policy(&self) -> &'static str {
        match self {
            ImageBody::Cached(_) => CACHE_HIT_POLICY,
            ImageBody::Rendered(_) => FRESH_RENDER_POLICY,
        }
    }
}

/// A successful image response, ready to send
pub struct ImageResponse {
    pub headers: HeaderMap,
    pub body: ImageBody,
}

/// Build the response for an image. Never fails; a canonical URL that is
/// not a valid header value is dropped with a warning.
pub fn assemble(
    body: ImageBody,
    format: ImageFormat,
    scale: f64,
    canonical: &CanonicalInfo,
) -> ImageResponse {
    let mut headers = HeaderMap::new();
    cors(&mut headers);
    if scale != 1.0 {
        if let Ok(value) = HeaderValue::from_str(&format!("{:.1}", scale)) {
            headers.insert(CONTENT_DPR.clone(), value);
        }
    }
    if let Some(url) = &canonical.canonical_url {
        match HeaderValue::from_str(&format!("<{}>; rel=\"canonical\"", url)) {
            Ok(value) => {
                headers.insert(header::LINK, value);
            }
            Err(_) => warn!("canonical url {:?} is not a valid header value", url),
        }
    }
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(format.mime()));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(body.cache_policy()),
    );
    ImageResponse { headers, body }
}

/// Cross-origin access for every response on the image route.
pub fn cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
}

impl IntoResponse for ImageResponse {
    fn into_response(self) -> Response {
        let body = match self.body {
            ImageBody::Cached(stream) => Body::from_stream(stream),
            ImageBody::Rendered(bytes) => Body::from(bytes),
        };
        (StatusCode::OK, self.headers, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(url: Option<&str>) -> CanonicalInfo {
        CanonicalInfo {
            canonical_url: url.map(str::to_string),
            ..CanonicalInfo::default()
        }
    }

    #[test]
    fn fresh_render_headers() {
        let res = assemble(
            ImageBody::Rendered(b"img".to_vec()),
            ImageFormat::Jpeg,
            2.0,
            &canonical(Some("https://twitter.com/jack/status/20")),
        );
        let h = &res.headers;
        assert_eq!(h[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(h[header::CACHE_CONTROL], FRESH_RENDER_POLICY);
        assert_eq!(h[&CONTENT_DPR], "2.0");
        assert_eq!(h[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            h[header::LINK],
            "<https://twitter.com/jack/status/20>; rel=\"canonical\""
        );
    }

    #[test]
    fn unit_scale_has_no_dpr() {
        let res = assemble(
            ImageBody::Rendered(Vec::new()),
            ImageFormat::Png,
            1.0,
            &canonical(None),
        );
        assert!(!res.headers.contains_key(&CONTENT_DPR));
        assert!(!res.headers.contains_key(header::LINK));
        assert_eq!(res.headers[header::CONTENT_TYPE], "image/png");
    }

    #[test]
    fn fractional_scale_keeps_one_decimal() {
        let res = assemble(
            ImageBody::Rendered(Vec::new()),
            ImageFormat::Png,
            1.5,
            &canonical(None),
        );
        assert_eq!(res.headers[&CONTENT_DPR], "1.5");
    }

    #[test]
    fn cached_bytes_get_the_long_policy() {
        let stream: ImageStream = Box::pin(futures::stream::empty());
        let res = assemble(
            ImageBody::Cached(stream),
            ImageFormat::Png,
            2.0,
            &canonical(None),
        );
        assert_eq!(res.headers[header::CACHE_CONTROL], CACHE_HIT_POLICY);
    }
}
