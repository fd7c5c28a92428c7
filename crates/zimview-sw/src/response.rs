//! Response synthesis.
//!
//! Archive content has no HTTP metadata of its own; these helpers give it the
//! headers a page's resource loader expects from a server.

use bytes::Bytes;
use http::header::{
    ACCEPT_RANGES, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
    LOCATION,
};
use http::{HeaderValue, Response, StatusCode};
use url::Url;
use zimview_cache::CachedResponse;
use zimview_core::{paths, ImageDisplay};

/// Placeholder for fully suppressed images.
pub const EMPTY_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg"/>"#;

/// Placeholder for images shown on demand.
pub const MANUAL_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1"><rect width="1" height="1" style="fill:lightblue"/></svg>"#;

fn mime_header(mime_type: &str) -> HeaderValue {
    HeaderValue::from_str(mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static(mime::APPLICATION_OCTET_STREAM.as_ref()))
}

/// 200 response for extracted bytes.
///
/// Audio and video always get the whole body, announced as a full range,
/// because some media pipelines refuse to seek without range headers.
pub fn content_response(body: Bytes, mime_type: &str) -> Response<Bytes> {
    let len = body.len();
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, mime_header(mime_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

    if paths::is_media_mime(mime_type) {
        let range = if len == 0 {
            "bytes */0".to_string()
        } else {
            format!("bytes 0-{}/{}", len - 1, len)
        };
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        if let Ok(value) = HeaderValue::from_str(&range) {
            headers.insert(CONTENT_RANGE, value);
        }
    }
    response
}

/// Rebuild a response from the persistent tier.
pub fn cached_response(entry: CachedResponse) -> Response<Bytes> {
    let mut response = content_response(entry.body, &entry.mime_type);
    *response.status_mut() = StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK);
    response
}

/// HTTP redirect to another archive URL.
pub fn redirect_response(location: &Url) -> Response<Bytes> {
    let mut response = empty_response(StatusCode::FOUND);
    if let Ok(value) = HeaderValue::from_str(location.as_str()) {
        response.headers_mut().insert(LOCATION, value);
    }
    response
}

/// Empty-bodied response, used for every failure.
pub fn empty_response(status: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(0usize));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

/// Synthetic image standing in for a suppressed one; `None` when images are shown.
pub fn placeholder_response(display: ImageDisplay) -> Option<Response<Bytes>> {
    let svg = match display {
        ImageDisplay::All => return None,
        ImageDisplay::Manual => MANUAL_SVG,
        ImageDisplay::None => EMPTY_SVG,
    };
    Some(content_response(
        Bytes::from_static(svg.as_bytes()),
        mime::IMAGE_SVG.as_ref(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header<'a>(response: &'a Response<Bytes>, name: http::header::HeaderName) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[test]
    fn test_content_headers() {
        let response = content_response(Bytes::from_static(b"<html/>"), "text/html");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, CONTENT_TYPE), Some("text/html"));
        assert_eq!(header(&response, CONTENT_LENGTH), Some("7"));
        assert_eq!(header(&response, ACCESS_CONTROL_ALLOW_ORIGIN), Some("*"));
        assert!(response.headers().get(ACCEPT_RANGES).is_none());
    }

    #[test]
    fn test_media_gets_full_range() {
        let response = content_response(Bytes::from(vec![0u8; 1000]), "video/webm");
        assert_eq!(header(&response, ACCEPT_RANGES), Some("bytes"));
        assert_eq!(header(&response, CONTENT_RANGE), Some("bytes 0-999/1000"));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_invalid_mime_falls_back() {
        let response = content_response(Bytes::new(), "text/html\n");
        assert_eq!(
            header(&response, CONTENT_TYPE),
            Some("application/octet-stream")
        );
    }

    #[test]
    fn test_redirect() {
        let location = Url::parse("https://viewer.local/www/wiki.zim/A/Python").unwrap();
        let response = redirect_response(&location);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(header(&response, LOCATION), Some(location.as_str()));
    }

    #[test]
    fn test_placeholders() {
        assert!(placeholder_response(ImageDisplay::All).is_none());

        let empty = placeholder_response(ImageDisplay::None).unwrap();
        assert_eq!(header(&empty, CONTENT_TYPE), Some("image/svg+xml"));
        assert_eq!(empty.body(), EMPTY_SVG.as_bytes());

        let manual = placeholder_response(ImageDisplay::Manual).unwrap();
        assert!(std::str::from_utf8(manual.body()).unwrap().contains("lightblue"));
    }

    #[test]
    fn test_cached_keeps_status() {
        let entry = CachedResponse {
            url: "https://viewer.local/www/css/app.css".into(),
            status: 200,
            mime_type: "text/css".into(),
            body: Bytes::from_static(b"a{}"),
            stored_at: 0,
        };
        let response = cached_response(entry);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, CONTENT_LENGTH), Some("3"));
    }
}
