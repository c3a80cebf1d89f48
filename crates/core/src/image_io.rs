//! Reading source images from disk or HTTP and writing results.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use tracing::debug;
use url::Url;

const FETCH_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const FETCH_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// `Some(url)` when `source` is an http(s) URL rather than a local path.
pub fn parse_remote_source(source: &str) -> Option<Url> {
    let parsed = Url::parse(source).ok()?;
    matches!(parsed.scheme(), "http" | "https").then_some(parsed)
}

fn redacted_url_for_display(url: &Url) -> String {
    let mut redacted = url.clone();
    if redacted.query().is_some() {
        redacted.set_query(Some("<redacted>"));
    }
    crate::logging::redact_sensitive_text(redacted.as_str())
}

fn fetch_bytes(url: &Url) -> Result<Vec<u8>> {
    let shown = redacted_url_for_display(url);
    debug!(url = %shown, "fetching remote image");

    let client = reqwest::blocking::Client::builder()
        .connect_timeout(FETCH_CONNECT_TIMEOUT)
        .timeout(FETCH_REQUEST_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let response = client
        .get(url.as_str())
        .send()
        .with_context(|| format!("failed to fetch {shown}"))?;
    if !response.status().is_success() {
        bail!(
            "image request returned HTTP {} for {}",
            response.status().as_u16(),
            shown
        );
    }

    let bytes = response
        .bytes()
        .with_context(|| format!("failed while reading HTTP body from {shown}"))?;
    Ok(bytes.to_vec())
}

/// Load an RGB image from a local path or an http(s) URL.
pub fn load_image(source: &str) -> Result<RgbImage> {
    let image = match parse_remote_source(source) {
        Some(url) => {
            let bytes = fetch_bytes(&url)?;
            image::load_from_memory(&bytes).with_context(|| {
                format!("failed to decode image from {}", redacted_url_for_display(&url))
            })?
        }
        None => image::open(source).with_context(|| format!("failed to load image: {source}"))?,
    };
    Ok(image.to_rgb8())
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg"))
        .unwrap_or(false)
}

/// Write `image`, picking the format from the extension. JPEG uses `jpeg_quality`.
pub fn save_image(path: &Path, image: &RgbImage, jpeg_quality: u8) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output dir: {}", parent.display()))?;
    }

    if is_jpeg(path) {
        let file = File::create(path)
            .with_context(|| format!("failed to create output file: {}", path.display()))?;
        let writer = BufWriter::new(file);
        let mut encoder = JpegEncoder::new_with_quality(writer, jpeg_quality.clamp(1, 100));
        encoder
            .encode_image(image)
            .with_context(|| format!("failed to encode JPEG: {}", path.display()))?;
    } else {
        image
            .save(path)
            .with_context(|| format!("failed to save image: {}", path.display()))?;
    }

    debug!(
        path = %path.display(),
        width = image.width(),
        height = image.height(),
        "saved image"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::{Cursor, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn gradient() -> RgbImage {
        RgbImage::from_fn(8, 6, |x, y| Rgb([(x * 30) as u8, (y * 40) as u8, 99]))
    }

    fn consume_request_headers(stream: &mut TcpStream) {
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut buffer = [0u8; 4096];
        let _ = stream.read(&mut buffer);
    }

    fn spawn_single_response_server(
        status: u16,
        reason: &'static str,
        body: Vec<u8>,
    ) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            consume_request_headers(&mut stream);
            let headers = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(headers.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
            let _ = stream.flush();
        });

        (format!("http://{addr}"), handle)
    }

    #[test]
    fn remote_sources_are_http_only() {
        assert!(parse_remote_source("https://example.com/a.png").is_some());
        assert!(parse_remote_source("http://example.com/a.png").is_some());
        assert!(parse_remote_source("ftp://example.com/a.png").is_none());
        assert!(parse_remote_source("/tmp/a.png").is_none());
        assert!(parse_remote_source("C:\\images\\a.png").is_none());
    }

    #[test]
    fn png_save_and_load_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.png");
        save_image(&path, &gradient(), 95).unwrap();

        let loaded = load_image(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded, gradient());
    }

    #[test]
    fn jpeg_quality_changes_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::from_fn(64, 64, |x, y| {
            Rgb([(x * 4) as u8, (y * 4) as u8, ((x ^ y) * 4) as u8])
        });
        let low = dir.path().join("low.jpg");
        let high = dir.path().join("high.JPEG");
        save_image(&low, &image, 10).unwrap();
        save_image(&high, &image, 100).unwrap();

        let low_len = fs::metadata(&low).unwrap().len();
        let high_len = fs::metadata(&high).unwrap().len();
        assert!(low_len < high_len, "{low_len} >= {high_len}");
        assert_eq!(load_image(high.to_str().unwrap()).unwrap().dimensions(), (64, 64));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_image("/nonexistent/source.png").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/source.png"));
    }

    #[test]
    fn loads_image_over_http() {
        let mut body = Vec::new();
        gradient()
            .write_to(&mut Cursor::new(&mut body), image::ImageFormat::Png)
            .unwrap();
        let (base, handle) = spawn_single_response_server(200, "OK", body);

        let loaded = load_image(&format!("{base}/picture.png?token=secret")).unwrap();
        handle.join().unwrap();
        assert_eq!(loaded, gradient());
    }

    #[test]
    fn logged_url_hides_query_and_credentials() {
        let url = Url::parse("https://user:pw@cdn.example.com/a.png?sig=abc").unwrap();
        let shown = redacted_url_for_display(&url);
        assert!(shown.starts_with("https://"), "{shown}");
        assert!(shown.contains("cdn.example.com/a.png?"), "{shown}");
        assert!(!shown.contains("user:pw"), "{shown}");
        assert!(!shown.contains("abc"), "{shown}");
    }

    #[test]
    fn http_error_status_is_reported_without_query() {
        let (base, handle) = spawn_single_response_server(404, "Not Found", Vec::new());

        let err = load_image(&format!("{base}/missing.png?token=secret")).unwrap_err();
        handle.join().unwrap();
        let message = format!("{err:#}");
        assert!(message.contains("HTTP 404"), "{message}");
        assert!(!message.contains("secret"), "{message}");
    }
}
