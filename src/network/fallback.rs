//! Synthesized responses served when neither network nor buckets can answer.

use crate::network::request::NetworkResponse;
use reqwest::StatusCode;

const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>DexTrends - Offline</title>
  <style>
    body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
           display: flex; align-items: center; justify-content: center; min-height: 100vh;
           margin: 0; background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
           color: white; text-align: center; padding: 20px; }
    .offline-content { max-width: 400px; }
    button { background: rgba(255,255,255,0.2); border: 2px solid white; color: white;
             padding: 12px 24px; border-radius: 25px; cursor: pointer; font-size: 16px; }
  </style>
</head>
<body>
  <div class="offline-content">
    <h1>You're Offline</h1>
    <p>Your cached Pokemon data is still available while the connection is down.</p>
    <button onclick="window.location.reload()">Try Again</button>
    <br><br>
    <a href="/" style="color: rgba(255,255,255,0.8); text-decoration: none;">Return to DexTrends</a>
  </div>
</body>
</html>
"#;

const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="280" viewBox="0 0 200 280">
  <rect width="200" height="280" fill="#f3f4f6"/>
  <circle cx="100" cy="140" r="30" fill="#d1d5db"/>
  <text x="100" y="220" text-anchor="middle" font-family="Arial" font-size="12" fill="#6b7280">Image unavailable</text>
</svg>
"##;

/// Offline fallback document for navigations
pub fn offline_document() -> NetworkResponse {
    NetworkResponse::with_content_type(StatusCode::OK, "text/html; charset=utf-8", OFFLINE_HTML)
        .no_cache()
}

/// Placeholder served for images that cannot be loaded
pub fn placeholder_image() -> NetworkResponse {
    NetworkResponse::with_content_type(StatusCode::OK, "image/svg+xml", PLACEHOLDER_SVG).no_cache()
}

/// Generic 503 for everything else
pub fn service_unavailable() -> NetworkResponse {
    NetworkResponse::with_content_type(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "Offline")
        .no_cache()
}
