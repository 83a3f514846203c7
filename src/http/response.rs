use crate::prelude::*;

#[derive(Debug)]
pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status_code,
            status_text: status_text.to_string(),
            headers: HashMap::from([("content-length".to_string(), "0".to_string())]),
            body: Vec::new(),
        }
    }

    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers.insert(key.to_lowercase(), value.to_string());
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.headers
            .insert("content-length".to_string(), body.len().to_string());
        self.headers
            .insert("content-type".to_string(), content_type.to_string());
        self.body = body;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut res = format!("{} {} {}\r\n", self.version, self.status_code, self.status_text).into_bytes();

        for (key, val) in &self.headers {
            let formatted_key = Self::to_pascal_case(key);
            res.extend_from_slice(format!("{}: {}\r\n", formatted_key, val).as_bytes());
        }
        res.extend_from_slice(b"\r\n");
        res.extend_from_slice(&self.body);
        res
    }

    pub fn to_bytes_headers_only(&self) -> Vec<u8> {
        let mut res = format!("{} {} {}\r\n", self.version, self.status_code, self.status_text);

        for (k, v) in &self.headers {
            let formatted_key = Self::to_pascal_case(k);
            res.push_str(&format!("{}: {}\r\n", formatted_key, v));
        }

        res.push_str("\r\n");
        res.into_bytes()
    }

    pub fn status_text(code: u16) -> String {
        match code {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            HTTP_BAD_REQUEST => "Bad Request",
            HTTP_FORBIDDEN => "Forbidden",
            HTTP_NOT_FOUND => "Not Found",
            HTTP_METHOD_NOT_ALLOWED => "Method Not Allowed",
            HTTP_PAYLOAD_TOO_LARGE => "Payload Too Large",
            HTTP_URI_TOO_LONG => "URI Too Long",
            HTTP_NOT_IMPLEMENTED => "Not Implemented",
            GATEWAY_TIMEOUT => "Gateway Timeout",
            HTTP_INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "Unknown",
        }
        .to_string()
    }

    pub fn set_status_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.status_text = HttpResponse::status_text(code);
        self
    }

    fn to_pascal_case(s: &str) -> String {
        s.split('-')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    None => String::new(),
                    Some(f) => f.to_uppercase().collect::<String>() + chars.as_str(),
                }
            })
            .collect::<Vec<String>>()
            .join("-")
    }

    /// Builds a redirect response in place. The caller is responsible for the
    /// response object's initial state (a fresh `HttpResponse::new` is fine).
    pub fn redirect(response: &mut HttpResponse, code: u16, target_url: &str) {
        response.set_status_code(code);
        response
            .set_header("location", target_url)
            .set_header("content-length", "0")
            .set_header("connection", "close");
    }
}

pub fn get_mime_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

pub fn get_ext_from_content_type(content_type: &str) -> &str {
    match content_type {
        "application/json" => ".json",
        "application/pdf" => ".pdf",
        "application/xml" => ".xml",
        "application/zip" => ".zip",
        "audio/mpeg" => ".mp3",
        "image/gif" => ".gif",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/svg+xml" => ".svg",
        "image/webp" => ".webp",
        "text/css" => ".css",
        "text/html" => ".html",
        "text/javascript" => ".js",
        "text/plain" => ".txt",
        "video/mp4" => ".mp4",
        _ => ".bin",
    }
}

fn format_mtime(entry_path: &Path) -> String {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let Ok(modified) = entry_path.metadata().and_then(|m| m.modified()) else {
        return String::new();
    };
    let secs = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    // Civil-from-days, Howard Hinnant's algorithm: turns a Unix day count into y/m/d.
    let days = (secs / 86_400) as i64;
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if m <= 2 { y + 1 } else { y };

    let rem = secs % 86_400;
    let hour = rem / 3600;
    let min = (rem % 3600) / 60;

    format!(
        "{:02}-{}-{} {:02}:{:02}",
        d,
        MONTHS[(m - 1) as usize],
        year,
        hour,
        min
    )
}

/// Renders a directory listing in place, matching the in-place mutation style
/// every other response builder in this module uses.
pub fn generate_autoindex(response: &mut HttpResponse, path: &Path, original_url: &str) {
    let mut html = format!("<html><body><h1>Index of {}</h1><pre>", original_url);
    html.push_str("<a href=\"../\">..</a>\n");

    if let Ok(mut entries) = path.read_dir().map(|it| it.flatten().collect::<Vec<_>>()) {
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            if let Ok(name) = entry.file_name().into_string() {
                if name == "." || name == ".." {
                    continue;
                }
                let entry_path = entry.path();
                let is_dir = entry_path.is_dir();
                let suffix = if is_dir { "/" } else { "" };
                let size = if is_dir {
                    "-".to_string()
                } else {
                    entry_path.metadata().map(|m| m.size().to_string()).unwrap_or_default()
                };
                html.push_str(&format!(
                    "<a href=\"{}/{name}{suffix}\">{name}{suffix}</a>  {}  {:>10}\n",
                    original_url.trim_end_matches('/'),
                    format_mtime(&entry_path),
                    size,
                ));
            }
        }
    }

    html.push_str("</pre></body></html>");
    response.set_status_code(HTTP_OK);
    response.set_body(html.into_bytes(), "text/html");
}

/// Fills in `response` with a standard error body, consulting the server's
/// configured `error_page` directives first.
pub fn handle_error(response: &mut HttpResponse, code: u16, s_cfg: Option<&Arc<ServerConfig>>) {
    let close_after = code >= 400 && code != HTTP_NOT_FOUND && code != HTTP_METHOD_NOT_ALLOWED;

    if let Some(cfg) = s_cfg {
        if let Some(path_str) = cfg.error_pages.get(&code) {
            let s_root = std::path::Path::new(&cfg.root);
            let err_path = s_root.join(path_str.trim_start_matches('/'));
            if let Ok(content) = fs::read(err_path) {
                let reason = HttpResponse::status_text(code);
                let body = String::from_utf8_lossy(&content)
                    .replace("{STATUS_CODE}", &code.to_string())
                    .replace("{REASON}", &reason)
                    .into_bytes();
                response.set_status_code(code).set_body(body, "text/html");
                response.set_header("connection", if close_after { "close" } else { "keep-alive" });
                return;
            }
        }
    }

    response.set_status_code(code);
    response.set_header("connection", if close_after { "close" } else { "keep-alive" });
    let body = format!("{} {}", code, HttpResponse::status_text(code)).into_bytes();
    response.set_body(body, "text/plain");
}
