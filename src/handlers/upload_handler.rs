pub use crate::prelude::*;

/// Creates or truncates the target of a PUT, making any missing parent
/// directories along the way. Returns whether the file already existed, since
/// that decides 200 vs 201 once the body has been streamed into it.
pub fn handle_put(path: &Path) -> io::Result<bool> {
    let existed = path.exists();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::File::create(path)?;
    Ok(existed)
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Handles a buffered, non-multipart POST body: urlencoded forms are parsed
/// into fields and echoed back as a confirmation page; anything else is
/// echoed verbatim.
pub fn handle_post(request: &HttpRequest, response: &mut HttpResponse) {
    let content_type = request.headers.get("content-type").map(|s| s.as_str()).unwrap_or("");
    let body = String::from_utf8_lossy(&request.body);

    let mut html = String::from("<html><body><h1>Form received</h1><ul>");

    if content_type.starts_with("application/x-www-form-urlencoded") {
        for pair in body.split('&').filter(|p| !p.is_empty()) {
            let (key, val) = pair.split_once('=').unwrap_or((pair, ""));
            html.push_str(&format!(
                "<li>{}: {}</li>",
                html_escape(&percent_decode(key)),
                html_escape(&percent_decode(val))
            ));
        }
    } else if !body.is_empty() {
        html.push_str(&format!("<li>{}</li>", html_escape(&body)));
    }

    html.push_str("</ul></body></html>");

    response.set_status_code(HTTP_OK);
    response.set_body(html.into_bytes(), "text/html");
}
