pub use crate::prelude::*;

/// Deletes the file the request path resolves to under the location's root.
/// Directories and missing targets are rejected; there is no scoping to an
/// upload directory, DELETE operates on whatever GET would have served.
pub fn handle_delete(request: &HttpRequest, loc: &LocationConfig, s_cfg: &Arc<ServerConfig>) -> HttpResponse {
    let mut response = HttpResponse::new(HTTP_OK, &HttpResponse::status_text(HTTP_OK));

    let root = s_cfg.effective_root(loc);
    let mut target_path = PathBuf::from(root);
    target_path.push(request.path().trim_start_matches('/'));

    if is_unsafe_path(request.path()) {
        handle_error(&mut response, HTTP_FORBIDDEN, Some(s_cfg));
        return response;
    }

    if target_path.is_dir() {
        handle_error(&mut response, HTTP_FORBIDDEN, Some(s_cfg));
        return response;
    }

    match fs::remove_file(&target_path) {
        Ok(_) => {
            response.set_status_code(HTTP_OK);
            response.set_body(b"File deleted".to_vec(), "text/plain");
            response.set_header("connection", "close");
            response
        }
        Err(e) => {
            match e.kind() {
                ErrorKind::NotFound => handle_error(&mut response, HTTP_NOT_FOUND, Some(s_cfg)),
                ErrorKind::PermissionDenied => handle_error(&mut response, HTTP_FORBIDDEN, Some(s_cfg)),
                _ => handle_error(&mut response, HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg)),
            };
            response
        }
    }
}
