pub use crate::prelude::*;

/// Serves a GET/HEAD request against the resolved location. Redirects and CGI
/// dispatch are decided earlier in `setup_action`; this only ever sees plain
/// file/directory targets.
pub fn handle_get(
    request: &HttpRequest,
    response: &mut HttpResponse,
    loc: &LocationConfig,
    s_cfg: &Arc<ServerConfig>,
) -> ActiveAction {
    let root = s_cfg.effective_root(loc);
    let mut path = PathBuf::from(root);
    path.push(request.path().trim_start_matches('/'));

    if path.is_dir() {
        let index = s_cfg
            .effective_index(loc)
            .iter()
            .find(|f| path.join(f).is_file());
        match index {
            Some(index_file) => path.push(index_file),
            None if loc.autoindex => {
                generate_autoindex(response, &path, &request.url);
                return ActiveAction::None;
            }
            None => {
                handle_error(response, HTTP_NOT_FOUND, Some(s_cfg));
                return ActiveAction::None;
            }
        }
    }

    match File::open(&path) {
        Ok(file) => {
            let Ok(metadata) = file.metadata() else {
                handle_error(response, HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg));
                return ActiveAction::None;
            };
            if metadata.is_dir() {
                handle_error(response, HTTP_NOT_FOUND, Some(s_cfg));
                return ActiveAction::None;
            }

            let file_size = metadata.size() as usize;
            let mime_type = get_mime_type(path.extension().and_then(|s| s.to_str()));

            response.set_status_code(HTTP_OK);
            response.set_header("content-length", &file_size.to_string());
            response.set_header("content-type", mime_type);

            ActiveAction::FileDownload(file, file_size)
        }
        Err(e) => {
            match e.kind() {
                ErrorKind::NotFound => handle_error(response, HTTP_NOT_FOUND, Some(s_cfg)),
                ErrorKind::PermissionDenied => handle_error(response, HTTP_FORBIDDEN, Some(s_cfg)),
                _ => handle_error(response, HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg)),
            };
            ActiveAction::None
        }
    }
}
