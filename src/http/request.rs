use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    HEAD,
    POST,
    PUT,
    DELETE,
}

impl Method {
    pub fn is_allowed(&self, allowed_methods: &[Method]) -> bool {
        allowed_methods.contains(self)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = ParseError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "HEAD" => Ok(Method::HEAD),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            _ => Err(ParseError::InvalidMethod),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, PartialEq)]
pub enum ParsingState {
    RequestLine,
    Headers,
    HeadersDone,
    Body,
    ChunkedBody,
    Complete,
    Error,
}

const CRLN_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    IncompleteRequestLine,
    MalformedRequestLine,
    InvalidMethod,
    InvalidUtf8(std::string::FromUtf8Error),
    UnexpectedEof,
    HeaderTooLong,
    TooManyHeaders,
    InvalidHeaderName,
    InvalidHeaderValue,
    InvalidChunkSize,
    PayloadTooLarge,
    ParseHexError,
    Error(u16),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::IncompleteRequestLine => write!(f, "Incomplete request line"),
            ParseError::MalformedRequestLine => write!(f, "Malformed request line"),
            ParseError::InvalidMethod => write!(f, "Invalid HTTP method"),
            ParseError::InvalidUtf8(_) => write!(f, "Invalid UTF-8 in request"),
            ParseError::UnexpectedEof => write!(f, "Unexpected end of input"),
            ParseError::HeaderTooLong => write!(f, "Header line too long"),
            ParseError::TooManyHeaders => write!(f, "Too many headers"),
            ParseError::InvalidHeaderName => write!(f, "Invalid header name"),
            ParseError::InvalidHeaderValue => write!(f, "Invalid header value"),
            ParseError::PayloadTooLarge => write!(f, "Payload too large"),
            ParseError::ParseHexError => write!(f, "Parse Hex Error"),
            ParseError::Error(_) => write!(f, "other error"),
            ParseError::InvalidChunkSize => write!(f, "invalid chunk size"),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<std::string::FromUtf8Error> for ParseError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        ParseError::InvalidUtf8(err)
    }
}

#[derive(Debug)]
pub enum ChunkState {
    ReadSize,
    ReadData(usize),
    ReadTrailingCRLF,
    ReadTrailers,
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub trailers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub body_file: Option<File>,
    pub is_large_body: bool,
    pub buffer: Vec<u8>,
    pub cursor: usize,
    pub state: ParsingState,
    pub chunk_state: ChunkState,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        HttpRequest {
            method: Method::GET,
            url: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            trailers: HashMap::new(),
            body: Vec::new(),
            buffer: Vec::with_capacity(4096),
            cursor: 0,
            state: ParsingState::RequestLine,
            is_large_body: false,
            body_file: None,
            chunk_state: ChunkState::ReadSize,
        }
    }

    /// Path component of the target, with query string and fragment stripped.
    pub fn path(&self) -> &str {
        crate::router::path_component(&self.url)
    }

    /// Raw query string, if the target carried one (without the leading `?`).
    pub fn query_string(&self) -> &str {
        let after_path = self.url.split('#').next().unwrap_or(&self.url);
        after_path.split_once('?').map(|(_, q)| q).unwrap_or("")
    }

    pub fn clear(&mut self) {
        self.state = ParsingState::RequestLine;
        self.headers.clear();
        self.trailers.clear();
        self.body.clear();
        self.chunk_state = ChunkState::ReadSize;
    }

    pub fn finish_request(&mut self) {
        self.buffer.drain(..self.cursor);
        self.cursor = 0;
        self.clear();
    }

    pub fn proces_request(
        poll: &Poll,
        token: Token,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
        conn: &mut HttpConnection,
        session_store: &mut SessionStore,
    ) -> Result<bool> {
        let mut closed = false;
        loop {
            match HttpRequest::parse_request(conn, poll, next_token, cgi_to_client, token) {
                Ok(()) => {
                    trace!("request parse complete, dispatching response");
                    let s_cfg = conn.s_cfg.clone();

                    if let Some(pending) = conn.pending_response.take() {
                        conn.write_buffer.extend_from_slice(&pending.to_bytes());
                    } else if let Some(upload_manager) = &mut conn.upload_manager {
                        let mut response = HttpResponse::new(HTTP_OK, "OK");
                        Upload::handel_upload_manager(&mut response, upload_manager, s_cfg.as_ref().unwrap());
                        conn.upload_manager = None;
                        conn.action = ActiveAction::None;
                        conn.write_buffer.extend_from_slice(&response.to_bytes());
                    } else if let ActiveAction::PutFile { existed, .. } = &conn.action {
                        let code = if *existed { HTTP_OK } else { HTTP_CREATED };
                        let mut response = HttpResponse::new(code, &HttpResponse::status_text(code));
                        response.set_body(Vec::new(), "text/plain");
                        conn.action = ActiveAction::None;
                        conn.write_buffer.extend_from_slice(&response.to_bytes());
                    } else if matches!(conn.action, ActiveAction::BufferBody) {
                        let mut response = HttpResponse::new(HTTP_OK, "OK");
                        handle_post(&conn.request, &mut response);
                        conn.action = ActiveAction::None;
                        conn.write_buffer.extend_from_slice(&response.to_bytes());
                    }

                    session_store.mange_session_store(conn);
                    conn.request.finish_request();
                    break;
                }
                Err(ParseError::IncompleteRequestLine) => break,
                Err(e) => {
                    let code = match e {
                        ParseError::PayloadTooLarge => HTTP_PAYLOAD_TOO_LARGE,
                        ParseError::InvalidMethod => HTTP_BAD_REQUEST,
                        ParseError::HeaderTooLong => HTTP_URI_TOO_LONG,
                        _ => HTTP_BAD_REQUEST,
                    };
                    let mut response = HttpResponse::new(code, &HttpResponse::status_text(code));
                    handle_error(&mut response, code, conn.s_cfg.as_ref());
                    response.set_header("connection", "close");
                    closed = true;
                    conn.write_buffer.extend_from_slice(&response.to_bytes());
                    conn.request.finish_request();
                    break;
                }
            }
        }

        if !conn.write_buffer.is_empty() || matches!(conn.action, ActiveAction::FileDownload(_, _)) {
            poll.registry()
                .reregister(&mut conn.stream, token, Interest::READABLE | Interest::WRITABLE)?;
        }
        Ok(closed)
    }

    pub fn parse_request(
        conn: &mut HttpConnection,
        poll: &Poll,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
        client_token: Token,
    ) -> core::result::Result<(), ParseError> {
        loop {
            let res = match conn.request.state {
                ParsingState::RequestLine => conn.request.parse_request_line(),
                ParsingState::Headers => HttpRequest::parse_headers(conn),
                ParsingState::HeadersDone => {
                    HttpRequest::setup_action(conn, poll, next_token, cgi_to_client, client_token)
                }
                ParsingState::Body => HttpRequest::parse_unchunked_body(poll, conn),
                ParsingState::ChunkedBody => match HttpRequest::parse_chunked_body(conn) {
                    Ok(true) => {
                        conn.request.state = ParsingState::Complete;
                        Ok(())
                    }
                    Ok(false) => return Err(ParseError::IncompleteRequestLine),
                    Err(e) => Err(e),
                },
                _ => break,
            };

            match res {
                Ok(_) => {
                    if conn.request.state == ParsingState::Complete {
                        break;
                    }
                }
                Err(ParseError::IncompleteRequestLine) => {
                    return Err(ParseError::IncompleteRequestLine);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Resolves routing, content framing and the action to run for this request.
    ///
    /// When the outcome is already decided (error page, redirect, direct GET/HEAD,
    /// DELETE) the response is stashed on `conn.pending_response` rather than
    /// short-circuiting straight to `Complete`: any declared body must still be
    /// drained off the wire so a pipelined next request doesn't get desynced.
    /// Since connections carrying such a pending response close after writing it,
    /// that drain never actually needs to produce useful bytes -- it just needs
    /// to keep the stream's framing honest.
    pub fn setup_action(
        conn: &mut HttpConnection,
        poll: &Poll,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
        client_token: Token,
    ) -> core::result::Result<(), ParseError> {
        let s_cfg = conn.resolve_config();
        conn.s_cfg = Some(Arc::clone(&s_cfg));

        let content_length = conn
            .request
            .headers
            .get("content-length")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);

        let is_chunked = conn
            .request
            .headers
            .get("transfer-encoding")
            .map(|v| v.contains("chunked"))
            .unwrap_or(false);

        let content_type = conn
            .request
            .headers
            .get("content-type")
            .map(|s| s.as_str())
            .unwrap_or("");

        conn.boundary = content_type
            .split("boundary=")
            .nth(1)
            .map(|b| b.trim().trim_matches('"'))
            .unwrap_or("")
            .to_string();

        let has_body = is_chunked || content_length > 0;
        conn.body_remaining = content_length;

        let request = &conn.request;
        let path = request.path();

        if crate::router::is_unsafe_path(path) {
            let mut response = HttpResponse::new(HTTP_NOT_FOUND, "Not Found");
            handle_error(&mut response, HTTP_NOT_FOUND, Some(&s_cfg));
            return HttpRequest::finish_with_pending(conn, response, has_body, is_chunked);
        }

        match s_cfg.find_route(path, &request.method) {
            Err(RoutingError::NotFound) => {
                let mut response = HttpResponse::new(HTTP_NOT_FOUND, "Not Found");
                handle_error(&mut response, HTTP_NOT_FOUND, Some(&s_cfg));
                HttpRequest::finish_with_pending(conn, response, has_body, is_chunked)
            }
            Err(RoutingError::MethodNotAllowed) => {
                let mut response = HttpResponse::new(HTTP_METHOD_NOT_ALLOWED, "Method Not Allowed");
                handle_error(&mut response, HTTP_METHOD_NOT_ALLOWED, Some(&s_cfg));
                HttpRequest::finish_with_pending(conn, response, has_body, is_chunked)
            }
            Ok(loc) => {
                let max_body = s_cfg.effective_max_body_size(loc);
                if !is_chunked && content_length > max_body {
                    return Err(ParseError::PayloadTooLarge);
                }

                if let Some((code, ref target)) = loc.redirect {
                    let mut response = HttpResponse::new(code, &HttpResponse::status_text(code));
                    HttpResponse::redirect(&mut response, code, target);
                    return HttpRequest::finish_with_pending(conn, response, has_body, is_chunked);
                }

                if let Some(interpreter) = loc.cgi_interpreter_for(path) {
                    return HttpRequest::dispatch_cgi(
                        conn,
                        poll,
                        next_token,
                        cgi_to_client,
                        client_token,
                        &s_cfg,
                        interpreter,
                        has_body,
                        is_chunked,
                    );
                }

                match request.method {
                    Method::GET | Method::HEAD => {
                        let mut response = HttpResponse::new(HTTP_OK, "OK");
                        let action = handle_get(request, &mut response, loc, &s_cfg);
                        if matches!(request.method, Method::HEAD) {
                            response.body.clear();
                            conn.action = ActiveAction::None;
                        } else {
                            conn.action = action;
                        }
                        HttpRequest::finish_with_pending(conn, response, has_body, is_chunked)
                    }
                    Method::DELETE => {
                        let response = handle_delete(request, loc, &s_cfg);
                        HttpRequest::finish_with_pending(conn, response, has_body, is_chunked)
                    }
                    Method::PUT => {
                        let root = s_cfg.effective_root(loc);
                        let target = PathBuf::from(root).join(path.trim_start_matches('/'));
                        match handle_put(&target) {
                            Ok(existed) => {
                                conn.action = ActiveAction::PutFile { path: target, existed };
                                HttpRequest::begin_body_or_complete(conn, has_body, is_chunked)
                            }
                            Err(_) => {
                                let mut response = HttpResponse::new(HTTP_FORBIDDEN, "Forbidden");
                                handle_error(&mut response, HTTP_FORBIDDEN, Some(&s_cfg));
                                HttpRequest::finish_with_pending(conn, response, has_body, is_chunked)
                            }
                        }
                    }
                    Method::POST => {
                        if !conn.boundary.is_empty() {
                            let store = loc
                                .upload_store
                                .as_ref()
                                .map(|dir| PathBuf::from(root_with_store(&s_cfg, loc, dir)));
                            match store {
                                Some(dir) if dir.is_dir() => {
                                    conn.upload_manager = Some(Upload::new(dir, &conn.boundary));
                                    conn.action = ActiveAction::Upload(PathBuf::new());
                                    HttpRequest::begin_body_or_complete(conn, has_body, is_chunked)
                                }
                                _ => {
                                    let mut response = HttpResponse::new(HTTP_FORBIDDEN, "Forbidden");
                                    handle_error(&mut response, HTTP_FORBIDDEN, Some(&s_cfg));
                                    HttpRequest::finish_with_pending(conn, response, has_body, is_chunked)
                                }
                            }
                        } else if content_type.starts_with("application/x-www-form-urlencoded") {
                            conn.action = ActiveAction::BufferBody;
                            HttpRequest::begin_body_or_complete(conn, has_body, is_chunked)
                        } else {
                            let mut response = HttpResponse::new(HTTP_BAD_REQUEST, "Bad Request");
                            handle_error(&mut response, HTTP_BAD_REQUEST, Some(&s_cfg));
                            HttpRequest::finish_with_pending(conn, response, has_body, is_chunked)
                        }
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_cgi(
        conn: &mut HttpConnection,
        poll: &Poll,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
        client_token: Token,
        s_cfg: &Arc<ServerConfig>,
        interpreter: &str,
        has_body: bool,
        is_chunked: bool,
    ) -> core::result::Result<(), ParseError> {
        let loc = s_cfg.find_route(conn.request.path(), &conn.request.method).ok();
        let root = loc.map(|l| s_cfg.effective_root(l)).unwrap_or(&s_cfg.root);
        let full_script_path = PathBuf::from(root).join(conn.request.path().trim_start_matches('/'));

        let Ok((server_out_std, script_out_std)) = UnixStream::pair() else {
            let mut response = HttpResponse::new(HTTP_INTERNAL_SERVER_ERROR, "Internal Server Error");
            handle_error(&mut response, HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg));
            return HttpRequest::finish_with_pending(conn, response, has_body, is_chunked);
        };
        server_out_std.set_nonblocking(true).ok();
        let mut server_out_mio = mio::net::UnixStream::from_std(server_out_std);

        let Ok((server_in_std, script_in_std)) = UnixStream::pair() else {
            let mut response = HttpResponse::new(HTTP_INTERNAL_SERVER_ERROR, "Internal Server Error");
            handle_error(&mut response, HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg));
            return HttpRequest::finish_with_pending(conn, response, has_body, is_chunked);
        };
        server_in_std.set_nonblocking(true).ok();
        let mut server_in_mio = mio::net::UnixStream::from_std(server_in_std);

        let script_output_file = unsafe { File::from_raw_fd(script_out_std.into_raw_fd()) };
        let script_input_file = unsafe { File::from_raw_fd(script_in_std.into_raw_fd()) };

        let mut cmd = Command::new(interpreter);
        cmd.arg(&full_script_path)
            .envs(build_cgi_env(conn, &full_script_path))
            .stdin(Stdio::from(script_input_file))
            .stdout(Stdio::from(script_output_file))
            .stderr(Stdio::inherit());

        match cmd.spawn() {
            Ok(child) => {
                let out_token = Token(*next_token);
                *next_token += 1;
                poll.registry().register(&mut server_out_mio, out_token, Interest::READABLE).ok();

                let in_token = Token(*next_token);
                *next_token += 1;
                poll.registry().register(&mut server_in_mio, in_token, Interest::WRITABLE).ok();

                conn.cgi_out_token = Some(out_token);
                conn.cgi_in_token = Some(in_token);

                conn.action = ActiveAction::Cgi {
                    out_stream: server_out_mio,
                    in_stream: Some(server_in_mio),
                    child,
                    output_buf: Vec::new(),
                    start_time: Instant::now(),
                };

                cgi_to_client.insert(out_token, client_token);
                cgi_to_client.insert(in_token, client_token);

                HttpRequest::begin_body_or_complete(conn, has_body, is_chunked)
            }
            Err(_) => {
                let mut response = HttpResponse::new(HTTP_INTERNAL_SERVER_ERROR, "Internal Server Error");
                handle_error(&mut response, HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg));
                HttpRequest::finish_with_pending(conn, response, has_body, is_chunked)
            }
        }
    }

    /// Stashes `response` as the pending outcome. If a body is still incoming,
    /// forces the connection closed once it's written so leftover body bytes
    /// can never be reinterpreted as the next request's start line.
    fn finish_with_pending(
        conn: &mut HttpConnection,
        mut response: HttpResponse,
        has_body: bool,
        _is_chunked: bool,
    ) -> core::result::Result<(), ParseError> {
        if has_body {
            response.set_header("connection", "close");
        }
        conn.pending_response = Some(response);
        conn.request.state = ParsingState::Complete;
        Ok(())
    }

    fn begin_body_or_complete(
        conn: &mut HttpConnection,
        has_body: bool,
        is_chunked: bool,
    ) -> core::result::Result<(), ParseError> {
        if is_chunked {
            conn.request.state = ParsingState::ChunkedBody;
        } else if has_body {
            conn.request.state = ParsingState::Body;
        } else {
            conn.request.state = ParsingState::Complete;
        }
        Ok(())
    }

    fn parse_request_line(&mut self) -> core::result::Result<(), ParseError> {
        if let Some(abs_index) = find_crlf(&self.buffer, self.cursor) {
            let line_bytes = &self.buffer[self.cursor..abs_index];
            let request_line = std::str::from_utf8(line_bytes).map_err(|_| ParseError::MalformedRequestLine)?;

            let parts: Vec<&str> = request_line.split_whitespace().collect();
            if parts.len() == 3 {
                self.method = Method::from_str(parts[0])?;
                self.url = parts[1].to_string();
                self.version = parts[2].to_string();

                self.cursor = abs_index + CRLN_LEN;
                self.state = ParsingState::Headers;
            } else {
                return Err(ParseError::MalformedRequestLine);
            }
        } else {
            return Err(ParseError::IncompleteRequestLine);
        }
        Ok(())
    }

    fn extract_and_parse_header(&mut self) -> core::result::Result<Option<(String, String)>, ParseError> {
        if let Some(abs_index) = find_crlf(&self.buffer, self.cursor) {
            let line_bytes = &self.buffer[self.cursor..abs_index];
            if line_bytes.is_empty() {
                self.cursor = abs_index + CRLN_LEN;
                return Ok(None);
            }
            let line = std::str::from_utf8(line_bytes).map_err(|_| ParseError::MalformedRequestLine)?;
            self.cursor = abs_index + CRLN_LEN;
            if let Some(sep) = line.find(':') {
                let key = line[..sep].trim().to_string();
                let val = line[sep + 1..].trim().to_string();
                return Ok(Some((key.to_ascii_lowercase(), val)));
            }
            Err(ParseError::MalformedRequestLine)
        } else {
            Err(ParseError::IncompleteRequestLine)
        }
    }

    fn parse_headers(conn: &mut HttpConnection) -> core::result::Result<(), ParseError> {
        loop {
            let headers_option = conn.request.extract_and_parse_header()?;
            match headers_option {
                Some((k, v)) => conn.request.headers.entry(k).or_insert(v),
                None => {
                    conn.request.buffer.drain(..conn.request.cursor);
                    conn.request.cursor = 0;
                    conn.request.state = ParsingState::HeadersDone;
                    return Ok(());
                }
            };
        }
    }

    pub fn parse_unchunked_body(poll: &Poll, conn: &mut HttpConnection) -> core::result::Result<(), ParseError> {
        if conn.s_cfg.is_some() {
            let available = conn.request.buffer.len() - conn.request.cursor;
            let to_process = std::cmp::min(available, conn.body_remaining);

            if to_process > 0 {
                match &mut conn.action {
                    ActiveAction::Cgi { in_stream, .. } => {
                        let data = conn.request.buffer.drain(..to_process).collect::<Vec<u8>>();
                        conn.cgi_buffer.extend_from_slice(&data);
                        conn.body_remaining -= to_process;

                        if let Some(in_token) = conn.cgi_in_token {
                            if let Some(pipe) = in_stream {
                                poll.registry().reregister(pipe, in_token, Interest::WRITABLE).ok();
                            }
                        }
                    }
                    ActiveAction::BufferBody => {
                        let start = conn.request.cursor;
                        let data = conn.request.buffer[start..start + to_process].to_vec();
                        conn.request.body.extend_from_slice(&data);
                        conn.body_remaining -= to_process;
                        conn.request.buffer.drain(start..start + to_process);
                    }
                    _ => {
                        let start = conn.request.cursor;
                        execute_active_action(
                            &conn.request,
                            &mut conn.upload_manager,
                            &mut conn.action,
                            start,
                            to_process,
                            &conn.boundary,
                        )?;

                        conn.body_remaining -= to_process;
                        conn.request.buffer.drain(start..start + to_process);
                    }
                }
            }
        }

        if conn.body_remaining == 0 {
            conn.request.state = ParsingState::Complete;
        } else {
            return Err(ParseError::IncompleteRequestLine);
        }

        Ok(())
    }

    pub fn parse_chunked_body(conn: &mut HttpConnection) -> core::result::Result<bool, ParseError> {
        if let Some(s_cfg) = &conn.s_cfg {
            let max_body = conn
                .resolved_location_max_body(s_cfg)
                .unwrap_or(s_cfg.client_max_body_size);
            loop {
                match conn.request.chunk_state {
                    ChunkState::ReadSize => {
                        let current_len = conn.request.buffer.len();
                        if current_len == 0 {
                            return Ok(false);
                        }

                        let search_limit = std::cmp::min(current_len, 18);
                        match find_subsequence(&conn.request.buffer[..search_limit], b"\r\n", 0) {
                            Some(line_end) => {
                                let hex_str = String::from_utf8_lossy(&conn.request.buffer[..line_end]);
                                let chunk_size = usize::from_str_radix(hex_str.trim(), 16)
                                    .map_err(|_| ParseError::ParseHexError)?;
                                if conn.total_body_read + chunk_size > max_body {
                                    return Err(ParseError::PayloadTooLarge);
                                }

                                if chunk_size == 0 {
                                    if conn.request.buffer.len() < line_end + 2 {
                                        return Ok(false);
                                    }
                                    conn.request.buffer.drain(..line_end + 2);
                                    conn.request.chunk_state = ChunkState::ReadTrailers;
                                    continue;
                                }

                                conn.request.chunk_state = ChunkState::ReadData(chunk_size);
                                conn.request.buffer.drain(..line_end + 2);
                            }
                            None => {
                                if current_len >= 18 {
                                    return Err(ParseError::ParseHexError);
                                }
                                return Ok(false);
                            }
                        }
                    }

                    ChunkState::ReadData(remaining_size) => {
                        if conn.request.buffer.is_empty() {
                            return Ok(false);
                        }

                        let available = conn.request.buffer.len();
                        let to_read = std::cmp::min(available, remaining_size);

                        let data = conn.request.buffer.drain(..to_read).collect::<Vec<u8>>();

                        match &mut conn.action {
                            ActiveAction::Cgi { .. } => {
                                conn.cgi_buffer.extend_from_slice(&data);
                            }
                            ActiveAction::BufferBody => {
                                conn.request.body.extend_from_slice(&data);
                            }
                            ActiveAction::PutFile { path, .. } => {
                                if let Ok(mut file) = OpenOptions::new().append(true).open(&path) {
                                    let _ = file.write_all(&data);
                                }
                            }
                            _ => {
                                if let Some(mgr) = &mut conn.upload_manager {
                                    if !conn.boundary.is_empty() {
                                        mgr.upload_body_with_boundry(&conn.request, &data);
                                    } else {
                                        mgr.upload_simple_body(&conn.request, &data);
                                    }
                                }
                            }
                        }

                        conn.total_body_read += to_read;
                        let new_remaining = remaining_size - to_read;

                        if new_remaining == 0 {
                            conn.request.chunk_state = ChunkState::ReadTrailingCRLF;
                        } else {
                            conn.request.chunk_state = ChunkState::ReadData(new_remaining);
                            return Ok(false);
                        }
                    }

                    ChunkState::ReadTrailingCRLF => {
                        if conn.request.buffer.len() < 2 {
                            return Ok(false);
                        }

                        if &conn.request.buffer[..2] != b"\r\n" {
                            return Err(ParseError::ParseHexError);
                        }
                        conn.request.buffer.drain(..2);
                        conn.request.chunk_state = ChunkState::ReadSize;
                    }

                    ChunkState::ReadTrailers => {
                        if conn.request.buffer.len() > 8192 {
                            return Err(ParseError::HeaderTooLong);
                        }
                        match conn.request.extract_and_parse_header() {
                            Ok(Some((k, v))) => {
                                if let Some(allowed_trailers) = conn.request.headers.get("trailer") {
                                    if allowed_trailers.to_lowercase().contains(&k) {
                                        conn.request.trailers.insert(k, v);
                                    }
                                }
                                continue;
                            }
                            Ok(None) => {
                                conn.request.buffer.drain(..conn.request.cursor);
                                conn.request.cursor = 0;
                                return Ok(true);
                            }
                            Err(ParseError::IncompleteRequestLine) => return Ok(false),
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
        }
        Ok(true)
    }

    pub fn extract_filename(&self) -> String {
        format!(
            "uploaded_{}",
            SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0)
        )
    }
}

/// Routes incoming body bytes to whichever non-CGI action owns this request.
fn execute_active_action(
    request: &HttpRequest,
    upload_manager: &mut Option<Upload>,
    action: &mut ActiveAction,
    start: usize,
    len: usize,
    boundary: &str,
) -> core::result::Result<(), ParseError> {
    let chunk = &request.buffer[start..start + len];
    match action {
        ActiveAction::Upload(_) => {
            if let Some(mgr) = upload_manager {
                if !boundary.is_empty() {
                    mgr.upload_body_with_boundry(request, chunk);
                } else {
                    mgr.upload_simple_body(request, chunk);
                }
            }
        }
        ActiveAction::PutFile { path, .. } => {
            if let Ok(mut file) = OpenOptions::new().append(true).open(&path) {
                let _ = file.write_all(chunk);
            }
        }
        _ => {}
    }
    Ok(())
}

fn root_with_store(s_cfg: &Arc<ServerConfig>, loc: &LocationConfig, store: &str) -> PathBuf {
    PathBuf::from(s_cfg.effective_root(loc)).join(store.trim_start_matches('/'))
}

fn find_crlf(buffer: &[u8], start_offset: usize) -> Option<usize> {
    let search_area = buffer.get(start_offset..)?;

    let mut current_pos = 0;
    while let Some(r_pos) = search_area[current_pos..].iter().position(|&b| b == b'\r') {
        let abs_r_pos_in_search = current_pos + r_pos;

        if search_area.get(abs_r_pos_in_search + 1) == Some(&b'\n') {
            return Some(start_offset + abs_r_pos_in_search);
        }
        current_pos = abs_r_pos_in_search + 1;
    }
    None
}

pub fn find_subsequence(buffer: &[u8], needle: &[u8], start_offset: usize) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let search_area = buffer.get(start_offset..)?;
    let first_byte = needle[0];
    let mut current_pos = 0;

    while let Some(rel_pos) = search_area[current_pos..].iter().position(|&b| b == first_byte) {
        let abs_pos_in_search = current_pos + rel_pos;

        if let Some(candidate) = search_area.get(abs_pos_in_search..abs_pos_in_search + needle.len()) {
            if candidate == needle {
                return Some(start_offset + abs_pos_in_search);
            }
        } else {
            return None;
        }

        current_pos = abs_pos_in_search + 1;
    }
    None
}

impl Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- HTTP Request ---\n")?;
        writeln!(f, "{:?} {} {}", self.method, self.url, self.version)?;

        writeln!(f, "Headers:")?;
        for (key, value) in &self.headers {
            writeln!(f, "  {}: {}", key, value)?;
        }

        if !self.body.is_empty() {
            writeln!(f, "Body ({} bytes):", self.body.len())?;
            match String::from_utf8(self.body.clone()) {
                Ok(s) => writeln!(f, "  {}", s)?,
                Err(_) => writeln!(f, "  <binary data>")?,
            }
        } else {
            writeln!(f, "Body: <empty>")?;
        }
        writeln!(f, "\n--------------------")?;
        writeln!(f, "--------------------")
    }
}

#[derive(Debug, Default)]
pub struct PartInfo {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: String,
}

pub fn parse_part_headers(headers: &str) -> PartInfo {
    let mut info = PartInfo {
        name: String::new(),
        filename: None,
        content_type: String::new(),
    };

    for line in headers.lines() {
        if line.starts_with("Content-Disposition:") {
            if let Some(n) = line.split(';').find(|s| s.trim().starts_with("name=")) {
                info.name = n.split('=').nth(1).unwrap_or("").trim_matches('"').to_string();
            }
            if let Some(f) = line.split(';').find(|s| s.trim().starts_with("filename=")) {
                info.filename = Some(f.split('=').nth(1).unwrap_or("").trim_matches('"').to_string());
            }
        } else if line.starts_with("Content-Type:") {
            info.content_type = line.split(':').nth(1).unwrap_or("text/plain").trim().to_string();
        }
    }
    info
}
