use crate::prelude::*;

/// Parses a finished CGI document response (header block, blank line, body)
/// and builds the outgoing `HttpResponse`, with `Content-Length` always set
/// from the actual accumulated body length — never from whatever the script
/// itself declared — so framing is guaranteed regardless of what the child
/// sent.
pub fn finalize_cgi_response(raw_output: &[u8], s_cfg: Option<&Arc<ServerConfig>>) -> HttpResponse {
    if raw_output.is_empty() {
        let mut response = HttpResponse::new(HTTP_INTERNAL_SERVER_ERROR, "Internal Server Error");
        handle_error(&mut response, HTTP_INTERNAL_SERVER_ERROR, s_cfg);
        return response;
    }

    let (header_end, delimiter_len) = match find_subsequence(raw_output, b"\r\n\r\n", 0) {
        Some(pos) => (pos, 4),
        None => match find_subsequence(raw_output, b"\n\n", 0) {
            Some(pos) => (pos, 2),
            None => (0, 0),
        },
    };

    let (header_section, body): (&str, &[u8]) = if delimiter_len == 0 {
        ("", raw_output)
    } else {
        (
            std::str::from_utf8(&raw_output[..header_end]).unwrap_or(""),
            &raw_output[header_end + delimiter_len..],
        )
    };

    let mut status = 200;
    let mut content_type = "text/plain".to_string();
    let mut headers = Vec::new();
    for line in header_section.lines() {
        if let Some((key, val)) = line.split_once(':') {
            let key = key.trim().to_lowercase();
            let val = val.trim().to_string();
            if key == "status" {
                status = val.split_whitespace().next().and_then(|s| s.parse().ok()).unwrap_or(200);
            } else {
                if key == "content-type" {
                    content_type = val.clone();
                }
                headers.push((key, val));
            }
        }
    }

    let mut response = HttpResponse::new(status, &HttpResponse::status_text(status));
    for (k, v) in headers {
        response.set_header(&k, &v);
    }
    response.set_body(body.to_vec(), &content_type);
    response
}

fn finalize_cgi(conn: &mut HttpConnection, client_token: Token, poll: &Poll, cgi_to_client: &mut HashMap<Token, Token>) -> Result<()> {
    if let ActiveAction::Cgi { ref mut child, .. } = conn.action {
        let _ = child.kill();
        let _ = child.try_wait();
    }
    if let ActiveAction::Cgi { output_buf, .. } = &conn.action {
        let response = finalize_cgi_response(output_buf, conn.s_cfg.as_ref());
        conn.write_buffer.extend_from_slice(&response.to_bytes());
    }
    conn.cgi_out_token = None;
    conn.cgi_in_token = None;
    cleanup_cgi(cgi_to_client, conn);
    conn.action = ActiveAction::None;
    poll.registry().reregister(&mut conn.stream, client_token, Interest::READABLE | Interest::WRITABLE)?;
    Ok(())
}

pub fn handle_cgi_event(
    poll: &Poll,
    event: &Event,
    cgi_token: Token,
    client_token: Token,
    conn: &mut HttpConnection,
    cgi_to_client: &mut HashMap<Token, Token>,
) -> Result<()> {
    let mut should_finalize = false;

    if let ActiveAction::Cgi {
        out_stream,
        in_stream,
        child,
        output_buf,
        start_time: _,
    } = &mut conn.action
    {
        // SCRIPT -> SERVER (Stdout)
        if event.is_readable() && Some(cgi_token) == conn.cgi_out_token {
            let mut buf = [0u8; 4096];
            match out_stream.read(&mut buf) {
                Ok(0) => should_finalize = true,
                Ok(n) => output_buf.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(_) => should_finalize = true,
            }
        }

        // SERVER -> SCRIPT (Stdin)
        if event.is_writable() && Some(cgi_token) == conn.cgi_in_token {
            if !conn.cgi_buffer.is_empty() {
                if let Some(pipe) = in_stream {
                    match pipe.write(&conn.cgi_buffer) {
                        Ok(n) => {
                            conn.cgi_buffer.drain(..n);

                            if conn.cgi_buffer.len() < 65536 {
                                poll.registry().reregister(
                                    &mut conn.stream,
                                    client_token,
                                    Interest::READABLE | Interest::WRITABLE,
                                )?;
                            }

                            if conn.body_remaining == 0 && conn.cgi_buffer.is_empty() {
                                conn.cgi_in_token = None;
                                trace!("CGI stdin pipe closed (EOF sent)");
                            }
                        }
                        Err(e) if e.kind() != ErrorKind::WouldBlock => {}
                        Err(_) => conn.closed = true,
                    }
                }
            }
        }

        // Child process status check (non-blocking, never stalls the reactor).
        // A child exit is treated the same as a stdout hangup: finalize once,
        // below, outside this borrow.
        match child.try_wait() {
            Ok(Some(_status)) => should_finalize = true,
            Ok(None) => {}
            Err(_) => should_finalize = true,
        }
    }

    if should_finalize {
        finalize_cgi(conn, client_token, poll, cgi_to_client)?;
    }
    Ok(())
}

pub fn build_cgi_env(conn: &mut HttpConnection, script_path: &Path) -> HashMap<String, String> {
    let req = &conn.request;
    let mut envs = HashMap::new();

    envs.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    envs.insert("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string());
    envs.insert("SERVER_SOFTWARE".to_string(), "server_proxy/0.1".to_string());
    envs.insert("REQUEST_METHOD".to_string(), req.method.to_string());
    envs.insert("SCRIPT_FILENAME".to_string(), script_path.to_string_lossy().into_owned());
    envs.insert("SCRIPT_NAME".to_string(), req.path().to_string());
    envs.insert("PATH_INFO".to_string(), req.path().to_string());
    envs.insert("QUERY_STRING".to_string(), req.query_string().to_string());

    if let Some(host_header) = req.headers.get("host") {
        envs.insert("SERVER_NAME".to_string(), host_header.split(':').next().unwrap_or("").to_string());
    }
    if let Ok(addr) = conn.stream.peer_addr() {
        envs.insert("REMOTE_ADDR".to_string(), addr.ip().to_string());
        envs.insert("REMOTE_PORT".to_string(), addr.port().to_string());
    }

    envs.insert(
        "CONTENT_TYPE".to_string(),
        req.headers.get("content-type").cloned().unwrap_or_default(),
    );
    envs.insert(
        "CONTENT_LENGTH".to_string(),
        req.headers.get("content-length").cloned().unwrap_or_else(|| "0".to_string()),
    );

    for (k, v) in req.headers.iter().chain(&req.trailers) {
        if k == "content-type" || k == "content-length" {
            continue;
        }
        let env_key = format!("HTTP_{}", k.to_uppercase().replace('-', "_"));
        envs.insert(env_key, v.clone());
    }

    envs
}

pub fn cleanup_cgi(cgi_to_client: &mut HashMap<Token, Token>, conn: &mut HttpConnection) {
    if let Some(t) = conn.cgi_out_token.take() {
        cgi_to_client.remove(&t);
    }
    if let Some(t) = conn.cgi_in_token.take() {
        cgi_to_client.remove(&t);
    }
}

/// Kills and non-blockingly reaps a stalled CGI child. Since nothing is ever
/// written to the client before `finalize_cgi_response` runs, a timeout always
/// resolves to a plain 504 regardless of how much output had already
/// accumulated.
pub fn force_cgi_timeout(conn: &mut HttpConnection, cgi_to_client: &mut HashMap<Token, Token>) {
    if let ActiveAction::Cgi { ref mut child, .. } = conn.action {
        let _ = child.kill();
        let _ = child.try_wait();

        let error_res = "HTTP/1.1 504 Gateway Timeout\r\nContent-Length: 0\r\n\r\n";
        conn.write_buffer.extend_from_slice(error_res.as_bytes());

        conn.cgi_in_token = None;
        conn.cgi_out_token = None;
        conn.cgi_buffer.clear();
        conn.closed = true; // Flag for removal after write

        cleanup_cgi(cgi_to_client, conn);

        conn.action = ActiveAction::None;
    }
}
