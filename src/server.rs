use crate::prelude::*;

/// Reactor entry point: owns every connection, the CGI token map, the session
/// store and the listener set. `run` never returns while the process is
/// healthy; it exits only once `shutdown` has been requested (SIGINT) and
/// every connection has drained.
pub struct Server {
    listeners: Vec<TcpListener>,
    listener_tokens: HashMap<Token, Vec<Arc<ServerConfig>>>,
    pub connections: HashMap<Token, HttpConnection>,
    pub cgi_to_client: HashMap<Token, Token>,
    pub session_store: SessionStore,
    pub zombie_purgatory: Vec<std::process::Child>,
    next_token: usize,
}

const LISTENER_TOKEN_START: usize = 0;
const CONNECTION_TOKEN_START: usize = 1_000_000;

impl Server {
    pub fn new(config: AppConfig, poll: &Poll) -> Result<Self> {
        install_signal_handlers();

        let mut by_addr: HashMap<SocketAddr, Vec<Arc<ServerConfig>>> = HashMap::new();
        for server_cfg in config.servers {
            let addr: SocketAddr = format!("{}:{}", server_cfg.host, server_cfg.port).parse()?;
            by_addr.entry(addr).or_default().push(Arc::new(server_cfg));
        }

        let mut listeners = Vec::new();
        let mut listener_tokens = HashMap::new();
        let mut next_token = LISTENER_TOKEN_START;

        for (addr, configs) in by_addr {
            let mut listener = TcpListener::bind(addr)?;
            let token = Token(next_token);
            next_token += 1;
            poll.registry().register(&mut listener, token, Interest::READABLE)?;
            info!("listening on {}", addr);
            listener_tokens.insert(token, configs);
            listeners.push(listener);
        }

        Ok(Server {
            listeners,
            listener_tokens,
            connections: HashMap::new(),
            cgi_to_client: HashMap::new(),
            session_store: SessionStore::new(3600),
            zombie_purgatory: Vec::new(),
            next_token: CONNECTION_TOKEN_START,
        })
    }

    pub fn run(&mut self, mut poll: Poll) -> Result<()> {
        let mut events = Events::with_capacity(1024);

        while !shutdown_requested() {
            match poll.poll(&mut events, Some(POLL_TICK)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                let token = event.token();

                if let Some(configs) = self.listener_tokens.get(&token).cloned() {
                    self.accept_connections(token, &poll, configs)?;
                    continue;
                }

                if let Some(&client_token) = self.cgi_to_client.get(&token) {
                    self.handle_cgi(&poll, event, token, client_token)?;
                    continue;
                }

                self.handle_client_event(&poll, event, token)?;
            }

            crate::timeouts::process(self, &poll);
            self.reap_zombies();
        }

        self.shutdown(&poll);
        Ok(())
    }

    fn accept_connections(&mut self, listener_token: Token, poll: &Poll, configs: Vec<Arc<ServerConfig>>) -> Result<()> {
        let listener = self.find_listener_mut(listener_token)?;

        loop {
            match listener.accept() {
                Ok((mut stream, _addr)) => {
                    stream.set_nodelay(true).ok();
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    poll.registry().register(&mut stream, token, Interest::READABLE)?;

                    let conn = HttpConnection::new(stream, configs.clone());
                    self.connections.insert(token, conn);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }

    fn find_listener_mut(&mut self, token: Token) -> Result<&mut TcpListener> {
        // Listener tokens are assigned densely starting at LISTENER_TOKEN_START
        // in registration order, matching `self.listeners`' order.
        self.listeners
            .get_mut(token.0 - LISTENER_TOKEN_START)
            .ok_or_else(|| "unknown listener token".into())
    }

    fn handle_client_event(&mut self, poll: &Poll, event: &Event, token: Token) -> Result<()> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Ok(());
        };
        conn.touch();

        if event.is_readable() {
            HttpConnection::handle_read_phase(
                conn,
                poll,
                token,
                &mut self.next_token,
                &mut self.cgi_to_client,
                &mut self.session_store,
            )?;
        }

        if event.is_writable() {
            HttpConnection::handle_write_phase(
                conn,
                poll,
                token,
                &mut self.next_token,
                &mut self.cgi_to_client,
                &mut self.session_store,
            )?;
        }

        if self.connections.get(&token).is_some_and(HttpConnection::should_close) {
            HttpConnection::terminate_connection(self, token);
        }

        Ok(())
    }

    fn handle_cgi(&mut self, poll: &Poll, event: &Event, cgi_token: Token, client_token: Token) -> Result<()> {
        let Some(conn) = self.connections.get_mut(&client_token) else {
            self.cgi_to_client.remove(&cgi_token);
            return Ok(());
        };

        handle_cgi_event(poll, event, cgi_token, client_token, conn, &mut self.cgi_to_client)?;

        if conn.should_close() {
            HttpConnection::terminate_connection(self, client_token);
        }

        Ok(())
    }

    fn reap_zombies(&mut self) {
        self.zombie_purgatory.retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_))));
    }

    fn shutdown(&mut self, poll: &Poll) {
        info!("shutting down, draining {} connection(s)", self.connections.len());
        for (token, mut conn) in self.connections.drain() {
            let _ = poll.registry().deregister(&mut conn.stream);
            if let ActiveAction::Cgi { mut child, .. } = conn.action {
                let _ = child.kill();
                let _ = child.wait();
            }
            let _ = token;
        }
        for child in self.zombie_purgatory.iter_mut() {
            let _ = child.wait();
        }
    }
}

static SHUTDOWN: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

fn shutdown_requested() -> bool {
    SHUTDOWN.load(std::sync::atomic::Ordering::Relaxed)
}

extern "C" fn on_sigint(_: libc::c_int) {
    SHUTDOWN.store(true, std::sync::atomic::Ordering::Relaxed);
}

/// SIGINT triggers a graceful shutdown; SIGTSTP/SIGQUIT/SIGPIPE are ignored so
/// a slow client or a closed CGI pipe can never take the process down.
fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        libc::signal(libc::SIGTSTP, libc::SIG_IGN);
        libc::signal(libc::SIGQUIT, libc::SIG_IGN);
    }
}
