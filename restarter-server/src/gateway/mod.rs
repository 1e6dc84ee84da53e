//! SSH gateway
//!
//! The only network surface of the daemon: a password-authenticated SSH
//! server that admits `direct-tcpip` channels to the child's port and
//! nothing else. Session channels get an informational greeting and exit
//! status 1. The gateway itself holds no supervision state; it translates
//! channel lifecycles into login events for the supervisor.

mod forward;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use russh::server::{Auth, Handler, Msg, Server, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use restarter_utils::{RestarterError, Result};

use crate::config::ServerConfig;
use crate::supervisor::Event;

/// Gateway-facing slice of the runtime configuration
struct GatewayConfig {
    ssh_port: u16,
    fwd_port: u16,
    password_hash: String,
    max_retries: u32,
    retry_delay: Duration,
}

/// Accepts SSH connections and hands each one a [`ClientHandler`]
struct Gateway {
    config: Arc<GatewayConfig>,
    events: mpsc::Sender<Event>,
}

impl Server for Gateway {
    type Handler = ClientHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> ClientHandler {
        debug!(peer = ?peer_addr, "ssh connection opened");
        ClientHandler {
            config: self.config.clone(),
            events: self.events.clone(),
            peer: peer_addr,
        }
    }
}

/// Listen on the configured SSH port until the process exits
pub async fn run(cfg: &ServerConfig, events: mpsc::Sender<Event>) -> Result<()> {
    let key = russh::keys::load_secret_key(&cfg.hostkey, None).map_err(|e| {
        RestarterError::HostKey {
            path: cfg.hostkey.clone(),
            message: e.to_string(),
        }
    })?;

    let ssh_config = russh::server::Config {
        auth_rejection_time: Duration::from_secs(3),
        auth_rejection_time_initial: Some(Duration::ZERO),
        keys: vec![key],
        ..Default::default()
    };

    let mut gateway = Gateway {
        config: Arc::new(GatewayConfig {
            ssh_port: cfg.ssh_port,
            fwd_port: cfg.fwd_port,
            password_hash: cfg.password_hash.clone(),
            max_retries: cfg.max_retries,
            retry_delay: cfg.retry_delay,
        }),
        events,
    };

    info!(
        ssh_port = cfg.ssh_port,
        fwd_port = cfg.fwd_port,
        "ssh gateway listening, accepting forwards"
    );

    gateway
        .run_on_address(Arc::new(ssh_config), ("0.0.0.0", cfg.ssh_port))
        .await
        .map_err(|e| RestarterError::ssh(e.to_string()))?;

    Ok(())
}

/// Per-connection SSH state
struct ClientHandler {
    config: Arc<GatewayConfig>,
    events: mpsc::Sender<Event>,
    peer: Option<SocketAddr>,
}

impl ClientHandler {
    /// Session id for login events: the remote peer address
    fn login_id(&self, originator: &str, originator_port: u32) -> String {
        match self.peer {
            Some(addr) => addr.to_string(),
            None => format!("{}:{}", originator, originator_port),
        }
    }

    fn greet_and_close(
        &self,
        channel: ChannelId,
        session: &mut Session,
    ) -> std::result::Result<(), russh::Error> {
        let banner = format!(
            "Port forwarding only!\r\nTry this command: ssh -L {fwd}:localhost:{fwd} -N <server address> -p {ssh}\r\n",
            fwd = self.config.fwd_port,
            ssh = self.config.ssh_port,
        );
        session.data(channel, CryptoVec::from_slice(banner.as_bytes()))?;
        session.exit_status_request(channel, 1)?;
        session.eof(channel)?;
        session.close(channel)?;
        Ok(())
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn auth_password(
        &mut self,
        user: &str,
        password: &str,
    ) -> std::result::Result<Auth, Self::Error> {
        match bcrypt::verify(password, &self.config.password_hash) {
            Ok(true) => {
                info!(user, "password accepted");
                Ok(Auth::Accept)
            }
            Ok(false) => {
                info!(user, "password rejected");
                Ok(reject())
            }
            Err(e) => {
                warn!(error = %e, "bcrypt verification failed");
                Ok(reject())
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        session.channel_success(channel)?;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        self.greet_and_close(channel, session)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        self.greet_and_close(channel, session)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        if !forward::destination_allowed(host_to_connect, port_to_connect, self.config.fwd_port) {
            warn!(
                host = host_to_connect,
                port = port_to_connect,
                "forward destination prohibited"
            );
            return Ok(false);
        }

        let id = self.login_id(originator_address, originator_port);

        // Up before dialing: the supervisor may need to start the child
        // this forward is waiting for.
        if self
            .events
            .send(Event::Login {
                up: true,
                id: id.clone(),
            })
            .await
            .is_err()
        {
            return Ok(false);
        }

        let dest = format!("{}:{}", host_to_connect, port_to_connect);
        match forward::dial_with_retry(&dest, self.config.max_retries, self.config.retry_delay)
            .await
        {
            Ok(socket) => {
                debug!(peer = %id, dest = %dest, "forward bridge established");
                forward::bridge(channel, socket, id, self.events.clone());
                Ok(true)
            }
            Err(e) => {
                warn!(peer = %id, dest = %dest, error = %e, "inner dial exhausted, rejecting forward");
                let _ = self.events.send(Event::Login { up: false, id }).await;
                Ok(false)
            }
        }
    }
}
